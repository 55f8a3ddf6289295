//! 入力 PGN の最初の1局を読み、本譜の最終局面を求める。

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::{Chess, Position};

use crate::position::parse_fen;

/// 本譜を辿って局面を進める Visitor。変化は読み飛ばす。
struct EndPosition {
    pos: Chess,
    plies: usize,
    error: Option<anyhow::Error>,
}

impl EndPosition {
    fn new() -> Self {
        Self {
            pos: Chess::default(),
            plies: 0,
            error: None,
        }
    }
}

impl Visitor for EndPosition {
    type Result = Result<(Chess, usize)>;

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        if key == b"FEN" && self.error.is_none() {
            let fen = value.decode_utf8_lossy();
            match parse_fen(&fen) {
                Ok(pos) => self.pos = pos,
                Err(e) => self.error = Some(e),
            }
        }
    }

    fn san(&mut self, san_plus: SanPlus) {
        if self.error.is_some() {
            return;
        }
        match san_plus.san.to_move(&self.pos) {
            Ok(mv) => {
                self.pos.play_unchecked(&mv);
                self.plies += 1;
            }
            Err(e) => {
                let ply = self.plies + 1;
                self.error = Some(anyhow!("illegal move {san_plus} at ply {ply}: {e}"));
            }
        }
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn end_game(&mut self) -> Self::Result {
        let mut finished = std::mem::replace(self, EndPosition::new());
        match finished.error.take() {
            Some(e) => Err(e),
            None => Ok((finished.pos, finished.plies)),
        }
    }
}

/// PGN テキストの最初の1局の最終局面と、そこまでの手数を返す。
pub fn end_position_from_str(pgn: &str) -> Result<(Chess, usize)> {
    let mut reader = BufferedReader::new_cursor(pgn);
    match reader.read_game(&mut EndPosition::new())? {
        Some(result) => result,
        None => bail!("no game found in pgn"),
    }
}

/// PGN ファイルの最初の1局の最終局面。
pub fn read_end_position(path: &Path) -> Result<(Chess, usize)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    end_position_from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::to_fen;

    #[test]
    fn reads_mainline_end_position() {
        let pgn = r#"[Event "seed"]
[Site "?"]
[Result "*"]

1. e4 c5 (1... e5 2. Nf3) 2. Nf3 {developing} d6 *

[Event "second"]

1. d4 *
"#;
        let (pos, plies) = end_position_from_str(pgn).unwrap();
        assert_eq!(plies, 4);
        assert_eq!(
            to_fen(&pos),
            "rnbqkbnr/pp2pppp/3p4/2p5/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 0 3"
        );
    }

    #[test]
    fn honours_fen_header() {
        let pgn = r#"[Event "from fen"]
[SetUp "1"]
[FEN "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2"]

2... Nc6 3. Bb5 *
"#;
        let (pos, plies) = end_position_from_str(pgn).unwrap();
        assert_eq!(plies, 2);
        assert_eq!(pos.turn(), shakmaty::Color::Black);
        assert_eq!(pos.fullmoves().get(), 3);
    }

    #[test]
    fn game_without_moves_keeps_start_position() {
        let (pos, plies) = end_position_from_str("[Event \"empty\"]\n\n*\n").unwrap();
        assert_eq!(plies, 0);
        assert_eq!(to_fen(&pos), to_fen(&Chess::default()));
    }

    #[test]
    fn rejects_illegal_moves_and_empty_input() {
        let err = end_position_from_str("1. e4 e5 2. Ke3 *\n").unwrap_err();
        assert!(err.to_string().contains("Ke3"));
        assert!(end_position_from_str("").is_err());
        assert!(end_position_from_str("[FEN \"garbage\"]\n\n*\n").is_err());
    }
}
