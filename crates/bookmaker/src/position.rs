use anyhow::{Context, Result, anyhow};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};

/// 局面を FEN 文字列にする。en passant は合法な場合のみ出力する。
pub fn to_fen(pos: &Chess) -> String {
    Fen(pos.clone().into_setup(EnPassantMode::Legal))
        .to_string()
}

/// 手数カウンタを除いた FEN。同一探索枝内の同一局面判定に使う。
pub fn position_key(pos: &Chess) -> String {
    to_fen(pos)
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_fen(fen: &str) -> Result<Chess> {
    let setup: Fen = fen
        .trim()
        .parse()
        .with_context(|| format!("invalid FEN '{fen}'"))?;
    setup
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| anyhow!("illegal position '{fen}': {e}"))
}

/// UCI 表記の指し手を局面上の合法手に変換する。
pub fn parse_uci_move(pos: &Chess, uci: &str) -> Result<Move> {
    let parsed: UciMove = uci
        .parse()
        .with_context(|| format!("malformed UCI move '{uci}'"))?;
    parsed
        .to_move(pos)
        .map_err(|e| anyhow!("illegal move '{uci}': {e}"))
}

pub fn uci_of(mv: &Move) -> String {
    mv.to_uci(CastlingMode::Standard).to_string()
}

/// SAN を求めたうえで指し手を進める。
pub fn play_san(pos: &mut Chess, mv: &Move) -> String {
    SanPlus::from_move_and_play_unchecked(pos, mv).to_string()
}

/// FEN（省略時は平手）から UCI 指し手列を適用した局面を作る。
pub fn build_position(fen: Option<&str>, moves: &[&str]) -> Result<Chess> {
    let mut pos = match fen {
        Some(fen) => parse_fen(fen)?,
        None => Chess::default(),
    };
    for uci in moves {
        let mv = parse_uci_move(&pos, uci)?;
        pos.play_unchecked(&mv);
    }
    Ok(pos)
}
