//! 定跡手順を PGN として書き出す。

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use shakmaty::{Chess, Color, Position};
use tempfile::NamedTempFile;

use crate::position::to_fen;
use crate::search::BookLine;
use crate::types::side_label;

/// PGN の1行あたりの最大文字数（PGN export format の推奨値）
const PGN_LINE_WIDTH: usize = 80;

pub const APP_NAME_VER: &str = concat!("BookMaker v", env!("CARGO_PKG_VERSION"));

/// 全ゲーム共通のタグ値。
#[derive(Clone, Debug)]
pub struct BookMeta {
    pub event: String,
    pub site: String,
    pub date: String,
    pub annotator: String,
}

impl BookMeta {
    pub fn new(engine_name: &str, book_side: Color) -> Self {
        Self {
            event: format!("{APP_NAME_VER} {} book", side_label(book_side)),
            site: "?".to_string(),
            date: Local::now().format("%Y.%m.%d").to_string(),
            annotator: engine_name.to_string(),
        }
    }
}

/// 同じ指し手列の手順を1本にまとめる。最初に現れたものを残し、順序は保つ。
pub fn dedupe(lines: Vec<BookLine>) -> Vec<BookLine> {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.plies.iter().map(|p| p.uci.clone()).collect()))
        .collect()
}

fn escape_tag(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// 手順の SAN 列を手数付きの movetext トークンにする。
fn movetext_tokens(root: &Chess, line: &BookLine) -> Vec<String> {
    let mut tokens = Vec::with_capacity(line.len() * 3 / 2 + 1);
    let mut number = root.fullmoves().get();
    for (i, ply) in line.plies.iter().enumerate() {
        match ply.mover {
            Color::White => tokens.push(format!("{number}.")),
            Color::Black if i == 0 => tokens.push(format!("{number}...")),
            Color::Black => {}
        }
        tokens.push(ply.san.clone());
        if ply.mover == Color::Black {
            number += 1;
        }
    }
    tokens.push("*".to_string());
    tokens
}

fn wrap_tokens(tokens: &[String]) -> String {
    let mut out = String::new();
    let mut width = 0;
    for tok in tokens {
        if width > 0 && width + 1 + tok.len() > PGN_LINE_WIDTH {
            out.push('\n');
            width = 0;
        } else if width > 0 {
            out.push(' ');
            width += 1;
        }
        out.push_str(tok);
        width += tok.len();
    }
    out.push('\n');
    out
}

/// 1本の手順を PGN の1局にする。NAG・コメント・変化は付けない。
pub fn format_game(root: &Chess, line: &BookLine, round: usize, meta: &BookMeta) -> String {
    let tags = [
        ("Event", meta.event.clone()),
        ("Site", meta.site.clone()),
        ("Date", meta.date.clone()),
        ("Round", round.to_string()),
        ("White", "?".to_string()),
        ("Black", "?".to_string()),
        ("Result", "*".to_string()),
        ("Annotator", meta.annotator.clone()),
        ("SetUp", "1".to_string()),
        ("FEN", to_fen(root)),
    ];
    let mut out = String::new();
    for (key, value) in tags {
        out.push_str(&format!("[{key} \"{}\"]\n", escape_tag(&value)));
    }
    out.push('\n');
    out.push_str(&wrap_tokens(&movetext_tokens(root, line)));
    out
}

/// 全手順を1つの PGN 文字列にする。
pub fn render_book(root: &Chess, lines: &[BookLine], meta: &BookMeta) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format_game(root, line, i + 1, meta));
    }
    out
}

/// 重複を除いて PGN を書き出し、書き出した局数を返す。
///
/// 出力先と同じディレクトリの一時ファイルに全て書いてから rename するので、
/// 失敗しても既存のファイルは壊れない。
pub fn write_book(
    path: &Path,
    root: &Chess,
    lines: Vec<BookLine>,
    meta: &BookMeta,
) -> Result<usize> {
    let unique = dedupe(lines);
    let text = render_book(root, &unique, meta);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(text.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(unique.len())
}
