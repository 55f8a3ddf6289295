use std::fmt;
use std::time::Duration;

use shakmaty::{Color, Move};

/// エンジンが返した生の評価値。常に手番側から見た値。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => write!(f, "cp {cp}"),
            Score::Mate(n) => write!(f, "mate {n}"),
        }
    }
}

/// ある局面に対してエンジンが報告した候補手1つ分。
#[derive(Clone, Debug)]
pub struct Candidate {
    pub mv: Move,
    pub uci: String,
    pub score: Score,
    /// multipv の順位（1 始まり）
    pub rank: u32,
    pub depth: Option<u32>,
    pub pv: Vec<String>,
}

/// `info` 行から必要な項目だけを抜き出したもの。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub nodes: Option<u64>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    /// `lowerbound` / `upperbound` 付きのスコア
    pub bound: bool,
    pub pv: Vec<String>,
}

/// `info` 行を解析する。`info` で始まらない行は `None`。
///
/// `string` 以降は自由文なので読まない。
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first().copied() != Some("info") {
        return None;
    }
    let mut info = InfoLine::default();
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                info.depth = tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok());
                i += 2;
            }
            "seldepth" => {
                info.seldepth = tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok());
                i += 2;
            }
            "nodes" => {
                info.nodes = tokens.get(i + 1).and_then(|t| t.parse::<u64>().ok());
                i += 2;
            }
            "multipv" => {
                info.multipv = tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok());
                i += 2;
            }
            "score" => {
                let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                info.score = match (tokens.get(i + 1).copied(), value) {
                    (Some("cp"), Some(v)) => Some(Score::Cp(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                };
                i += 3;
                while let Some(&tok) = tokens.get(i) {
                    if tok == "lowerbound" || tok == "upperbound" {
                        info.bound = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            "pv" => {
                info.pv = tokens[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            "string" => break,
            _ => i += 1,
        }
    }
    Some(info)
}

pub fn side_label(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
