//! エンジン評価値を定跡側から見た相対評価値（歩単位）へ正規化する。

use std::fmt;

use shakmaty::Color;

use crate::types::Score;

/// 詰みに割り当てる評価値（歩単位）。現実的な cp 評価値より十分大きい。
pub const MATE_SCORE: f64 = 1000.0;

/// 定跡側から見た評価値（歩単位）。局面・手番を跨いで比較できる。
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct RelativeScore(pub f64);

impl RelativeScore {
    pub fn pawns(self) -> f64 {
        self.0
    }
}

impl fmt::Display for RelativeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.2}", self.0)
    }
}

/// 手番側から見た生の評価値を歩単位に直す。
///
/// 詰みは `±(MATE_SCORE - 手数)`。短い詰みほど絶対値が大きい。
/// `mate 0` は手番側が詰んでいることを表す。
pub fn raw_pawns(score: Score) -> f64 {
    match score {
        Score::Cp(cp) => f64::from(cp) / 100.0,
        Score::Mate(n) if n > 0 => MATE_SCORE - f64::from(n),
        Score::Mate(n) => -(MATE_SCORE - f64::from(n).abs()),
    }
}

/// 候補手の評価値を定跡側視点へ変換する。
///
/// 手番が定跡側でなければ符号を反転し、定跡側なら `|move_penalty|` を差し引く。
pub fn normalize(
    raw: Score,
    mover: Color,
    book_side: Color,
    move_penalty: f64,
) -> RelativeScore {
    let pawns = raw_pawns(raw);
    if mover == book_side {
        RelativeScore(pawns - move_penalty.abs())
    } else {
        RelativeScore(-pawns)
    }
}
