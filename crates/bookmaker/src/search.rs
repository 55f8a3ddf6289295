//! 深さ優先で定跡手順を生成する。
//!
//! 各局面でエンジンに multipv 候補を求め、定跡側視点の相対評価値が
//! 閾値 (mrs) 以上の候補すべてに分岐する。最大手数に達したか、
//! 候補が残らなかった時点でその枝の手順を1本出力する。

use anyhow::Result;
use log::{debug, info};
use shakmaty::{Chess, Color, Move, Position};

use crate::config::SearchConfig;
use crate::engine::Analyzer;
use crate::position::{play_san, position_key};
use crate::score::{RelativeScore, normalize};
use crate::types::{Score, side_label};

/// 閾値比較の許容誤差（歩単位）
const SCORE_EPSILON: f64 = 1e-9;

/// 採用された1手分。
#[derive(Clone, Debug)]
pub struct BookPly {
    pub mv: Move,
    pub uci: String,
    pub san: String,
    pub mover: Color,
    pub raw: Score,
    pub relative: RelativeScore,
    pub rank: u32,
}

/// 開始局面から末端までの定跡手順。
#[derive(Clone, Debug, Default)]
pub struct BookLine {
    pub plies: Vec<BookPly>,
}

impl BookLine {
    pub fn len(&self) -> usize {
        self.plies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plies.is_empty()
    }

    pub fn uci_moves(&self) -> Vec<&str> {
        self.plies.iter().map(|p| p.uci.as_str()).collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub evaluations: u64,
    pub candidates: u64,
    pub pruned: u64,
    pub repetitions: u64,
    pub lines: u64,
}

/// 候補が閾値を満たすか。
pub fn survives(score: RelativeScore, mrs: f64) -> bool {
    score.pawns() + SCORE_EPSILON >= mrs
}

/// DFS 本体。手順スタックは常に「根から展開中の局面まで」の経路と一致する。
pub struct LineBuilder<'a, A: Analyzer> {
    analyzer: &'a mut A,
    config: &'a SearchConfig,
    stack: Vec<BookPly>,
    /// 現在の枝に現れた局面キー（根を含む）
    path: Vec<String>,
    lines: Vec<BookLine>,
    stats: SearchStats,
}

impl<'a, A: Analyzer> LineBuilder<'a, A> {
    pub fn new(analyzer: &'a mut A, config: &'a SearchConfig) -> Self {
        Self {
            analyzer,
            config,
            stack: Vec::new(),
            path: Vec::new(),
            lines: Vec::new(),
            stats: SearchStats::default(),
        }
    }

    /// 根局面から探索し、完了順（行きがけ順）の手順一覧を返す。
    pub fn run(mut self, root: &Chess) -> Result<(Vec<BookLine>, SearchStats)> {
        self.path.push(position_key(root));
        self.expand(root, 0)?;
        info!(
            "search finished: {} lines, {} evaluations, {} candidates, {} pruned",
            self.stats.lines, self.stats.evaluations, self.stats.candidates, self.stats.pruned
        );
        Ok((self.lines, self.stats))
    }

    fn expand(&mut self, pos: &Chess, ply: u32) -> Result<()> {
        if ply >= self.config.max_depth {
            self.emit();
            return Ok(());
        }

        let mover = pos.turn();
        let multipv = self.config.multipv_for(mover);
        let mut candidates = self.analyzer.evaluate(pos, multipv, self.config.movetime_ms)?;
        candidates.truncate(multipv as usize);
        self.stats.evaluations += 1;
        self.stats.candidates += candidates.len() as u64;

        let mut survivors = 0usize;
        for cand in candidates {
            let relative =
                normalize(cand.score, mover, self.config.book_side, self.config.move_penalty);
            if !survives(relative, self.config.mrs) {
                self.stats.pruned += 1;
                debug!(
                    "ply {} {} {} ({}, depth {}) pruned: {relative} < {:+.2}; pv {}",
                    ply + 1,
                    side_label(mover),
                    cand.uci,
                    cand.score,
                    cand.depth.unwrap_or_default(),
                    self.config.mrs,
                    cand.pv.join(" ")
                );
                continue;
            }
            survivors += 1;

            let mut child = pos.clone();
            let san = play_san(&mut child, &cand.mv);
            self.stack.push(BookPly {
                mv: cand.mv,
                uci: cand.uci,
                san,
                mover,
                raw: cand.score,
                relative,
                rank: cand.rank,
            });

            let key = position_key(&child);
            if self.path.contains(&key) {
                // 同じ枝で局面が繰り返したらそれ以上は伸ばさない
                self.stats.repetitions += 1;
                self.emit();
            } else {
                self.path.push(key);
                self.expand(&child, ply + 1)?;
                self.path.pop();
            }
            self.stack.pop();
        }

        if survivors == 0 {
            self.emit();
        }
        Ok(())
    }

    fn emit(&mut self) {
        self.stats.lines += 1;
        if self.stack.is_empty() {
            info!("line {}: (empty)", self.stats.lines);
        } else {
            let moves: Vec<&str> = self.stack.iter().map(|p| p.san.as_str()).collect();
            info!("line {}: {}", self.stats.lines, moves.join(" "));
        }
        self.lines.push(BookLine {
            plies: self.stack.clone(),
        });
    }
}

/// 探索を1回実行するための簡易関数。
pub fn build_lines<A: Analyzer>(
    analyzer: &mut A,
    root: &Chess,
    config: &SearchConfig,
) -> Result<(Vec<BookLine>, SearchStats)> {
    LineBuilder::new(analyzer, config).run(root)
}
