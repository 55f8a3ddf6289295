//! 実行設定。TOML ファイルとコマンドライン引数を重ね合わせ、検証済みの値に変換する。

use std::path::{Path, PathBuf};

use serde::Deserialize;
use shakmaty::Color;

use crate::engine::EngineConfig;

pub const DEFAULT_HASH_MB: i64 = 64;
pub const DEFAULT_THREADS: i64 = 1;
pub const DEFAULT_DEPTH: i64 = 4;
pub const DEFAULT_MOVETIME_MS: i64 = 1000;
pub const DEFAULT_MULTIPV: i64 = 1;
pub const DEFAULT_MIN_RELATIVE_SCORE: f64 = -0.3;
pub const DEFAULT_MOVE_PENALTY: f64 = -0.1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("engine path is required (--engine or `engine` in the config file)")]
    MissingEngine,
    #[error("input pgn is required (--inpgn or `inpgn` in the config file)")]
    MissingInput,
    #[error("depth must be >= 0, got {0}")]
    InvalidDepth(i64),
    #[error("multipv for {side} must be >= 1, got {value}")]
    InvalidMultipv { side: &'static str, value: i64 },
    #[error("movetime must be > 0 ms, got {0}")]
    InvalidMovetime(i64),
    #[error("hash must be >= 1 MB, got {0}")]
    InvalidHash(i64),
    #[error("threads must be >= 1, got {0}")]
    InvalidThreads(i64),
    #[error("{name} must be a finite number, got {value}")]
    NotFinite { name: &'static str, value: f64 },
    #[error("engine option '{0}' is not in Name=Value form")]
    InvalidEngineOption(String),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// 定跡を作る側。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn color(self) -> Color {
        match self {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }

    /// 出力先が指定されなかったときのファイル名。
    pub fn default_output(self) -> PathBuf {
        match self {
            Side::White => PathBuf::from("w_out.pgn"),
            Side::Black => PathBuf::from("b_out.pgn"),
        }
    }
}

/// multipv > 1 のとき思考時間を multipv 倍に延ばすかどうか（手番ごと）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MovetimeScaling {
    #[default]
    Both,
    White,
    Black,
    None,
}

impl MovetimeScaling {
    pub fn applies_to(self, color: Color) -> bool {
        match self {
            MovetimeScaling::Both => true,
            MovetimeScaling::White => color == Color::White,
            MovetimeScaling::Black => color == Color::Black,
            MovetimeScaling::None => false,
        }
    }
}

/// 探索（定跡手順生成）の設定。実行中は不変。
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub max_depth: u32,
    pub movetime_ms: u64,
    pub wmultipv: u32,
    pub bmultipv: u32,
    pub book_side: Color,
    /// minimum relative score: これ未満の候補手は枝刈りする
    pub mrs: f64,
    pub move_penalty: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_DEPTH as u32,
            movetime_ms: DEFAULT_MOVETIME_MS as u64,
            wmultipv: DEFAULT_MULTIPV as u32,
            bmultipv: DEFAULT_MULTIPV as u32,
            book_side: Color::Black,
            mrs: DEFAULT_MIN_RELATIVE_SCORE,
            move_penalty: DEFAULT_MOVE_PENALTY,
        }
    }
}

impl SearchConfig {
    pub fn multipv_for(&self, color: Color) -> u32 {
        match color {
            Color::White => self.wmultipv,
            Color::Black => self.bmultipv,
        }
    }
}

/// 検証済みの実行設定一式。
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub search: SearchConfig,
    pub book_side: Side,
    pub inpgn: PathBuf,
    pub output: PathBuf,
}

/// 未検証の設定値。すべて省略可能で、TOML でもコマンドラインでも同じ形で受け取る。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookConfig {
    pub engine: Option<PathBuf>,
    pub engine_args: Option<Vec<String>>,
    pub engine_options: Option<Vec<String>>,
    pub inpgn: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub hash: Option<i64>,
    pub threads: Option<i64>,
    pub depth: Option<i64>,
    pub movetime: Option<i64>,
    pub wmultipv: Option<i64>,
    pub bmultipv: Option<i64>,
    pub bookside: Option<Side>,
    pub relminscore: Option<f64>,
    pub movepenalty: Option<f64>,
    pub scale_movetime: Option<MovetimeScaling>,
}

impl BookConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `overrides` に値があればそちらを優先する。
    pub fn merge(self, overrides: BookConfig) -> BookConfig {
        BookConfig {
            engine: overrides.engine.or(self.engine),
            engine_args: overrides.engine_args.or(self.engine_args),
            engine_options: overrides.engine_options.or(self.engine_options),
            inpgn: overrides.inpgn.or(self.inpgn),
            output: overrides.output.or(self.output),
            hash: overrides.hash.or(self.hash),
            threads: overrides.threads.or(self.threads),
            depth: overrides.depth.or(self.depth),
            movetime: overrides.movetime.or(self.movetime),
            wmultipv: overrides.wmultipv.or(self.wmultipv),
            bmultipv: overrides.bmultipv.or(self.bmultipv),
            bookside: overrides.bookside.or(self.bookside),
            relminscore: overrides.relminscore.or(self.relminscore),
            movepenalty: overrides.movepenalty.or(self.movepenalty),
            scale_movetime: overrides.scale_movetime.or(self.scale_movetime),
        }
    }

    /// 既定値を補い、範囲を検証する。エンジン起動前に呼ぶこと。
    pub fn resolve(self) -> Result<RunConfig, ConfigError> {
        let engine_path = self.engine.ok_or(ConfigError::MissingEngine)?;
        let inpgn = self.inpgn.ok_or(ConfigError::MissingInput)?;

        let hash = self.hash.unwrap_or(DEFAULT_HASH_MB);
        let hash_mb = u32::try_from(hash)
            .ok()
            .filter(|&v| v >= 1)
            .ok_or(ConfigError::InvalidHash(hash))?;
        let threads = self.threads.unwrap_or(DEFAULT_THREADS);
        let threads = usize::try_from(threads)
            .ok()
            .filter(|&v| v >= 1)
            .ok_or(ConfigError::InvalidThreads(threads))?;

        let depth = self.depth.unwrap_or(DEFAULT_DEPTH);
        let max_depth = u32::try_from(depth).map_err(|_| ConfigError::InvalidDepth(depth))?;
        let movetime = self.movetime.unwrap_or(DEFAULT_MOVETIME_MS);
        let movetime_ms = u64::try_from(movetime)
            .ok()
            .filter(|&v| v > 0)
            .ok_or(ConfigError::InvalidMovetime(movetime))?;
        let wmultipv = checked_multipv("white", self.wmultipv.unwrap_or(DEFAULT_MULTIPV))?;
        let bmultipv = checked_multipv("black", self.bmultipv.unwrap_or(DEFAULT_MULTIPV))?;

        let mrs = finite(
            "relminscore",
            self.relminscore.unwrap_or(DEFAULT_MIN_RELATIVE_SCORE),
        )?;
        let move_penalty = finite(
            "movepenalty",
            self.movepenalty.unwrap_or(DEFAULT_MOVE_PENALTY),
        )?;

        let engine_options = self.engine_options.unwrap_or_default();
        if let Some(bad) = engine_options.iter().find(|opt| !opt.contains('=')) {
            return Err(ConfigError::InvalidEngineOption(bad.clone()));
        }

        let book_side = self.bookside.unwrap_or(Side::Black);
        let output = self.output.unwrap_or_else(|| book_side.default_output());

        Ok(RunConfig {
            engine: EngineConfig {
                path: engine_path,
                args: self.engine_args.unwrap_or_default(),
                threads,
                hash_mb,
                uci_options: engine_options,
                scaling: self.scale_movetime.unwrap_or_default(),
            },
            search: SearchConfig {
                max_depth,
                movetime_ms,
                wmultipv,
                bmultipv,
                book_side: book_side.color(),
                mrs,
                move_penalty,
            },
            book_side,
            inpgn,
            output,
        })
    }
}

fn checked_multipv(side: &'static str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v >= 1)
        .ok_or(ConfigError::InvalidMultipv { side, value })
}

fn finite(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::NotFinite { name, value })
    }
}
