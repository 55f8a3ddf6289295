//! エンジン解析による定跡手順生成。
//!
//! 入力 PGN の最終局面から UCI エンジンの multipv 評価で深さ優先に分岐し、
//! 相対評価値が閾値を下回る枝を刈りながら定跡手順を PGN に書き出す。

pub mod book;
pub mod config;
pub mod engine;
pub mod pgn;
pub mod position;
pub mod score;
pub mod search;
pub mod types;

pub use book::{BookMeta, write_book};
pub use config::{BookConfig, ConfigError, MovetimeScaling, RunConfig, SearchConfig, Side};
pub use engine::{Analyzer, EngineConfig, EngineSession};
pub use score::{RelativeScore, normalize};
pub use search::{BookLine, BookPly, LineBuilder, SearchStats, build_lines};
pub use types::{Candidate, Score};
