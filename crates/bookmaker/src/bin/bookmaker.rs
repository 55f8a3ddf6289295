use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use bookmaker::book::{APP_NAME_VER, BookMeta, write_book};
use bookmaker::config::{BookConfig, MovetimeScaling, RunConfig, Side};
use bookmaker::engine::EngineSession;
use bookmaker::pgn::read_end_position;
use bookmaker::position::to_fen;
use bookmaker::search::build_lines;
use bookmaker::types::side_label;

/// エンジン解析で定跡用の PGN 手順を生成する。
///
/// 入力 PGN の最終局面から深さ優先で分岐し、相対評価値が `--relminscore` 未満の枝を刈る。
///
/// # よく使うコマンド例
///
/// - 黒番定跡を 6 手、黒は 2 候補まで分岐:
///   `cargo run -p bookmaker -- -e stockfish --inpgn seed.pgn -d 6 -g 2`
///
/// - 白番定跡、設定ファイル + 一部をコマンドラインで上書き:
///   `cargo run -p bookmaker -- --config book.toml -b white -a 500`
///
/// 出力先を省略すると白番定跡は `w_out.pgn`、黒番定跡は `b_out.pgn` に書き出す。
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = concat!(
        "Generates pgn lines using an engine useful for book creation. ",
        "It uses depth-first search algorithm to build the pgn lines."
    ),
    after_help = APP_NAME_VER
)]
struct Cli {
    /// Input engine path
    #[arg(short = 'e', long)]
    engine: Option<PathBuf>,

    /// Input pgn file; the end position of its first game seeds the search
    #[arg(long)]
    inpgn: Option<PathBuf>,

    /// Output pgn file (default: w_out.pgn for a white book, b_out.pgn for a black book)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// TOML file with default settings; command line values take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine hash usage in MB, default=64
    #[arg(short = 'm', long, allow_negative_numbers = true)]
    hash: Option<i64>,

    /// Engine threads to use, default=1
    #[arg(short = 't', long, allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Maximum depth of a book line in plies, default=4
    #[arg(short = 'd', long, allow_negative_numbers = true)]
    depth: Option<i64>,

    /// Analysis time per position in ms; with multipv=n where n > 1 the analysis time
    /// is extended to n times this movetime (see --scale-movetime), default=1000
    #[arg(short = 'a', long, allow_negative_numbers = true)]
    movetime: Option<i64>,

    /// Number of pv for white, default=1
    #[arg(short = 'f', long, allow_negative_numbers = true)]
    wmultipv: Option<i64>,

    /// Number of pv for black, default=1
    #[arg(short = 'g', long, allow_negative_numbers = true)]
    bmultipv: Option<i64>,

    /// white=book for white, black=book for black, default=black
    #[arg(short = 'b', long, value_enum)]
    bookside: Option<Side>,

    /// Minimum relative score that a given move will be extended; the higher it is,
    /// the fewer book lines will be generated, default=-0.3
    #[arg(short = 'r', long, allow_negative_numbers = true)]
    relminscore: Option<f64>,

    /// Move penalty for the book side, default=-0.1
    #[arg(short = 'j', long, allow_negative_numbers = true)]
    movepenalty: Option<f64>,

    /// Which side's multipv searches get the movetime extension, default=both
    #[arg(long, value_enum)]
    scale_movetime: Option<MovetimeScaling>,

    /// Extra arguments passed to the engine process
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    engine_args: Option<Vec<String>>,

    /// UCI options to set (format: "Name=Value", can be specified multiple times)
    #[arg(long = "engine-option")]
    engine_options: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> BookConfig {
        BookConfig {
            engine: self.engine.clone(),
            engine_args: self.engine_args.clone(),
            engine_options: if self.engine_options.is_empty() {
                None
            } else {
                Some(self.engine_options.clone())
            },
            inpgn: self.inpgn.clone(),
            output: self.output.clone(),
            hash: self.hash,
            threads: self.threads,
            depth: self.depth,
            movetime: self.movetime,
            wmultipv: self.wmultipv,
            bmultipv: self.bmultipv,
            bookside: self.bookside,
            relminscore: self.relminscore,
            movepenalty: self.movepenalty,
            scale_movetime: self.scale_movetime,
        }
    }

    fn resolve(&self) -> Result<RunConfig> {
        let base = match &self.config {
            Some(path) => BookConfig::load(path)?,
            None => BookConfig::default(),
        };
        Ok(base.merge(self.overrides()).resolve()?)
    }
}

fn print_settings(out: &mut impl Write, run: &RunConfig) -> std::io::Result<()> {
    let search = &run.search;
    writeln!(out, ":: Settings ::")?;
    writeln!(out, "Book for                   : {}", side_label(search.book_side))?;
    writeln!(out, "Move penalty for book side : {:0.2}", search.move_penalty)?;
    writeln!(out, "Minimum relative score     : {:0.2}", search.mrs)?;
    writeln!(out, "Max ply                    : {}", search.max_depth)?;
    writeln!(out, "Movetime (ms)              : {}", search.movetime_ms)?;
    writeln!(
        out,
        "Multipv white / black      : {} / {}",
        search.wmultipv, search.bmultipv
    )?;
    writeln!(out, "Hash (mb)                  : {}", run.engine.hash_mb)?;
    writeln!(out, "Threads                    : {}", run.engine.threads)?;
    writeln!(out, "Output                     : {}\n", run.output.display())?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Never)
        .init();

    let cli = Cli::parse();
    let run = cli.resolve()?;

    let mut stdout = std::io::stdout();
    print_settings(&mut stdout, &run)?;

    let (root, seed_plies) = read_end_position(&run.inpgn)?;
    info!("seed position after {seed_plies} plies: {}", to_fen(&root));

    let started = Instant::now();
    let mut engine = EngineSession::spawn(&run.engine)?;
    info!("engine: {}", engine.name);
    let (lines, stats) = build_lines(&mut engine, &root, &run.search)?;
    let meta = BookMeta::new(&engine.name, run.search.book_side);
    let evaluations = engine.evaluations();
    drop(engine);

    let found = lines.len();
    let written = write_book(&run.output, &root, lines, &meta)
        .with_context(|| format!("failed to write book to {}", run.output.display()))?;

    writeln!(stdout, ":: Summary ::")?;
    writeln!(stdout, "Lines found                : {found}")?;
    writeln!(stdout, "Unique lines written       : {written}")?;
    writeln!(stdout, "Engine evaluations         : {evaluations}")?;
    writeln!(stdout, "Pruned candidates          : {}", stats.pruned)?;
    writeln!(stdout, "Elapsed (s)                : {:.1}", started.elapsed().as_secs_f64())?;
    writeln!(stdout, "Output                     : {}", run.output.display())?;
    Ok(())
}
