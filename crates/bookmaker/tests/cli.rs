#![cfg(unix)]

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 局面ごとに決め打ちの info 行を返す UCI エンジンもどき。
const FAKE_ENGINE: &str = r#"
pos=""
while IFS= read -r line; do
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "option name Hash type spin default 16 min 1 max 1024"
      echo "option name Threads type spin default 1 min 1 max 8"
      echo "option name MultiPV type spin default 1 min 1 max 16"
      echo "uciok" ;;
    isready) echo "readyok" ;;
    "position fen "*) pos="${line#position fen }" ;;
    go*)
      case "$pos" in
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")
          echo "info depth 10 multipv 1 score cp 0 pv e2e4 e7e5" ;;
        "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1")
          echo "info depth 9 multipv 1 score cp 5 lowerbound pv d7d5"
          echo "info depth 10 multipv 1 score cp 0 pv c7c5 g1f3"
          echo "info depth 10 multipv 2 score cp -30 pv e7e6 d2d4" ;;
      esac
      echo "bestmove 0000" ;;
    quit) exit 0 ;;
  esac
done
"#;

/// `go` を受け取った瞬間に落ちるエンジン。
const CRASHING_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) exit 3 ;;
  esac
done
"#;

/// `go` を受け取っても何も返さないエンジン。
const SILENT_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    quit) exit 0 ;;
  esac
done
"#;

/// 壊れた info 行しか返さないエンジン。
const GARBAGE_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      echo "info depth x score cp abc pv"
      echo "info multipv 1 score mate pv"
      echo "not a uci line"
      echo "bestmove (none)" ;;
    quit) exit 0 ;;
  esac
done
"#;

/// MultiPV 設定と go 行を `@LOG@` に書き出し、常に e2e4 を返すエンジン。
const RECORDING_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    "setoption name MultiPV "*) echo "$line" >> "@LOG@" ;;
    go*)
      echo "$line" >> "@LOG@"
      echo "info depth 1 multipv 1 score cp 0 pv e2e4"
      echo "bestmove e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn bookmaker(engine_script: &Path, seed: &Path, output: &Path, extra: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("bookmaker").unwrap();
    cmd.env("RUST_LOG", "warn");
    cmd.args(["-e", "/bin/sh", "--inpgn"]).arg(seed).arg("-o").arg(output).args(extra);
    // /bin/sh に台本を渡す。num_args が可変なので最後に置く
    cmd.arg("--engine-args").arg(engine_script);
    cmd
}

#[test]
fn builds_black_book_from_fake_engine() {
    let fx = Fixture::new();
    let engine = fx.write("engine.sh", FAKE_ENGINE);
    let seed = fx.write("seed.pgn", "[Event \"seed\"]\n\n*\n");
    let out = fx.path("book.pgn");

    let mut cmd =
        bookmaker(&engine, &seed, &out, &["-d", "2", "-f", "1", "-g", "2", "-a", "50"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(":: Settings ::"))
        .stdout(predicate::str::contains("Unique lines written       : 1"));

    let pgn = fs::read_to_string(&out).unwrap();
    assert_eq!(pgn.matches("[Event ").count(), 1, "{pgn}");
    assert!(pgn.contains("[Annotator \"FakeFish 1.0\"]"), "{pgn}");
    assert!(pgn.contains("[FEN \"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1\"]"));
    assert!(pgn.contains("\n1. e4 c5 *\n"), "{pgn}");
}

#[test]
fn depth_zero_writes_single_empty_game() {
    let fx = Fixture::new();
    let engine = fx.write("engine.sh", FAKE_ENGINE);
    let seed = fx.write("seed.pgn", "1. e4 e5 2. Nf3 *\n");
    let out = fx.path("book.pgn");

    let mut cmd = bookmaker(&engine, &seed, &out, &["-d", "0"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Engine evaluations         : 0"));

    let pgn = fs::read_to_string(&out).unwrap();
    assert_eq!(pgn.matches("[Event ").count(), 1);
    assert!(pgn.contains(
        "[FEN \"rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2\"]"
    ));
    assert!(pgn.ends_with("\n\n*\n"), "{pgn}");
}

#[test]
fn engine_crash_is_fatal_and_leaves_no_output() {
    let fx = Fixture::new();
    let engine = fx.write("crash.sh", CRASHING_ENGINE);
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");

    let mut cmd = bookmaker(&engine, &seed, &out, &["-d", "2"]);
    cmd.assert().failure().stderr(predicate::str::contains("engine exited unexpectedly"));
    assert!(!out.exists());
}

#[test]
fn invalid_configuration_is_rejected_before_engine_start() {
    let fx = Fixture::new();
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");

    let mut cmd = Command::cargo_bin("bookmaker").unwrap();
    cmd.args(["-e", "/nonexistent/engine", "--inpgn"])
        .arg(&seed)
        .arg("-o")
        .arg(&out)
        .args(["-g", "0"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("multipv for black must be >= 1"));
    assert!(!out.exists());
}

#[test]
fn missing_engine_binary_is_fatal() {
    let fx = Fixture::new();
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");

    let mut cmd = Command::cargo_bin("bookmaker").unwrap();
    cmd.args(["-e", "/nonexistent/engine", "--inpgn"])
        .arg(&seed)
        .arg("-o")
        .arg(&out);
    cmd.assert().failure().stderr(predicate::str::contains("failed to spawn engine"));
    assert!(!out.exists());
}

#[test]
fn unreadable_seed_is_fatal() {
    let fx = Fixture::new();
    let engine = fx.write("engine.sh", FAKE_ENGINE);
    let seed = fx.write("seed.pgn", "1. e4 e5 2. Ke3 *\n");
    let out = fx.path("book.pgn");

    let mut cmd = bookmaker(&engine, &seed, &out, &[]);
    cmd.assert().failure().stderr(predicate::str::contains("illegal move Ke3"));
    assert!(!out.exists());
}

#[test]
fn config_file_supplies_defaults() {
    let fx = Fixture::new();
    let engine = fx.write("engine.sh", FAKE_ENGINE);
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");
    let config = fx.write(
        "book.toml",
        &format!(
            concat!(
                "engine = \"/bin/sh\"\n",
                "engine_args = [\"{}\"]\n",
                "inpgn = \"{}\"\n",
                "output = \"{}\"\n",
                "depth = 2\nbmultipv = 2\nmovetime = 50\n",
            ),
            engine.display(),
            seed.display(),
            out.display()
        ),
    );

    let mut cmd = Command::cargo_bin("bookmaker").unwrap();
    cmd.env("RUST_LOG", "warn").arg("--config").arg(&config);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Multipv white / black      : 1 / 2"));
    let pgn = fs::read_to_string(&out).unwrap();
    assert!(pgn.contains("\n1. e4 c5 *\n"), "{pgn}");
}

#[test]
fn silent_engine_is_abandoned_and_position_treated_as_terminal() {
    let fx = Fixture::new();
    let engine = fx.write("silent.sh", SILENT_ENGINE);
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");

    let mut cmd = bookmaker(&engine, &seed, &out, &["-d", "1", "-a", "10"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("treating position as terminal"))
        .stdout(predicate::str::contains("Unique lines written       : 1"));
    let pgn = fs::read_to_string(&out).unwrap();
    assert!(pgn.ends_with("\n\n*\n"), "{pgn}");
}

#[test]
fn garbage_engine_output_ends_the_branch() {
    let fx = Fixture::new();
    let engine = fx.write("garbage.sh", GARBAGE_ENGINE);
    let seed = fx.write("seed.pgn", "1. d4 *\n");
    let out = fx.path("book.pgn");

    let mut cmd = bookmaker(&engine, &seed, &out, &["-d", "3", "-a", "10"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Engine evaluations         : 1"));
    let pgn = fs::read_to_string(&out).unwrap();
    assert_eq!(pgn.matches("[Event ").count(), 1);
    assert!(pgn.ends_with("\n\n*\n"), "{pgn}");
}

fn recorded_commands(extra: &[&str]) -> Vec<String> {
    let fx = Fixture::new();
    let log = fx.path("commands.log");
    let script = RECORDING_ENGINE.replace("@LOG@", &log.to_string_lossy());
    let engine = fx.write("recording.sh", &script);
    let seed = fx.write("seed.pgn", "*\n");
    let out = fx.path("book.pgn");

    bookmaker(&engine, &seed, &out, extra).assert().success();
    fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn multipv_searches_get_extended_movetime() {
    let commands = recorded_commands(&["-d", "2", "-f", "3", "-g", "1", "-a", "40"]);
    assert_eq!(
        commands,
        vec![
            "setoption name MultiPV value 3",
            "go movetime 120",
            "setoption name MultiPV value 1",
            "go movetime 40",
        ]
    );
}

#[test]
fn scale_movetime_limits_extension_to_one_side() {
    let commands = recorded_commands(&[
        "-d", "1", "-f", "3", "-a", "40", "--scale-movetime", "black",
    ]);
    assert_eq!(commands, vec!["setoption name MultiPV value 3", "go movetime 40"]);
}
