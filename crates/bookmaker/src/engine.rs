use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use shakmaty::{Chess, Color, Position};

use crate::config::MovetimeScaling;
use crate::position::{parse_uci_move, to_fen, uci_of};
use crate::types::{Candidate, InfoLine, duration_to_millis, parse_info_line, side_label};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// movetime を過ぎてから `stop` を送るまでの猶予
pub const SEARCH_STOP_MARGIN: Duration = Duration::from_millis(1000);
/// `stop` 後に bestmove を待つ時間
pub const SEARCH_ABANDON_MARGIN: Duration = Duration::from_millis(2000);

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub threads: usize,
    pub hash_mb: u32,
    /// 追加の UCI オプション (Name=Value 形式)
    pub uci_options: Vec<String>,
    pub scaling: MovetimeScaling,
}

/// 局面を渡して上位 multipv 手の候補を得る能力。
///
/// 探索側はこの trait だけを通してエンジンに触る。
pub trait Analyzer {
    /// 返す候補は順位順（最善が先頭）で、長さは `multipv` 以下。
    /// 候補が得られなかった場合は空を返し、続行不能な障害のみ `Err` にする。
    fn evaluate(&mut self, pos: &Chess, multipv: u32, movetime_ms: u64) -> Result<Vec<Candidate>>;
}

/// multipv > 1 かつ手番側にスケーリングが有効なら movetime × multipv。
pub fn effective_movetime(
    movetime_ms: u64,
    multipv: u32,
    side: Color,
    scaling: MovetimeScaling,
) -> u64 {
    if multipv > 1 && scaling.applies_to(side) {
        movetime_ms.saturating_mul(u64::from(multipv))
    } else {
        movetime_ms
    }
}

/// 1本の UCI エンジンに対する入出力をカプセル化する。
///
/// 探索要求は常に1つだけ。Drop 時に `quit` を送り、応答がなければ kill して回収する。
pub struct EngineSession {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    scaling: MovetimeScaling,
    /// 直近に送った MultiPV
    multipv: Option<u32>,
    /// 前回の探索で bestmove を受け取れていない
    desynced: bool,
    /// readyok や取り残された bestmove を待つ上限
    ready_timeout: Duration,
    evaluations: u64,
    pub name: String,
}

impl EngineSession {
    pub fn spawn(cfg: &EngineConfig) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn engine at {}", cfg.path.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut session = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            scaling: cfg.scaling,
            multipv: None,
            desynced: false,
            ready_timeout: ENGINE_READY_TIMEOUT,
            evaluations: 0,
            name: cfg
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        session
            .initialize(cfg)
            .with_context(|| format!("failed to initialize engine {}", cfg.path.display()))?;
        Ok(session)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(self.ready_timeout)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if let Some(name) = line.strip_prefix("id name ") {
                self.name = name.trim().to_string();
            } else if line.trim() == "uciok" {
                break;
            }
        }
        self.set_option_if_available("Hash", &cfg.hash_mb.to_string())?;
        self.set_option_if_available("Threads", &cfg.threads.to_string())?;
        for opt in &cfg.uci_options {
            if let Some((name, value)) = opt.split_once('=') {
                self.set_option_if_available(name.trim(), value.trim())?;
            }
        }
        self.sync_ready()?;
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn search(&mut self, pos: &Chess, multipv: u32, movetime_ms: u64) -> Result<Vec<Candidate>> {
        if self.desynced {
            // readyok は探索終了を意味しないので、先に打ち切った探索の bestmove を待つ
            self.finish_abandoned_search()?;
            self.sync_ready()?;
            self.desynced = false;
        }
        if self.multipv != Some(multipv) {
            self.write_line(&format!("setoption name MultiPV value {multipv}"))?;
            self.multipv = Some(multipv);
        }
        let side = pos.turn();
        let budget = effective_movetime(movetime_ms, multipv, side, self.scaling);
        let fen = to_fen(pos);
        self.write_line(&format!("position fen {fen}"))?;
        self.write_line(&format!("go movetime {budget}"))?;
        self.evaluations += 1;

        let start = Instant::now();
        let soft_limit = Duration::from_millis(budget) + SEARCH_STOP_MARGIN;
        let hard_limit = soft_limit + SEARCH_ABANDON_MARGIN;
        let mut stop_sent = false;
        let mut lines: BTreeMap<u32, InfoLine> = BTreeMap::new();

        loop {
            let elapsed = start.elapsed();
            let deadline = if stop_sent { hard_limit } else { soft_limit };
            if elapsed >= deadline {
                if !stop_sent {
                    self.write_line("stop")?;
                    stop_sent = true;
                    continue;
                }
                warn!(
                    "{}: no bestmove within {} ms for {fen}; treating position as terminal",
                    self.name,
                    duration_to_millis(elapsed)
                );
                self.desynced = true;
                return Ok(Vec::new());
            }

            match self.rx.recv_timeout(deadline.saturating_sub(elapsed)) {
                Ok(line) => {
                    if let Some(info) = parse_info_line(&line) {
                        if info.bound || info.score.is_none() || info.pv.is_empty() {
                            continue;
                        }
                        let rank = info.multipv.unwrap_or(1);
                        if (1..=multipv).contains(&rank) {
                            lines.insert(rank, info);
                        }
                        continue;
                    }
                    if line.starts_with("bestmove") {
                        debug!(
                            "{} {}: {} lines in {} ms ({fen})",
                            self.name,
                            side_label(side),
                            lines.len(),
                            duration_to_millis(start.elapsed())
                        );
                        for (rank, info) in &lines {
                            debug!(
                                "  multipv {rank}: depth {}/{} nodes {} pv {}",
                                opt_display(info.depth),
                                opt_display(info.seldepth),
                                opt_display(info.nodes),
                                info.pv.join(" ")
                            );
                        }
                        return Ok(collect_candidates(pos, lines));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("{}: engine exited unexpectedly", self.name);
                }
            }
        }
    }

    /// 打ち切った探索の `bestmove` まで読み捨てる。来なければ続行不能。
    fn finish_abandoned_search(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(line) if line.starts_with("bestmove") => return Ok(()),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => bail!(
                    "{}: abandoned search did not return bestmove within {} ms",
                    self.name,
                    duration_to_millis(self.ready_timeout)
                ),
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("{}: engine exited unexpectedly", self.name)
                }
            }
        }
    }

    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(self.ready_timeout)?;
            if line.trim() == "readyok" {
                break;
            }
        }
        Ok(())
    }

    pub fn recv_line(&self, timeout: Duration) -> Result<String> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => anyhow!("{}: engine read timeout", self.name),
            RecvTimeoutError::Disconnected => anyhow!("{}: engine exited unexpectedly", self.name),
        })
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {name} value {value}"))?;
        } else {
            warn!("{}: option '{name}' not supported, skipped", self.name);
        }
        Ok(())
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        self.stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .with_context(|| format!("{}: failed to write '{msg}' to engine", self.name))
    }
}

impl Analyzer for EngineSession {
    fn evaluate(&mut self, pos: &Chess, multipv: u32, movetime_ms: u64) -> Result<Vec<Candidate>> {
        self.search(pos, multipv, movetime_ms)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// 順位ごとの最終 info 行を候補手に変換する。
///
/// PV の先頭手が解釈できない・非合法なものは捨てる。
pub fn collect_candidates(pos: &Chess, lines: BTreeMap<u32, InfoLine>) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(lines.len());
    for (rank, info) in lines {
        let Some(score) = info.score else { continue };
        let Some(first) = info.pv.first() else { continue };
        match parse_uci_move(pos, first) {
            Ok(mv) => out.push(Candidate {
                uci: uci_of(&mv),
                mv,
                score,
                rank,
                depth: info.depth,
                pv: info.pv,
            }),
            Err(e) => warn!("dropping multipv {rank} ({score}): {e:#}"),
        }
    }
    out
}

fn opt_display<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Score;

    fn info(line: &str) -> InfoLine {
        parse_info_line(line).unwrap()
    }

    #[test]
    fn movetime_scales_only_for_enabled_sides() {
        assert_eq!(effective_movetime(1000, 1, Color::White, MovetimeScaling::Both), 1000);
        assert_eq!(effective_movetime(1000, 3, Color::White, MovetimeScaling::Both), 3000);
        assert_eq!(effective_movetime(1000, 3, Color::White, MovetimeScaling::Black), 1000);
        assert_eq!(effective_movetime(1000, 3, Color::Black, MovetimeScaling::Black), 3000);
        assert_eq!(effective_movetime(1000, 4, Color::Black, MovetimeScaling::None), 1000);
    }

    #[test]
    fn parse_option_name_handles_spaces() {
        assert_eq!(
            parse_option_name("name Clear Hash type button").as_deref(),
            Some("Clear Hash")
        );
        assert_eq!(
            parse_option_name("name Hash type spin default 16 min 1 max 33554432").as_deref(),
            Some("Hash")
        );
        assert_eq!(parse_option_name("type spin"), None);
    }

    #[test]
    fn collect_candidates_orders_by_rank_and_drops_illegal_moves() {
        let pos = Chess::default();
        let mut lines = BTreeMap::new();
        lines.insert(3, info("info depth 12 multipv 3 score cp 5 pv g1f3 d7d5"));
        lines.insert(1, info("info depth 12 multipv 1 score cp 30 pv e2e4 e7e5"));
        lines.insert(2, info("info depth 12 multipv 2 score cp 20 pv e2e5"));
        let cands = collect_candidates(&pos, lines);
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].uci, "e2e4");
        assert_eq!(cands[0].rank, 1);
        assert_eq!(cands[0].score, Score::Cp(30));
        assert_eq!(cands[0].depth, Some(12));
        assert_eq!(cands[1].uci, "g1f3");
        assert_eq!(cands[1].rank, 3);
        assert_eq!(cands[1].pv, vec!["g1f3", "d7d5"]);
    }

    #[cfg(unix)]
    fn spawn_script(script: &str) -> (tempfile::TempDir, EngineSession) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sh");
        std::fs::write(&path, script).unwrap();
        let cfg = EngineConfig {
            path: PathBuf::from("/bin/sh"),
            args: vec![path.to_string_lossy().into_owned()],
            threads: 1,
            hash_mb: 16,
            uci_options: Vec::new(),
            scaling: MovetimeScaling::Both,
        };
        let session = EngineSession::spawn(&cfg).unwrap();
        (dir, session)
    }

    /// 1回目の go には 4 秒後に別プロセスから答え、isready には即答するエンジン。
    #[cfg(unix)]
    const LAGGY_ENGINE: &str = r#"
n=0
while IFS= read -r line; do
  case "$line" in
    uci) echo "id name Laggy"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      n=$((n+1))
      if [ "$n" -eq 1 ]; then
        (sleep 4; echo "info depth 5 multipv 1 score cp 900 pv g1f3"; echo "bestmove g1f3") &
      else
        echo "info depth 5 multipv 1 score cp 10 pv e2e4"
        echo "bestmove e2e4"
      fi ;;
    quit) exit 0 ;;
  esac
done
"#;

    #[cfg(unix)]
    #[test]
    fn abandoned_search_is_drained_before_next_request() {
        let (_dir, mut session) = spawn_script(LAGGY_ENGINE);
        assert_eq!(session.name, "Laggy");
        let pos = Chess::default();

        let start = Instant::now();
        let first = session.evaluate(&pos, 1, 10).unwrap();
        assert!(first.is_empty());
        assert!(start.elapsed() >= SEARCH_STOP_MARGIN + SEARCH_ABANDON_MARGIN);

        for _ in 0..2 {
            let cands = session.evaluate(&pos, 1, 10).unwrap();
            assert_eq!(cands.len(), 1);
            assert_eq!(cands[0].uci, "e2e4");
            assert_eq!(cands[0].score, Score::Cp(10));
        }
        assert_eq!(session.evaluations(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn missing_stale_bestmove_is_fatal() {
        let script = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    quit) exit 0 ;;
  esac
done
"#;
        let (_dir, mut session) = spawn_script(script);
        session.ready_timeout = Duration::from_millis(300);
        let pos = Chess::default();
        assert!(session.evaluate(&pos, 1, 10).unwrap().is_empty());
        let err = session.evaluate(&pos, 1, 10).unwrap_err();
        assert!(err.to_string().contains("did not return bestmove"), "{err:#}");
    }

    #[cfg(unix)]
    #[test]
    fn malformed_output_yields_no_candidates() {
        let script = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      echo "info depth x score cp abc pv"
      echo "info multipv 1 score mate pv"
      echo "complete nonsense"
      echo "info multipv 1 score cp 20 pv z9z9"
      echo "bestmove e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;
        let (_dir, mut session) = spawn_script(script);
        let cands = session.evaluate(&Chess::default(), 2, 10).unwrap();
        assert!(cands.is_empty());
    }
}
