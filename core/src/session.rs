//! Session (C5): owns one PTY + buffer, runs the read pump and fan-out, serializes input,
//! and implements the synchronous `run` protocol that turns the streaming shell into a
//! request/response RPC via injected sentinels (§4.5).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::RngCore;
use regex::Regex;
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};

use crate::buffer::StreamBuffer;
use crate::cleaner;
use crate::error::{Result, SilcError};
use crate::pty::PtyHandle;
use crate::shell::{ticket_sentinel_regex, ShellKind, SENTINEL_LINE};

/// Live-output broadcast capacity (messages buffered per subscriber before lag).
pub const LIVE_BROADCAST_CAP: usize = 256;
/// How often `run` polls the buffer for the sentinel line while waiting.
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Brief hold on `input_mutex` after a write, to prevent byte-interleaving between
/// independently-writing clients (§4.5, §5).
const INPUT_HOLD: Duration = Duration::from_millis(100);
/// Default deadline for `run` when the caller doesn't specify one (§5).
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `alive -> closing -> dead`. No transition back. Operations on `closing`/`dead` fail
/// with `SessionGone` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Alive,
    Closing,
    Dead,
}

/// Outcome of a `run` call (§7 error taxonomy: Busy/Timeout are not Rust errors, they are
/// valid successful-request outcomes carried in this enum).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed { output: String, exit_code: i64 },
    Timeout { output: String },
}

/// Drop the shell's echoed command/sentinel line(s) from a `run` result before cleaning
/// (§8 "Run sentinel correctness"): a line is noise if it's a prompt echo, or if it
/// contains this ticket's marker (the injected `cmd; echo "__SILC_DONE_<id>__:$?"` line
/// as typed back by the PTY), or if it's a bare sentinel line from an earlier, already
/// timed-out `run` still sitting in the buffer.
fn filter_run_noise(lines: &[String], ticket_marker: &str, prompt_re: &Regex) -> Vec<String> {
    lines
        .iter()
        .filter(|line| {
            let stripped = cleaner::strip_ansi(line);
            let trimmed = stripped.trim_start();
            !(prompt_re.is_match(trimmed)
                || trimmed.contains(ticket_marker)
                || SENTINEL_LINE.is_match(trimmed))
        })
        .cloned()
        .collect()
}

/// Minimal hex encode so a four-byte random ticket id doesn't need a whole crate.
fn gen_ticket_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One PTY-backed session. Exclusively owns its PTY, buffer, input lock, and run ticket;
/// the registry and any WebSocket subscribers hold only shared references.
pub struct Session {
    pub session_id: String,
    pub name: String,
    pub port: u16,
    pub shell_kind: ShellKind,
    pub cwd: Option<PathBuf>,
    pub created_at: u64,
    pub token: String,

    pty: PtyHandle,
    buffer: Arc<StreamBuffer>,
    live_tx: broadcast::Sender<Bytes>,

    input_mutex: AsyncMutex<()>,
    run_mutex: AsyncMutex<()>,

    last_access: AtomicU64,
    last_output: AtomicU64,
    status: RwLock<SessionStatus>,
    subscriber_count: AtomicUsize,
}

impl Session {
    /// Spawn a new session: open the PTY, launch the read pump, and return the session
    /// ready to serve requests. `rows`/`cols` are the initial PTY size.
    pub fn spawn(
        session_id: String,
        name: String,
        port: u16,
        shell_kind: ShellKind,
        cwd: Option<PathBuf>,
        token: String,
        rows: u16,
        cols: u16,
    ) -> Result<Arc<Self>> {
        let (pty, mut rx) = PtyHandle::spawn(shell_kind, rows, cols, cwd.clone())?;
        let buffer = Arc::new(StreamBuffer::new());
        let (live_tx, _) = broadcast::channel::<Bytes>(LIVE_BROADCAST_CAP);
        let now = now_unix();

        let session = Arc::new(Session {
            session_id,
            name,
            port,
            shell_kind,
            cwd,
            created_at: now,
            token,
            pty,
            buffer,
            live_tx,
            input_mutex: AsyncMutex::new(()),
            run_mutex: AsyncMutex::new(()),
            last_access: AtomicU64::new(now),
            last_output: AtomicU64::new(now),
            status: RwLock::new(SessionStatus::Alive),
            subscriber_count: AtomicUsize::new(0),
        });

        let pump_session = Arc::clone(&session);
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                // Buffer first, broadcast second — a lagging subscriber never loses
                // history, only live fan-out (§4.5 "never silently swallows data").
                pump_session.buffer.append_raw(&chunk);
                pump_session.buffer.append(&chunk);
                pump_session
                    .last_output
                    .store(now_unix(), Ordering::Relaxed);
                let _ = pump_session.live_tx.send(Bytes::from(chunk));
            }
            let mut status = pump_session.status.write().await;
            if *status == SessionStatus::Alive {
                info!(session = %pump_session.session_id, "pty eof, closing session");
                *status = SessionStatus::Closing;
            }
        });

        Ok(session)
    }

    fn touch_access(&self) {
        self.last_access.store(now_unix(), Ordering::Relaxed);
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    async fn require_alive(&self) -> Result<()> {
        if *self.status.read().await != SessionStatus::Alive {
            return Err(SilcError::SessionGone);
        }
        Ok(())
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn last_output(&self) -> u64 {
        self.last_output.load(Ordering::Relaxed)
    }

    pub fn buffer(&self) -> Arc<StreamBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        self.live_tx.subscribe()
    }

    pub fn unsubscribe(&self) {
        self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    pub fn run_locked(&self) -> bool {
        self.run_mutex.try_lock().is_err()
    }

    /// OS process id of the shell child, if still known.
    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Approximation of "has descendant processes": full process-tree enumeration needs
    /// a system-wide process walk, so we treat the shell child itself still running as
    /// the busy signal. Covers the common case (a still-running foreground command);
    /// a backgrounded descendant outliving an exited shell falls outside this check.
    pub fn has_children(&self) -> bool {
        !self.pty.has_exited()
    }

    /// GC anchor predicate (§4.5, §8): true if the session must NOT be collected right now.
    pub fn is_busy(&self, idle_ttl: Duration) -> bool {
        let now = now_unix();
        let idle_for = now.saturating_sub(self.last_access().max(self.last_output()));
        idle_for < idle_ttl.as_secs()
            || self.has_children()
            || self.subscriber_count() > 0
            || self.run_locked()
    }

    /// Write bytes to the PTY, serialized through `input_mutex` with a brief hold to
    /// prevent interleaving between independently-writing clients (§4.5, §5).
    pub async fn write_input(&self, text: &str) -> Result<()> {
        self.require_alive().await?;
        let _guard = self.input_mutex.lock().await;
        self.pty.write(text.as_bytes()).map_err(|e| {
            warn!(session = %self.session_id, error = %e, "write_input failed");
            SilcError::SessionGone
        })?;
        tokio::time::sleep(INPUT_HOLD).await;
        self.touch_access();
        Ok(())
    }

    /// Snapshot the last `n` lines; cleaned unless `raw` is requested.
    pub async fn get_output(&self, n: usize, raw: bool) -> Result<String> {
        self.touch_access();
        let lines = self.buffer.get_last(n);
        let text = if raw {
            lines.join("\n")
        } else {
            cleaner::clean(&lines).join("\n")
        };
        Ok(text)
    }

    /// The synchronous `run` protocol (§4.5). Fails fast with `Busy` if another run is in
    /// flight; otherwise writes `cmd` with an injected sentinel suffix and polls the buffer
    /// until the sentinel line appears or `timeout` elapses.
    pub async fn run(&self, cmd: &str, timeout: Duration) -> Result<RunOutcome> {
        self.require_alive().await?;
        let _run_guard = self.run_mutex.try_lock().map_err(|_| SilcError::Busy)?;

        let ticket_id = gen_ticket_id();
        let suffix = self.shell_kind.sentinel_suffix(&ticket_id);
        let full = format!("{cmd}{suffix}\n");
        let start_cursor = self.buffer.cursor();

        {
            let _input_guard = self.input_mutex.lock().await;
            self.pty.write(full.as_bytes()).map_err(|e| {
                warn!(session = %self.session_id, error = %e, "run: write failed");
                SilcError::SessionGone
            })?;
        }
        self.touch_access();

        let sentinel_re = ticket_sentinel_regex(&ticket_id);
        let ticket_marker = format!("__SILC_DONE_{ticket_id}__");
        let prompt_re = self.shell_kind.prompt_regex();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let (lines, _cursor) = self.buffer.get_since(start_cursor);
            for (idx, line) in lines.iter().enumerate() {
                // Match after stripping ANSI/OSC noise and leading whitespace (§4.5 step
                // 3) — a themed prompt can wrap the sentinel echo in color codes.
                let ansi_stripped = cleaner::strip_ansi(line);
                let stripped = ansi_stripped.trim_start();
                // Discriminator (a): anchored ticket match at the start of the line.
                if let Some(caps) = sentinel_re.captures(stripped) {
                    // Discriminator (b): reject lines that are also prompt echoes unless
                    // the matched sentinel is literally the whole line — an echoed input
                    // line containing the command text plus the marker should not count.
                    if prompt_re.is_match(stripped) && stripped != caps.get(0).unwrap().as_str() {
                        continue;
                    }
                    let exit_code: i64 = caps
                        .get(1)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(-1);
                    let output_lines =
                        filter_run_noise(&lines[..idx], &ticket_marker, prompt_re);
                    let cleaned = cleaner::clean(&output_lines).join("\n");
                    return Ok(RunOutcome::Completed {
                        output: cleaned,
                        exit_code,
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let (lines, _) = self.buffer.get_since(start_cursor);
                let output_lines = filter_run_noise(&lines, &ticket_marker, prompt_re);
                let cleaned = cleaner::clean(&output_lines).join("\n");
                return Ok(RunOutcome::Timeout { output: cleaned });
            }
            tokio::time::sleep(RUN_POLL_INTERVAL).await;
        }
    }

    /// Write Ctrl-C (0x03) to the PTY. Does not touch `run_mutex` — a caller may unblock a
    /// hung `run` that has not yet timed out (§4.5).
    pub async fn interrupt(&self) -> Result<()> {
        self.require_alive().await?;
        self.pty.write(&[0x03])?;
        self.touch_access();
        Ok(())
    }

    pub async fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.require_alive().await?;
        self.pty.resize(rows, cols)?;
        self.touch_access();
        Ok(())
    }

    pub async fn signal_term(&self) -> Result<()> {
        self.pty.signal_term()?;
        self.touch_access();
        Ok(())
    }

    pub async fn signal_kill(&self) -> Result<()> {
        self.pty.signal_kill()?;
        self.touch_access();
        Ok(())
    }

    pub fn clear_buffer(&self) {
        self.buffer.clear();
    }

    /// Transition `alive -> closing -> dead` and kill the child. Idempotent.
    pub async fn close(&self) {
        {
            let mut status = self.status.write().await;
            if *status == SessionStatus::Dead {
                return;
            }
            *status = SessionStatus::Closing;
        }
        let _ = self.pty.signal_term();
        let mut status = self.status.write().await;
        *status = SessionStatus::Dead;
        info!(session = %self.session_id, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_is_eight_hex_chars() {
        let id = gen_ticket_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn filter_run_noise_drops_echoed_command_and_keeps_output() {
        let prompt_re = ShellKind::Bash.prompt_regex();
        let lines = vec![
            "echo hello; echo \"__SILC_DONE_deadbeef__:$?\"".to_string(),
            "hello".to_string(),
        ];
        let filtered = filter_run_noise(&lines, "__SILC_DONE_deadbeef__", prompt_re);
        assert_eq!(filtered, vec!["hello".to_string()]);
    }

    #[test]
    fn filter_run_noise_drops_stale_sentinel_line() {
        let prompt_re = ShellKind::Bash.prompt_regex();
        let lines = vec![
            "__SILC_DONE_cafef00d__:0".to_string(),
            "hello".to_string(),
        ];
        let filtered = filter_run_noise(&lines, "__SILC_DONE_deadbeef__", prompt_re);
        assert_eq!(filtered, vec!["hello".to_string()]);
    }
}
