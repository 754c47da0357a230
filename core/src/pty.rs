//! PTY adapter (C1): cross-platform spawn/read/write/resize/kill of a shell child behind a
//! pseudo-terminal. Reads never fail on partial UTF-8 — bytes are opaque here; decoding is
//! `StreamBuffer`'s job. Child is wrapped in a Mutex so a dedicated thread can poll
//! `try_wait()` independently of the writer.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

use crate::error::{Result, SilcError};
use crate::shell::ShellKind;

const READ_CHUNK: usize = 4096;
/// Grace period between SIGTERM and SIGKILL on `signal_term` escalation (§4.1, §4.5).
const KILL_GRACE: std::time::Duration = std::time::Duration::from_millis(1500);

fn build_command(kind: ShellKind, cwd: Option<&PathBuf>) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(kind.program());
    for arg in kind.spawn_args() {
        cmd.arg(arg);
    }
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }
    cmd
}

/// A spawned PTY child: writer handle plus a handle to poll/kill the underlying process.
pub struct PtyHandle {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    master: Arc<Mutex<Box<dyn portable_pty::MasterPty + Send>>>,
}

impl PtyHandle {
    /// Spawn `kind` in a PTY of the given size, optionally in `cwd`. Returns the handle plus
    /// a receiver for raw output chunks (read pump runs on a dedicated OS thread — PTY reads
    /// are blocking on every supported platform).
    pub fn spawn(
        kind: ShellKind,
        rows: u16,
        cols: u16,
        cwd: Option<PathBuf>,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))?;

        let cmd = build_command(kind, cwd.as_ref());
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let handle = PtyHandle {
            writer: Arc::new(Mutex::new(writer)),
            child: Arc::new(Mutex::new(child)),
            master: Arc::new(Mutex::new(pair.master)),
        };
        Ok((handle, rx))
    }

    /// Write raw bytes to the PTY master. Atomic per call up to a small platform-defined
    /// chunk; callers must not assume atomicity for large writes (§4.1).
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SilcError::Io(std::io::Error::other("pty writer mutex poisoned")))?;
        guard.write_all(bytes)?;
        guard.flush()?;
        Ok(())
    }

    /// Resize the PTY (rows, cols). Delivers SIGWINCH on Unix via the underlying ioctl.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| SilcError::Io(std::io::Error::other("pty master mutex poisoned")))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))
    }

    /// SIGTERM the child, escalating to SIGKILL after `KILL_GRACE` if it's still alive.
    /// On Windows, `portable_pty`'s `Child::kill` already terminates the whole process tree
    /// (needed because ConPTY's conhost spawns descendants outside the direct child), so
    /// there is no separate "terminate gently" primitive there — we just kill.
    pub fn signal_term(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let pid = {
                let guard = self
                    .child
                    .lock()
                    .map_err(|_| SilcError::Io(std::io::Error::other("pty child mutex poisoned")))?;
                guard.process_id()
            };
            if let Some(pid) = pid {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            let child = Arc::clone(&self.child);
            std::thread::spawn(move || {
                std::thread::sleep(KILL_GRACE);
                if let Ok(mut guard) = child.lock() {
                    if matches!(guard.try_wait(), Ok(None)) {
                        let _ = guard.kill();
                    }
                }
            });
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.signal_kill()
        }
    }

    /// Immediately kill the child (and, on Windows, its whole process tree).
    pub fn signal_kill(&self) -> Result<()> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| SilcError::Io(std::io::Error::other("pty child mutex poisoned")))?;
        guard
            .kill()
            .map_err(|e| SilcError::Io(std::io::Error::other(e.to_string())))
    }

    /// True if the child has already exited.
    pub fn has_exited(&self) -> bool {
        match self.child.lock() {
            Ok(mut guard) => matches!(guard.try_wait(), Ok(Some(_))),
            Err(_) => true,
        }
    }

    /// OS process id of the child, if still known (platforms may not expose it post-exit).
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().ok().and_then(|g| g.process_id())
    }
}
