//! On-disk persistence (§4.8, §6): `sessions.json` mirrors the registry so a restarted
//! daemon can resurrect or prune its children; `daemon.pid` pins the daemon to its
//! management port. Every write goes through a temp file + atomic rename so a crash
//! mid-write never leaves a torn file behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use silc_core::shell::ShellKind;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell_kind: ShellKind,
    pub cwd: Option<PathBuf>,
    pub created_at: u64,
    pub last_access: u64,
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

pub fn sessions_manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join("sessions.json")
}

pub fn pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("daemon.pid")
}

/// Rewrite `sessions.json` with the current registry snapshot. Logged, non-fatal on
/// failure (§7: "registry persistence errors are logged and do not block the in-memory
/// mutation").
pub fn write_sessions_manifest(data_dir: &Path, entries: &[ManifestEntry]) {
    let path = sessions_manifest_path(data_dir);
    match serde_json::to_vec_pretty(entries) {
        Ok(bytes) => {
            if let Err(e) = atomic_write(&path, &bytes) {
                warn!(error = %e, path = %path.display(), "failed to persist sessions manifest");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize sessions manifest"),
    }
}

pub fn read_sessions_manifest(data_dir: &Path) -> Vec<ManifestEntry> {
    let path = sessions_manifest_path(data_dir);
    match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// Write `daemon.pid` as `<pid>\n<start_epoch>\n` (§6).
pub fn write_pid_file(data_dir: &Path, pid: u32) -> std::io::Result<()> {
    let start_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let contents = format!("{pid}\n{start_epoch}\n");
    atomic_write(&pid_file_path(data_dir), contents.as_bytes())
}

pub fn read_pid_file(data_dir: &Path) -> Option<(u32, u64)> {
    let contents = fs::read_to_string(pid_file_path(data_dir)).ok()?;
    let mut lines = contents.lines();
    let pid: u32 = lines.next()?.trim().parse().ok()?;
    let start_epoch: u64 = lines.next()?.trim().parse().ok()?;
    Some((pid, start_epoch))
}

pub fn remove_pid_file(data_dir: &Path) {
    let _ = fs::remove_file(pid_file_path(data_dir));
}

/// True if a process with `pid` currently exists — a zero-signal `kill` probe, used to
/// tell a live daemon holding `daemon.pid` apart from a stale file left by a crash (§9).
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sessions_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![ManifestEntry {
            port: 20000,
            name: "bold-otter".into(),
            session_id: "abc123".into(),
            shell_kind: ShellKind::Bash,
            cwd: None,
            created_at: 1,
            last_access: 2,
        }];
        write_sessions_manifest(dir.path(), &entries);
        let read_back = read_sessions_manifest(dir.path());
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].name, "bold-otter");
    }

    #[test]
    fn missing_manifest_yields_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_sessions_manifest(dir.path()).is_empty());
    }

    #[test]
    fn pid_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_pid_file(dir.path(), 4242).unwrap();
        let (pid, epoch) = read_pid_file(dir.path()).unwrap();
        assert_eq!(pid, 4242);
        assert!(epoch > 0);
    }

    #[test]
    #[cfg(unix)]
    fn pid_is_alive_true_for_self_false_for_unused_pid() {
        assert!(pid_is_alive(std::process::id()));
        // Not a guaranteed-unused pid on every system, but pid_t::MAX is never a live
        // process in practice.
        assert!(!pid_is_alive(i32::MAX as u32));
    }
}
