//! GC loop (§4.8): every 60s, probe each registered session's own `/status` and apply the
//! idleness test of §4.5; close (and unregister) those that qualify.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::manifest::{self, ManifestEntry};
use crate::registry::Registry;
use crate::session_client;

const GC_TICK: Duration = Duration::from_secs(60);

pub fn spawn(
    registry: Arc<Registry>,
    idle_ttl: Duration,
    data_dir: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(GC_TICK).await;
            run_once(&registry, idle_ttl, &data_dir).await;
        }
    })
}

async fn run_once(registry: &Registry, idle_ttl: Duration, data_dir: &std::path::Path) {
    let mut collected = 0u32;
    for entry in registry.all() {
        let status = match session_client::probe_status(entry.port).await {
            Some(s) => s,
            None => {
                warn!(port = entry.port, "gc: session unreachable, pruning");
                registry.remove(entry.port);
                collected += 1;
                continue;
            }
        };
        let idle_for = Duration::from_secs(status.idle_seconds);
        let busy =
            idle_for < idle_ttl || status.has_children || status.run_locked || status.has_subscribers;
        if !busy {
            info!(port = entry.port, session_id = %entry.session_id, "gc: closing idle session");
            session_client::request_close(entry.port).await;
            registry.remove(entry.port);
            collected += 1;
        }
    }
    if collected > 0 {
        persist(registry, data_dir);
        info!(collected, "gc tick complete");
    }
}

/// Rewrite the manifest from the current registry snapshot (§4.8 "rewritten on every
/// registry mutation").
pub fn persist(registry: &Registry, data_dir: &std::path::Path) {
    let entries: Vec<ManifestEntry> = registry
        .all()
        .into_iter()
        .map(|e| ManifestEntry {
            port: e.port,
            name: e.name,
            session_id: e.session_id,
            shell_kind: e.shell_kind,
            cwd: e.cwd,
            created_at: e.created_at,
            last_access: e.created_at,
        })
        .collect();
    manifest::write_sessions_manifest(data_dir, &entries);
}
