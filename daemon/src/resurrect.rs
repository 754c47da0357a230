//! Resurrection (§4.8, §8): on startup, read the manifest and probe each entry's port.
//! A matching `session_id` means the worker survived the restart and is re-adopted;
//! anything else (no answer, mismatched id) is pruned from the manifest.

use std::path::Path;

use tracing::{info, warn};

use crate::manifest;
use crate::registry::{Registry, RegistryEntry};
use crate::session_client;

pub async fn resurrect(registry: &Registry, data_dir: &Path) {
    let entries = manifest::read_sessions_manifest(data_dir);
    if entries.is_empty() {
        return;
    }
    let mut adopted = 0u32;
    let mut pruned = 0u32;
    for entry in entries {
        match session_client::probe_status(entry.port).await {
            Some(status) if status.session_id == entry.session_id => {
                info!(port = entry.port, name = %entry.name, "resurrected session");
                registry.insert(RegistryEntry {
                    port: entry.port,
                    name: entry.name,
                    session_id: entry.session_id,
                    shell_kind: entry.shell_kind,
                    cwd: entry.cwd,
                    created_at: entry.created_at,
                    token: String::new(),
                });
                adopted += 1;
            }
            _ => {
                warn!(port = entry.port, name = %entry.name, "pruning stale manifest entry");
                pruned += 1;
            }
        }
    }
    info!(adopted, pruned, "resurrection complete");
    crate::gc::persist(registry, data_dir);
}
