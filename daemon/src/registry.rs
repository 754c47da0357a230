//! Registry & name allocator (C7): the in-memory `{port -> session}` map, name generation
//! with collision handling, and port allocation from the configured range.
//!
//! Sessions run as detached worker processes (see `worker.rs`), so the registry only
//! holds metadata plus a thin HTTP handle (`session_client`) — it never owns a PTY
//! directly. That is what lets a daemon restart resurrect sessions instead of killing
//! them (§8 Resurrection).

use std::net::{SocketAddr, TcpListener};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Mutex;

use dashmap::DashMap;
use rand::RngCore;
use silc_core::error::{Result, SilcError};
use silc_core::shell::ShellKind;

const MAX_NAME_ATTEMPTS: u32 = 64;

const ADJECTIVES: &[&str] = &[
    "bold", "quiet", "amber", "brisk", "calm", "dusty", "eager", "faint", "gentle", "hollow",
    "icy", "jolly", "keen", "lively", "misty", "noble", "olive", "plain", "quick", "rusty",
    "sly", "tidy", "urban", "vivid", "warm", "young", "zesty", "coral", "dim", "fuzzy",
];
const NOUNS: &[&str] = &[
    "otter", "falcon", "cedar", "delta", "ember", "fern", "gull", "heron", "iris", "jasper",
    "koala", "lynx", "maple", "newt", "oak", "pike", "quail", "raven", "swan", "teal",
    "urchin", "vole", "willow", "xerus", "yak", "zebra", "birch", "crane", "dune", "elm",
];

/// One live entry: the metadata the daemon needs without owning the session's process.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell_kind: ShellKind,
    pub cwd: Option<PathBuf>,
    pub created_at: u64,
    pub token: String,
}

/// `{port -> entry}` with a name index for uniqueness checks and an insertion-order list
/// for deterministic shutdown iteration (§4.8 "Shutdown ordering").
pub struct Registry {
    sessions: DashMap<u16, RegistryEntry>,
    names: DashMap<String, u16>,
    order: Mutex<Vec<u16>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            names: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, entry: RegistryEntry) {
        self.names.insert(entry.name.clone(), entry.port);
        self.order
            .lock()
            .expect("registry order lock poisoned")
            .push(entry.port);
        self.sessions.insert(entry.port, entry);
    }

    pub fn get(&self, port: u16) -> Option<RegistryEntry> {
        self.sessions.get(&port).map(|e| e.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<RegistryEntry> {
        let port = *self.names.get(name)?;
        self.get(port)
    }

    pub fn remove(&self, port: u16) -> Option<RegistryEntry> {
        let entry = self.sessions.remove(&port).map(|(_, e)| e);
        if let Some(ref e) = entry {
            self.names.remove(&e.name);
            self.order
                .lock()
                .expect("registry order lock poisoned")
                .retain(|p| *p != port);
        }
        entry
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Snapshot of every live entry, in arbitrary order.
    pub fn all(&self) -> Vec<RegistryEntry> {
        self.sessions.iter().map(|e| e.clone()).collect()
    }

    /// Ports in the order they were registered — used for ordered graceful shutdown.
    pub fn ports_in_insertion_order(&self) -> Vec<u16> {
        self.order
            .lock()
            .expect("registry order lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate an explicit name against `^[a-z][a-z0-9-]{0,47}$` (§3).
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = name.len() <= 48
        && name[1.min(name.len())..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !first_ok || !rest_ok || name.is_empty() {
        return Err(SilcError::Validation(format!(
            "name {name:?} must match ^[a-z][a-z0-9-]{{0,47}}$"
        )));
    }
    Ok(())
}

/// Pick one random `<adjective>-<noun>` base name.
fn random_base_name() -> String {
    let mut seed_bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut seed_bytes);
    let seed = u32::from_le_bytes(seed_bytes) as usize;
    let adj = ADJECTIVES[seed % ADJECTIVES.len()];
    let noun = NOUNS[(seed / ADJECTIVES.len()) % NOUNS.len()];
    format!("{adj}-{noun}")
}

/// Try `base` bare, then `base-01`, `base-02`, ... on collision, up to
/// `MAX_NAME_ATTEMPTS` suffixed attempts (§4.7: one base name, not a new pair per retry).
fn allocate_name_with_base(registry: &Registry, base: &str) -> Result<String> {
    if !registry.name_taken(base) {
        return Ok(base.to_string());
    }
    for n in 1..MAX_NAME_ATTEMPTS {
        let candidate = format!("{base}-{n:02}");
        if !registry.name_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(SilcError::NameExhausted {
        attempts: MAX_NAME_ATTEMPTS,
    })
}

/// Resolve the name to use for a new session: validate+require-uniqueness for an explicit
/// name, or generate `<adjective>-<noun>` (then `-NN` on collision) otherwise (§4.7).
pub fn allocate_name(registry: &Registry, explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        validate_name(name)?;
        if registry.name_taken(name) {
            return Err(SilcError::Conflict(format!("name {name:?} already in use")));
        }
        return Ok(name.to_string());
    }

    allocate_name_with_base(registry, &random_base_name())
}

/// Probe-bind a port on loopback to check availability without holding the listener open.
fn port_is_free(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}

/// Scan `range` low->high for the first free port (§4.7).
pub fn allocate_port(range: RangeInclusive<u16>) -> Result<u16> {
    for port in range {
        if port_is_free(port) {
            return Ok(port);
        }
    }
    Err(SilcError::PortsExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_kebab_case() {
        assert!(validate_name("bold-otter").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn validate_name_rejects_leading_digit() {
        assert!(validate_name("1abc").is_err());
    }

    #[test]
    fn validate_name_rejects_uppercase() {
        assert!(validate_name("Bold").is_err());
    }

    #[test]
    fn allocate_port_finds_a_free_port_in_a_wide_range() {
        let port = allocate_port(40000..=40050).expect("should find a free port");
        assert!((40000..=40050).contains(&port));
    }

    #[test]
    fn allocate_port_exhausts_a_single_port_range_once_bound() {
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let err = allocate_port(port..=port).unwrap_err();
        assert!(matches!(err, SilcError::PortsExhausted));
    }

    #[test]
    fn allocate_name_with_base_returns_bare_base_when_free() {
        let registry = Registry::new();
        assert_eq!(
            allocate_name_with_base(&registry, "bold-otter").unwrap(),
            "bold-otter"
        );
    }

    #[test]
    fn allocate_name_with_base_suffixes_same_base_on_collision() {
        let registry = Registry::new();
        registry.insert(RegistryEntry {
            port: 1,
            name: "bold-otter".into(),
            session_id: "s1".into(),
            shell_kind: ShellKind::Bash,
            cwd: None,
            created_at: 0,
            token: "t1".into(),
        });
        assert_eq!(
            allocate_name_with_base(&registry, "bold-otter").unwrap(),
            "bold-otter-01"
        );

        registry.insert(RegistryEntry {
            port: 2,
            name: "bold-otter-01".into(),
            session_id: "s2".into(),
            shell_kind: ShellKind::Bash,
            cwd: None,
            created_at: 0,
            token: "t2".into(),
        });
        assert_eq!(
            allocate_name_with_base(&registry, "bold-otter").unwrap(),
            "bold-otter-02"
        );
    }

    #[test]
    fn registry_tracks_insertion_order() {
        let registry = Registry::new();
        registry.insert(RegistryEntry {
            port: 1,
            name: "a".into(),
            session_id: "s1".into(),
            shell_kind: ShellKind::Bash,
            cwd: None,
            created_at: 0,
            token: "t1".into(),
        });
        registry.insert(RegistryEntry {
            port: 2,
            name: "b".into(),
            session_id: "s2".into(),
            shell_kind: ShellKind::Bash,
            cwd: None,
            created_at: 0,
            token: "t2".into(),
        });
        assert_eq!(registry.ports_in_insertion_order(), vec![1, 2]);
        registry.remove(1);
        assert_eq!(registry.ports_in_insertion_order(), vec![2]);
        assert!(!registry.name_taken("a"));
    }
}
