//! Global config singleton, loaded once from the environment.
//! `ensure_loaded()` follows the same get-or-init shape as before: the first caller
//! does the work, later callers get the same instance.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Daemon management API port. Default 19999.
pub const DEFAULT_DAEMON_PORT: u16 = 19999;
/// Session port range, inclusive. Default [20000, 21000].
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 20000..=21000;
/// Idle TTL before a session becomes GC-eligible, in seconds. Default 1800.
pub const DEFAULT_IDLE_TTL_SECS: u64 = 1800;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Cached config, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon_port: u16,
    pub port_range: RangeInclusive<u16>,
    pub idle_ttl_secs: u64,
    /// Shell override (`SILC_SHELL`). None = autodetect in `crate::shell`.
    pub shell_override: Option<String>,
    pub data_dir: PathBuf,
}

/// Ensure config is loaded (idempotent). Reads env vars on first call; returns the same instance afterwards.
pub fn ensure_loaded() -> &'static Config {
    CONFIG.get_or_init(load_from_env)
}

fn load_from_env() -> Config {
    let daemon_port = std::env::var("SILC_DAEMON_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_DAEMON_PORT);

    let port_range = std::env::var("SILC_PORT_RANGE")
        .ok()
        .and_then(|v| parse_port_range(&v))
        .unwrap_or(DEFAULT_PORT_RANGE);

    let idle_ttl_secs = std::env::var("SILC_IDLE_TTL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_IDLE_TTL_SECS);

    let shell_override = std::env::var("SILC_SHELL").ok().filter(|s| !s.is_empty());

    let data_dir = std::env::var("SILC_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(default_data_dir);

    Config {
        daemon_port,
        port_range,
        idle_ttl_secs,
        shell_override,
        data_dir,
    }
}

/// Parse "20000-21000" into an inclusive range. Returns None on malformed input (falls back to default).
fn parse_port_range(s: &str) -> Option<RangeInclusive<u16>> {
    let (low, high) = s.trim().split_once('-')?;
    let low: u16 = low.trim().parse().ok()?;
    let high: u16 = high.trim().parse().ok()?;
    if low > high {
        return None;
    }
    Some(low..=high)
}

/// Default data dir: `~/.silc/` on POSIX, `%APPDATA%/silc/` on Windows.
fn default_data_dir() -> PathBuf {
    #[cfg(windows)]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("silc")
    }
    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".silc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_range() {
        assert_eq!(parse_port_range("20000-21000"), Some(20000..=21000));
        assert_eq!(parse_port_range(" 100 - 200 "), Some(100..=200));
    }

    #[test]
    fn rejects_malformed_range() {
        assert_eq!(parse_port_range("not-a-range"), None);
        assert_eq!(parse_port_range("500-100"), None);
    }
}
