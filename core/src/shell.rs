//! Shell profile (C4): detection, sentinel-injection template, and prompt-recognition regex
//! for each supported shell family. A tagged variant per §9's design note — not open
//! inheritance. Adding a shell is a new `ShellKind` arm plus its two methods below.

use once_cell::sync::Lazy;
use regex::Regex;

/// Shell families the PTY adapter knows how to spawn and whose output it can parse for
/// the synchronous `run` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Zsh,
    Sh,
    Cmd,
    Pwsh,
}

impl ShellKind {
    /// Detect the shell to use: explicit override, then platform env hints, then platform default.
    pub fn detect(explicit: Option<&str>) -> Self {
        if let Some(s) = explicit {
            if let Some(kind) = Self::from_name(s) {
                return kind;
            }
        }
        #[cfg(windows)]
        {
            if std::env::var_os("PSModulePath").is_some() {
                return ShellKind::Pwsh;
            }
            if std::env::var("COMSPEC").is_ok() {
                return ShellKind::Cmd;
            }
            return ShellKind::Cmd;
        }
        #[cfg(not(windows))]
        {
            if let Ok(shell_path) = std::env::var("SHELL") {
                if let Some(name) = shell_path.rsplit('/').next() {
                    if let Some(kind) = Self::from_name(name) {
                        return kind;
                    }
                }
            }
            ShellKind::Bash
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bash" => Some(ShellKind::Bash),
            "zsh" => Some(ShellKind::Zsh),
            "sh" => Some(ShellKind::Sh),
            "cmd" | "cmd.exe" => Some(ShellKind::Cmd),
            "pwsh" | "pwsh.exe" | "powershell" | "powershell.exe" => Some(ShellKind::Pwsh),
            _ => None,
        }
    }

    /// Executable name to spawn for this shell.
    pub fn program(&self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::Sh => "sh",
            ShellKind::Cmd => "cmd.exe",
            ShellKind::Pwsh => "pwsh",
        }
    }

    /// Argv appended after the program name to get an interactive login-ish shell.
    pub fn spawn_args(&self) -> &'static [&'static str] {
        match self {
            ShellKind::Bash => &["-l"],
            ShellKind::Zsh => &["-l"],
            ShellKind::Sh => &[],
            ShellKind::Cmd => &[],
            ShellKind::Pwsh => &["-NoLogo"],
        }
    }

    /// Text appended to a user command so a successful parse emits a sentinel line
    /// containing the ticket id and exit code.
    pub fn sentinel_suffix(&self, ticket_id: &str) -> String {
        match self {
            ShellKind::Bash | ShellKind::Zsh | ShellKind::Sh => {
                format!("; echo \"__SILC_DONE_{ticket_id}__:$?\"")
            }
            ShellKind::Pwsh => {
                format!("; echo \"__SILC_DONE_{ticket_id}__:$LASTEXITCODE\"")
            }
            ShellKind::Cmd => {
                format!(" & echo __SILC_DONE_{ticket_id}__:%ERRORLEVEL%")
            }
        }
    }

    /// Regex recognizing this shell's echoed prompt line, so `run` can discard prompt
    /// echoes that textually contain the sentinel marker.
    pub fn prompt_regex(&self) -> &'static Regex {
        match self {
            ShellKind::Bash => &BASH_PROMPT,
            ShellKind::Zsh => &ZSH_PROMPT,
            ShellKind::Sh => &SH_PROMPT,
            ShellKind::Cmd => &CMD_PROMPT,
            ShellKind::Pwsh => &PWSH_PROMPT,
        }
    }
}

static BASH_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\n]*[$#]\s*[^\n]*$").expect("bash prompt regex"));
static ZSH_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\n]*[%#]\s*[^\n]*$").expect("zsh prompt regex"));
static SH_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\n]*[$#]\s*[^\n]*$").expect("sh prompt regex"));
static CMD_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]:\\.*>").expect("cmd prompt regex"));
static PWSH_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PS [^>]*>\s*").expect("pwsh prompt regex"));

/// The wire-level sentinel line format emitted by the shell and consumed by the core (§6).
pub static SENTINEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*__SILC_DONE_[0-9a-f]{8}__:(-?\d+)\s*$").expect("sentinel line regex")
});

/// Build the anchored per-ticket sentinel matcher used by `Session::run` (§4.5 step 3).
pub fn ticket_sentinel_regex(ticket_id: &str) -> Regex {
    Regex::new(&format!(r"^\s*__SILC_DONE_{ticket_id}__:(-?\d+)"))
        .expect("ticket sentinel regex is well-formed: ticket_id is always 8 hex chars")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_sentinel_suffix_uses_dollar_question() {
        let s = ShellKind::Bash.sentinel_suffix("deadbeef");
        assert_eq!(s, "; echo \"__SILC_DONE_deadbeef__:$?\"");
    }

    #[test]
    fn pwsh_sentinel_suffix_uses_lastexitcode() {
        let s = ShellKind::Pwsh.sentinel_suffix("deadbeef");
        assert!(s.contains("$LASTEXITCODE"));
    }

    #[test]
    fn cmd_sentinel_suffix_uses_errorlevel_with_ampersand() {
        let s = ShellKind::Cmd.sentinel_suffix("deadbeef");
        assert!(s.starts_with(" & echo"));
        assert!(s.contains("%ERRORLEVEL%"));
    }

    #[test]
    fn ticket_regex_matches_only_its_own_id() {
        let re = ticket_sentinel_regex("deadbeef");
        assert!(re.is_match("__SILC_DONE_deadbeef__:0"));
        assert!(!re.is_match("__SILC_DONE_cafef00d__:0"));
    }

    #[test]
    fn sentinel_line_matches_expected_wire_format() {
        assert!(SENTINEL_LINE.is_match("__SILC_DONE_deadbeef__:0"));
        assert!(SENTINEL_LINE.is_match("  __SILC_DONE_deadbeef__:-1  "));
        assert!(!SENTINEL_LINE.is_match("echo __SILC_DONE_deadbeef__:0 trailing junk"));
    }

    #[test]
    fn detect_falls_back_to_explicit_override() {
        assert_eq!(ShellKind::detect(Some("zsh")), ShellKind::Zsh);
        assert_eq!(ShellKind::detect(Some("pwsh")), ShellKind::Pwsh);
    }
}
