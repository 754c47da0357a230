//! Output cleaner (C3): a pure function over completed lines that strips ANSI/OSC escape
//! sequences, folds carriage-return overwrites, and collapses blank-line runs. Applied only
//! when a client asks for cleaned output (`?raw=false`); WebSocket and raw history stay
//! byte-exact (§4.3).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::shell::SENTINEL_LINE;

/// Matches CSI (`ESC [ ... final-byte`), OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`), and
/// other single-character ESC-led sequences in one pass.
static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b(\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(\x07|\x1b\\)|[@-Z\\-_])")
        .expect("ansi strip regex")
});

/// Strip ANSI/OSC/ESC noise from a single line, with no CR-folding or blank-line
/// collapsing. Callers that need ANSI-free text but must keep line structure intact
/// (e.g. sentinel matching in `Session::run`) use this directly instead of `clean`.
pub fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

/// Clean a single line: fold CR overwrites, then strip ANSI/OSC/ESC noise.
fn clean_line(line: &str) -> String {
    let after_cr = match line.rfind('\r') {
        Some(idx) => &line[idx + 1..],
        None => line,
    };
    strip_ansi(after_cr)
}

/// Clean a list of lines: per-line CR-fold + ANSI strip, drop any line that is itself a
/// run sentinel (leftover from a timed-out or previous `run` call), then collapse runs of
/// >= 2 blank lines down to one.
pub fn clean(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut last_was_blank = false;
    for line in lines {
        let cleaned = clean_line(line);
        if SENTINEL_LINE.is_match(&cleaned) {
            continue;
        }
        let is_blank = cleaned.is_empty();
        if is_blank && last_was_blank {
            continue;
        }
        out.push(cleaned.clone());
        last_was_blank = is_blank;
    }
    out
}

/// Convenience wrapper for a single already-joined string (splits, cleans, rejoins with `\n`).
pub fn clean_text(text: &str) -> String {
    let lines: Vec<String> = text.split('\n').map(|s| s.to_string()).collect();
    clean(&lines).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_sequences() {
        let lines = vec!["\x1b[31mred text\x1b[0m".to_string()];
        assert_eq!(clean(&lines), vec!["red text".to_string()]);
    }

    #[test]
    fn folds_carriage_return_overwrite() {
        let lines = vec!["progress: 10%\rprogress: 99%".to_string()];
        assert_eq!(clean(&lines), vec!["progress: 99%".to_string()]);
    }

    #[test]
    fn collapses_blank_line_runs() {
        let lines = vec![
            "a".to_string(),
            "".to_string(),
            "".to_string(),
            "".to_string(),
            "b".to_string(),
        ];
        assert_eq!(
            clean(&lines),
            vec!["a".to_string(), "".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn idempotent() {
        let lines = vec!["\x1b[1mhello\x1b[0m".to_string(), "world".to_string()];
        let once = clean(&lines);
        let twice = clean(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn round_trips_clean_input() {
        let lines = vec!["hello".to_string(), "world".to_string()];
        assert_eq!(clean(&lines), lines);
    }

    #[test]
    fn drops_leftover_sentinel_lines() {
        let lines = vec![
            "hello".to_string(),
            "__SILC_DONE_deadbeef__:0".to_string(),
            "world".to_string(),
        ];
        assert_eq!(clean(&lines), vec!["hello".to_string(), "world".to_string()]);
    }
}
