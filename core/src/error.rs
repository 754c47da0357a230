//! Error taxonomy shared by the session core and the daemon that hosts it.
//! Variants map 1:1 onto the HTTP status codes the daemon returns (see `silc-daemon::http_error`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SilcError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no free ports available in the configured range")]
    PortsExhausted,

    #[error("could not allocate a unique name after {attempts} attempts")]
    NameExhausted { attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("another run is already in flight on this session")]
    Busy,

    #[error("run exceeded its deadline")]
    Timeout,

    #[error("session is closing or dead")]
    SessionGone,

    #[error("missing or invalid bearer token")]
    Auth,

    #[error("pty or socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty closed")]
    PtyClosed,
}

pub type Result<T> = std::result::Result<T, SilcError>;
