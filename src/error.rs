//! Structured error taxonomy for the session/transport/tunnel subsystems.
//!
//! Tool handlers in `server.rs` convert any [`ShellError`] into an in-band
//! `CallToolResult::error`, except [`ShellError::Timeout`], which is folded
//! into a normal (non-error) exec result instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no session with id '{0}'")]
    SessionNotFound(String),

    #[error("no tunnel with id '{0}'")]
    TunnelNotFound(String),

    #[error("session '{0}' is not awaiting input")]
    InvalidState(String),

    #[error("authentication locked for {host}@{user}, retry in {remaining_secs}s")]
    RateLimited {
        host: String,
        user: String,
        remaining_secs: u64,
    },

    #[error("command timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("SSH authentication failed for {user}@{host}: {reason}")]
    AuthFailed {
        host: String,
        user: String,
        reason: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ShellError {
    fn from(e: std::io::Error) -> Self {
        ShellError::Io(e.to_string())
    }
}

impl From<russh::Error> for ShellError {
    fn from(e: russh::Error) -> Self {
        ShellError::Transport(e.to_string())
    }
}

impl ShellError {
    /// True if this error represents a busy/transient condition that should
    /// not tear down the session.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ShellError::Timeout | ShellError::RateLimited { .. })
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
