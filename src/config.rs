//! Tunable constants for the session/tunnel/auth subsystems.
//!
//! Nothing here is a config *file* -- every override is a single
//! environment variable read once at startup, in the same style as
//! `SHELLMCP_STRIP_ENV`. Defaults match the values named in the external
//! interface contract.

use std::sync::LazyLock;
use std::time::Duration;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Maximum number of concurrent sessions per server process.
pub static MAX_SESSIONS: LazyLock<usize> =
    LazyLock::new(|| env_usize("SHELLMCP_MAX_SESSIONS", 10));

/// Maximum number of live tunnels per session.
pub static MAX_TUNNELS_PER_SESSION: LazyLock<usize> =
    LazyLock::new(|| env_usize("SHELLMCP_MAX_TUNNELS", 16));

/// Maximum output lines retained per command.
pub static MAX_OUTPUT_LINES: LazyLock<usize> =
    LazyLock::new(|| env_usize("SHELLMCP_MAX_OUTPUT_LINES", 100_000));

/// Default command timeout when a tool call omits `timeout_ms`.
pub static DEFAULT_TIMEOUT_MS: LazyLock<u64> =
    LazyLock::new(|| env_u64("SHELLMCP_DEFAULT_TIMEOUT_MS", 30_000));

/// Hard ceiling on any command timeout, regardless of caller request.
pub static MAX_TIMEOUT_MS: LazyLock<u64> =
    LazyLock::new(|| env_u64("SHELLMCP_MAX_TIMEOUT_MS", 3_600_000));

/// Minimum idle gap after a prompt-like byte sequence before it is reported
/// as `awaiting_input`.
pub static PROMPT_SETTLE_MS: LazyLock<u64> =
    LazyLock::new(|| env_u64("SHELLMCP_PROMPT_SETTLE_MS", 150));

/// Sudo password cache TTL.
pub fn sudo_cache_ttl() -> Duration {
    Duration::from_secs(env_u64("SHELLMCP_SUDO_CACHE_TTL_SECONDS", 300))
}

/// Consecutive authentication failures before an `(host, user)` pair is locked out.
pub static AUTH_FAILURE_THRESHOLD: LazyLock<u32> =
    LazyLock::new(|| env_u64("SHELLMCP_AUTH_FAILURE_THRESHOLD", 5) as u32);

/// Initial lockout duration; doubles with every further failure while locked,
/// up to `auth_lockout_cap`.
pub fn auth_lockout_initial() -> Duration {
    Duration::from_secs(env_u64("SHELLMCP_AUTH_LOCKOUT_INITIAL_SECONDS", 900))
}

/// Upper bound on lockout duration after repeated backoff.
pub fn auth_lockout_cap() -> Duration {
    Duration::from_secs(env_u64("SHELLMCP_AUTH_LOCKOUT_CAP_SECONDS", 7_200))
}

/// Size of the tail window the prompt classifier scans, in bytes.
pub static PROMPT_SCAN_WINDOW_BYTES: LazyLock<usize> =
    LazyLock::new(|| env_usize("SHELLMCP_PROMPT_SCAN_WINDOW_BYTES", 4096));

/// Directory (relative to a session's working directory) recordings are written under.
pub const RECORDING_DIR_NAME: &str = ".claude-shell-mcp";
