//! SSH authentication rate limiter: consecutive-failure lockout with
//! exponential backoff, keyed by `(host, user)`.
//!
//! Grounded on `visiquate-cco::security::ConnectionTracker`'s tracked-map +
//! async acquire/release shape, adapted from a connection counter to a
//! failure counter with a lockout deadline.

use crate::config;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    consecutive_failures: u32,
    locked_until: Option<Instant>,
    next_lockout: Duration,
}

impl Entry {
    fn fresh() -> Self {
        Self {
            consecutive_failures: 0,
            locked_until: None,
            next_lockout: config::auth_lockout_initial(),
        }
    }
}

pub struct AuthRateLimiter {
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl AuthRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(locked, remaining_seconds)`. `remaining_seconds` is 0 when
    /// not locked.
    pub async fn is_locked(&self, host: &str, user: &str) -> (bool, u64) {
        let mut entries = self.entries.lock().await;
        let key = (host.to_string(), user.to_string());
        let Some(entry) = entries.get_mut(&key) else {
            return (false, 0);
        };
        match entry.locked_until {
            Some(until) if until > Instant::now() => {
                (true, (until - Instant::now()).as_secs())
            }
            Some(_) => {
                entry.locked_until = None;
                (false, 0)
            }
            None => (false, 0),
        }
    }

    /// Record a failed authentication attempt. If this pushes the account
    /// past the threshold, locks it for `next_lockout`, then doubles
    /// `next_lockout` (capped) for the next time it's reached.
    pub async fn record_failure(&self, host: &str, user: &str) {
        let mut entries = self.entries.lock().await;
        let key = (host.to_string(), user.to_string());
        let entry = entries.entry(key).or_insert_with(Entry::fresh);
        entry.consecutive_failures += 1;

        if entry.consecutive_failures >= *config::AUTH_FAILURE_THRESHOLD {
            entry.locked_until = Some(Instant::now() + entry.next_lockout);
            entry.next_lockout = (entry.next_lockout * 2).min(config::auth_lockout_cap());
        }
    }

    /// Clear all failure/lockout state for `(host, user)`.
    pub async fn record_success(&self, host: &str, user: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(&(host.to_string(), user.to_string()));
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn locks_after_threshold_failures() {
        let limiter = AuthRateLimiter::new();
        for _ in 0..*config::AUTH_FAILURE_THRESHOLD {
            limiter.record_failure("h", "u").await;
        }
        let (locked, remaining) = limiter.is_locked("h", "u").await;
        assert!(locked);
        assert!(remaining > 0);
    }

    #[tokio::test]
    async fn success_clears_lockout() {
        let limiter = AuthRateLimiter::new();
        for _ in 0..*config::AUTH_FAILURE_THRESHOLD {
            limiter.record_failure("h", "u").await;
        }
        limiter.record_success("h", "u").await;
        let (locked, _) = limiter.is_locked("h", "u").await;
        assert!(!locked);
    }

    #[tokio::test]
    async fn below_threshold_not_locked() {
        let limiter = AuthRateLimiter::new();
        limiter.record_failure("h", "u").await;
        let (locked, _) = limiter.is_locked("h", "u").await;
        assert!(!locked);
    }
}
