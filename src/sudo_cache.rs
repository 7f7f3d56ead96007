//! Short-TTL cache of per-session sudo passwords, scrubbed on eviction.
//!
//! A plain `Arc<Mutex<HashMap<_>>>` (no reach for a general-purpose TTL-cache
//! crate like `moka` for a handful of entries); password bytes are wrapped so
//! `Drop` zeroizes them.

use crate::config;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use zeroize::Zeroize;

/// Password bytes that are zeroized when dropped.
pub struct SudoPassword(Vec<u8>);

impl SudoPassword {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Clone for SudoPassword {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Drop for SudoPassword {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

struct Entry {
    password: SudoPassword,
    expires_at: Instant,
}

/// Per-session TTL cache for sudo passwords.
pub struct SudoCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl SudoCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: config::sudo_cache_ttl(),
        }
    }

    pub async fn set(&self, session_id: &str, password: SudoPassword) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            session_id.to_string(),
            Entry {
                password,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Returns a copy of the cached password if present and unexpired.
    /// Does NOT extend the expiry -- a fresh `set` is required after TTL.
    pub async fn get(&self, session_id: &str) -> Option<SudoPassword> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(session_id) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            entries.remove(session_id);
            return None;
        }
        entries.get(session_id).map(|e| e.password.clone())
    }

    /// Remaining TTL in seconds, if a non-expired entry exists.
    pub async fn expires_in_seconds(&self, session_id: &str) -> Option<u64> {
        let entries = self.entries.lock().await;
        let entry = entries.get(session_id)?;
        let now = Instant::now();
        if entry.expires_at <= now {
            return None;
        }
        Some((entry.expires_at - now).as_secs())
    }

    /// Remove and zeroize a session's cached password, if any.
    pub async fn clear(&self, session_id: &str) {
        self.entries.lock().await.remove(session_id);
    }

    /// Evict all expired entries. Intended to be called periodically by a
    /// background ticker.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }
}

impl Default for SudoCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_password() {
        let cache = SudoCache::new();
        cache.set("s1", SudoPassword::new(b"hunter2".to_vec())).await;
        let got = cache.get("s1").await.unwrap();
        assert_eq!(got.as_bytes(), b"hunter2");
    }

    #[tokio::test]
    async fn missing_entry_returns_none() {
        let cache = SudoCache::new();
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let cache = SudoCache::new();
        cache.set("s1", SudoPassword::new(b"x".to_vec())).await;
        cache.clear("s1").await;
        assert!(cache.get("s1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = SudoCache {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(60),
        };
        cache.set("s1", SudoPassword::new(b"x".to_vec())).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("s1").await.is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("s1").await.is_none());
    }
}
