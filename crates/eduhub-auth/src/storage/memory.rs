//! In-process [`SharedStore`] backed by `DashMap`.
//!
//! Atomicity comes from the map's per-shard entry lock: every operation that
//! reads and writes the same key does so inside one `entry()` call. Expired
//! entries are dropped when touched, and every [`SWEEP_EVERY`] writes the
//! whole map is swept so keys that are never read again do not pile up.
//!
//! Only correct for a single instance. Multi-instance deployments must use a
//! store that every instance shares.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::shared::{Counter, SharedStore};
use crate::{AuthError, AuthResult};

/// Writes between two sweeps of expired entries.
pub const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Single-process shared store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Returns `true` if no live entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    // Must not be called while holding a map guard.
    fn after_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "swept expired store entries");
            }
        }
    }

    fn bump(&self, key: &str, window: Duration) -> AuthResult<Counter> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new("0", window));

        if entry.is_expired(now) {
            *entry = StoredValue::new("0", window);
        }

        let count = entry
            .value
            .parse::<u64>()
            .map_err(|e| AuthError::storage(format!("counter '{}' is not a number: {}", key, e)))?
            + 1;
        entry.value = count.to_string();

        Ok(Counter {
            count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, v| v.is_expired(now));
            None
        } else {
            Some(entry)
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool> {
        let now = Instant::now();
        let created = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredValue::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                true
            }
        };
        self.after_write();
        Ok(created)
    }

    async fn exists(&self, key: &str) -> AuthResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        self.after_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> AuthResult<Counter> {
        let counter = self.bump(key, window)?;
        self.after_write();
        Ok(counter)
    }

    async fn ttl(&self, key: &str) -> AuthResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }

    async fn ping(&self) -> AuthResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_only_first_wins() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_if_absent_concurrent_single_winner() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set_if_absent("race", &i.to_string(), Duration::from_secs(60))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_disappear() {
        let store = MemoryStore::new();
        store
            .set("short", "v", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!store.exists("short").await.unwrap());
        assert!(store.ttl("short").await.unwrap().is_none());
        // an expired key can be claimed again
        assert!(
            store
                .set_if_absent("short", "v2", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_increment_fixed_window() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(80);

        let first = store.increment("c", window).await.unwrap();
        let second = store.increment("c", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= window);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let fresh = store.increment("c", window).await.unwrap();
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn test_expired_keys_are_swept_without_being_read() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(10);

        for i in 0..SWEEP_EVERY - 1 {
            store
                .increment(&format!("ratelimit:login:10.0.{}.{}", i / 256, i % 256), window)
                .await
                .unwrap();
        }
        assert_eq!(store.entries.len() as u64, SWEEP_EVERY - 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .increment("ratelimit:login:192.0.2.1", window)
            .await
            .unwrap();

        assert_eq!(store.entries.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let store = MemoryStore::new();
        store.set("revoked:a", "1", Duration::from_millis(10)).await.unwrap();
        store.set("revoked:b", "1", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entries.len(), 1);
        assert!(store.exists("revoked:b").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_len() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(5)).await.unwrap();
        store.set("b", "2", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.len(), 2);

        store.delete("a").await.unwrap();
        store.delete("missing").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
