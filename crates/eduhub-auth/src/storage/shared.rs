//! Shared atomic key-value store.
//!
//! Everything that must be consistent across service instances (revoked
//! token ids, rate-limit counters, the second permission-cache tier) goes
//! through this trait. Check-then-act sequences are expressed as single
//! atomic operations ([`SharedStore::set_if_absent`],
//! [`SharedStore::increment`]) so callers never read, decide and then write.
//!
//! # Implementations
//!
//! - [`MemoryStore`](super::memory::MemoryStore) - single process, tests and development
//! - `RedisStore` in `eduhub-server` - production, shared by all instances

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::{AuthError, AuthResult};

/// Result of an atomic counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub count: u64,
    /// Time until the counter's window expires.
    pub resets_in: Duration,
}

/// Storage trait for state shared between service instances.
///
/// All values are strings; callers serialize structured values themselves.
/// Every key written with a TTL disappears on its own once the TTL passes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically stores `value` under `key` unless the key already exists.
    ///
    /// Returns `true` if this call created the key. Exactly one of any number
    /// of concurrent callers for the same key observes `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool>;

    /// Returns `true` if the key exists and has not expired.
    async fn exists(&self, key: &str) -> AuthResult<bool>;

    /// Reads a value.
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()>;

    /// Removes a key. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> AuthResult<()>;

    /// Atomically increments the counter under `key`.
    ///
    /// The first increment creates the counter with a lifetime of `window`;
    /// later increments leave the expiry untouched (fixed window).
    async fn increment(&self, key: &str, window: Duration) -> AuthResult<Counter>;

    /// Remaining lifetime of a key, `None` if it does not exist.
    async fn ttl(&self, key: &str) -> AuthResult<Option<Duration>>;

    /// Broadcasts a message to other instances. Single-process stores have no
    /// one to tell.
    async fn publish(&self, _channel: &str, _message: &str) -> AuthResult<()> {
        Ok(())
    }

    /// Checks that the store is reachable.
    async fn ping(&self) -> AuthResult<()>;
}

/// Runs a store call with an upper bound on its duration.
///
/// A timeout becomes `AuthError::Storage`; whether that fails open or closed
/// is the caller's decision.
pub async fn with_timeout<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = AuthResult<T>>,
) -> AuthResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::storage(format!(
            "{} timed out after {}ms",
            operation,
            timeout.as_millis()
        ))),
    }
}
