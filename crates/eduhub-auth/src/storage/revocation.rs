//! Revoked token id store.
//!
//! A revoked token is remembered by its `jti` until the moment the token
//! would have expired anyway. Entries carry that remaining lifetime as their
//! store TTL, so the store never needs sweeping: once a token could no longer
//! pass validation, its revocation marker disappears with it.
//!
//! The store is shared by every instance. A token revoked on one instance is
//! rejected by all others on their next lookup.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::shared::{SharedStore, with_timeout};
use crate::AuthResult;

const KEY_PREFIX: &str = "revoked:";
const MARKER: &str = "1";

/// Outcome of [`RevocationStore::add`]. All three are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    /// The jti was not revoked before and now is.
    Inserted,
    /// The jti was already revoked.
    AlreadyRevoked,
    /// The token has already expired; nothing was stored.
    AlreadyExpired,
}

/// Revocation store over a [`SharedStore`].
#[derive(Clone)]
pub struct RevocationStore {
    store: Arc<dyn SharedStore>,
    timeout: Duration,
}

impl RevocationStore {
    /// Creates a revocation store whose calls are bounded by `timeout`.
    pub fn new(store: Arc<dyn SharedStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    fn key(jti: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, jti)
    }

    /// Revokes a token id until `expires_at`.
    ///
    /// Idempotent: revoking an already revoked or already expired token
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn add(&self, jti: Uuid, expires_at: OffsetDateTime) -> AuthResult<Revocation> {
        let Some(ttl) = remaining_lifetime(expires_at) else {
            return Ok(Revocation::AlreadyExpired);
        };

        let inserted = with_timeout(
            self.timeout,
            "revocation add",
            self.store.set_if_absent(&Self::key(jti), MARKER, ttl),
        )
        .await?;

        Ok(if inserted {
            Revocation::Inserted
        } else {
            Revocation::AlreadyRevoked
        })
    }

    /// Atomically revokes a token id and reports whether this caller did it.
    ///
    /// Used by refresh rotation as the single check-and-set that decides
    /// which of several concurrent requests presenting the same token wins.
    /// The TTL is clamped to at least one second so a token expiring during
    /// the request can still be claimed exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn claim(&self, jti: Uuid, expires_at: OffsetDateTime) -> AuthResult<bool> {
        let ttl = remaining_lifetime(expires_at)
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));

        with_timeout(
            self.timeout,
            "revocation claim",
            self.store.set_if_absent(&Self::key(jti), MARKER, ttl),
        )
        .await
    }

    /// Returns `true` if the token id has been revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out. Callers must
    /// treat an error as "revoked".
    pub async fn is_revoked(&self, jti: Uuid) -> AuthResult<bool> {
        with_timeout(
            self.timeout,
            "revocation lookup",
            self.store.exists(&Self::key(jti)),
        )
        .await
    }
}

/// Time left until `expires_at`, or `None` if it has passed.
fn remaining_lifetime(expires_at: OffsetDateTime) -> Option<Duration> {
    let remaining = expires_at - OffsetDateTime::now_utc();
    if remaining.is_positive() {
        Duration::try_from(remaining).ok()
    } else {
        None
    }
}
