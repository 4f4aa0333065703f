//! Store doubles for exercising failure paths.

use std::time::Duration;

use async_trait::async_trait;

use super::shared::{Counter, SharedStore};
use crate::{AuthError, AuthResult};

/// A shared store that is down: every call either errors at once or hangs
/// far longer than any configured timeout.
pub(crate) struct UnavailableStore {
    stall: bool,
}

impl UnavailableStore {
    pub(crate) fn failing() -> Self {
        Self { stall: false }
    }

    pub(crate) fn stalled() -> Self {
        Self { stall: true }
    }

    async fn fail<T>(&self) -> AuthResult<T> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Err(AuthError::storage("store unavailable"))
    }
}

#[async_trait]
impl SharedStore for UnavailableStore {
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> AuthResult<bool> {
        self.fail().await
    }

    async fn exists(&self, _: &str) -> AuthResult<bool> {
        self.fail().await
    }

    async fn get(&self, _: &str) -> AuthResult<Option<String>> {
        self.fail().await
    }

    async fn set(&self, _: &str, _: &str, _: Duration) -> AuthResult<()> {
        self.fail().await
    }

    async fn delete(&self, _: &str) -> AuthResult<()> {
        self.fail().await
    }

    async fn increment(&self, _: &str, _: Duration) -> AuthResult<Counter> {
        self.fail().await
    }

    async fn ttl(&self, _: &str) -> AuthResult<Option<Duration>> {
        self.fail().await
    }

    async fn publish(&self, _: &str, _: &str) -> AuthResult<()> {
        self.fail().await
    }

    async fn ping(&self) -> AuthResult<()> {
        self.fail().await
    }
}
