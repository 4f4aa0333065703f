//! Login attempt limiter.
//!
//! Fixed window per client address: the first attempt opens a window of
//! `window` length, every attempt in it increments the counter, and once the
//! counter exceeds `limit + burst` further attempts are refused until the
//! window expires. A successful login resets the bucket.
//!
//! Counters live in the [`SharedStore`], so every instance sees the same
//! count for an address.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::AuthResult;
use crate::config::RateLimitingConfig;
use crate::storage::{SharedStore, with_timeout};

const KEY_PREFIX: &str = "ratelimit:login:";

/// Outcome of charging one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The attempt may proceed.
    Allowed {
        /// Attempts left in the current window after this one.
        remaining: u32,
    },
    /// The address is over its limit.
    Limited {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Returns `true` if the attempt may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Whole seconds to wait before retrying, rounded up, never zero.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited { retry_after } => Some(ceil_secs(*retry_after).max(1)),
        }
    }
}

/// Per-address login attempt limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    window: Duration,
    capacity: u64,
    timeout: Duration,
}

impl RateLimiter {
    /// Creates a limiter whose store calls are bounded by `timeout`.
    pub fn new(store: Arc<dyn SharedStore>, config: &RateLimitingConfig, timeout: Duration) -> Self {
        Self {
            store,
            window: config.window,
            capacity: u64::from(config.limit) + u64::from(config.burst),
            timeout,
        }
    }

    fn key(addr: IpAddr) -> String {
        format!("{}{}", KEY_PREFIX, addr)
    }

    /// Charges one attempt to `addr`.
    ///
    /// Fails closed: if the store fails or times out the attempt is refused
    /// with the full window as retry-after.
    pub async fn allow(&self, addr: IpAddr) -> RateLimitDecision {
        let counter = with_timeout(
            self.timeout,
            "rate limit increment",
            self.store.increment(&Self::key(addr), self.window),
        )
        .await;

        match counter {
            Ok(counter) if counter.count > self.capacity => RateLimitDecision::Limited {
                retry_after: counter.resets_in,
            },
            Ok(counter) => RateLimitDecision::Allowed {
                remaining: u32::try_from(self.capacity - counter.count).unwrap_or(u32::MAX),
            },
            Err(err) => {
                warn!(client_address = %addr, error = %err, "Rate limit store unavailable, refusing attempt");
                RateLimitDecision::Limited {
                    retry_after: self.window,
                }
            }
        }
    }

    /// Clears the bucket for `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or times out.
    pub async fn reset(&self, addr: IpAddr) -> AuthResult<()> {
        with_timeout(
            self.timeout,
            "rate limit reset",
            self.store.delete(&Self::key(addr)),
        )
        .await
    }

    /// Seconds until the window for `addr` resets, `0` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or times out.
    pub async fn seconds_until_reset(&self, addr: IpAddr) -> AuthResult<u64> {
        let ttl = with_timeout(
            self.timeout,
            "rate limit ttl",
            self.store.ttl(&Self::key(addr)),
        )
        .await?;
        Ok(ttl.map_or(0, ceil_secs))
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::storage::testing::UnavailableStore;

    fn limiter(limit: u32, burst: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            &RateLimitingConfig {
                window,
                limit,
                burst,
            },
            Duration::from_millis(200),
        )
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_eleventh_attempt_limited() {
        let limiter = limiter(10, 0, Duration::from_secs(60));
        let client = addr("203.0.113.10");

        for expected_remaining in (0..10).rev() {
            assert_eq!(
                limiter.allow(client).await,
                RateLimitDecision::Allowed {
                    remaining: expected_remaining
                }
            );
        }

        let decision = limiter.allow(client).await;
        assert!(!decision.is_allowed());
        let retry = decision.retry_after_secs().unwrap();
        assert!(retry > 0 && retry <= 60);
    }

    #[tokio::test]
    async fn test_burst_extends_capacity() {
        let limiter = limiter(2, 1, Duration::from_secs(60));
        let client = addr("203.0.113.11");

        for _ in 0..3 {
            assert!(limiter.allow(client).await.is_allowed());
        }
        assert!(!limiter.allow(client).await.is_allowed());
    }

    #[tokio::test]
    async fn test_addresses_are_independent() {
        let limiter = limiter(1, 0, Duration::from_secs(60));
        let a = addr("203.0.113.1");
        let b = addr("2001:db8::1");

        assert!(limiter.allow(a).await.is_allowed());
        assert!(!limiter.allow(a).await.is_allowed());
        assert!(limiter.allow(b).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_bucket() {
        let limiter = limiter(1, 0, Duration::from_secs(60));
        let client = addr("203.0.113.12");

        limiter.allow(client).await;
        assert!(!limiter.allow(client).await.is_allowed());
        assert!(limiter.seconds_until_reset(client).await.unwrap() > 0);

        limiter.reset(client).await.unwrap();
        assert_eq!(limiter.seconds_until_reset(client).await.unwrap(), 0);
        assert!(limiter.allow(client).await.is_allowed());
    }

    #[tokio::test]
    async fn test_window_expiry_restores_attempts() {
        let limiter = limiter(1, 0, Duration::from_millis(100));
        let client = addr("203.0.113.13");

        limiter.allow(client).await;
        assert!(!limiter.allow(client).await.is_allowed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow(client).await.is_allowed());
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let limiter = RateLimiter::new(
            Arc::new(UnavailableStore::failing()),
            &RateLimitingConfig::default(),
            Duration::from_millis(20),
        );

        let decision = limiter.allow(addr("203.0.113.14")).await;
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateLimitDecision::Limited {
            retry_after: Duration::from_millis(1200),
        };
        assert_eq!(decision.retry_after_secs(), Some(2));

        let decision = RateLimitDecision::Limited {
            retry_after: Duration::ZERO,
        };
        assert_eq!(decision.retry_after_secs(), Some(1));
    }
}
