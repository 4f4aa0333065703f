//! Two-tier permission cache: L1 per-instance `DashMap`, L2 shared store.
//!
//! ## Lookup order
//!
//! 1. L1 - in-process, no I/O
//! 2. L2 - shared store, JSON under `perm:<principal-id>`, promoted to L1 on hit
//! 3. [`PermissionSource`] - written back to both tiers
//!
//! The cache fails open: an unavailable L2 is a miss and the permissions are
//! resolved fresh. It never answers with permissions it could not confirm.
//!
//! ## Invalidation
//!
//! ```text
//! Instance 1: cache.evict(id)
//!   -> bump local generation, drop L1
//!   -> overwrite L2 entry with a short-lived tombstone
//!   -> PUBLISH permissions:invalidate <id>
//! Instance 2: listener receives <id> -> cache.evict_local(id)
//! ```
//!
//! A lookup that was already resolving when the eviction ran must not write
//! its result back. Locally it notices the generation moved; in L2 the
//! tombstone makes its insert-if-absent lose.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AuthResult;
use crate::storage::{Authorities, PermissionSource, SharedStore, with_timeout};

/// Channel carrying principal ids whose cached permissions are stale.
pub const INVALIDATION_CHANNEL: &str = "permissions:invalidate";

const KEY_PREFIX: &str = "perm:";

/// L2 value marking a freshly evicted entry.
const TOMBSTONE: &str = "evicted";

/// Lower bound on how long a tombstone blocks L2 writes.
const TOMBSTONE_MIN_TTL: Duration = Duration::from_secs(1);

/// Cache names reported by [`PermissionCache::clear`].
pub const CLEARED_CACHES: [&str; 2] = ["permissions", "roles"];

#[derive(Clone, Debug)]
struct CachedAuthorities {
    authorities: Arc<Authorities>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedAuthorities {
    fn new(authorities: Authorities, ttl: Duration) -> Self {
        Self {
            authorities: Arc::new(authorities),
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cached view of each principal's roles and permissions.
#[derive(Clone)]
pub struct PermissionCache {
    local: Arc<DashMap<Uuid, CachedAuthorities>>,
    generations: Arc<DashMap<Uuid, u64>>,
    store: Arc<dyn SharedStore>,
    source: Arc<dyn PermissionSource>,
    ttl: Duration,
    timeout: Duration,
}

impl PermissionCache {
    /// Creates a cache in front of `source`.
    pub fn new(
        store: Arc<dyn SharedStore>,
        source: Arc<dyn PermissionSource>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            generations: Arc::new(DashMap::new()),
            store,
            source,
            ttl,
            timeout,
        }
    }

    fn key(principal_id: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, principal_id)
    }

    fn generation(&self, principal_id: Uuid) -> u64 {
        self.generations.get(&principal_id).map_or(0, |g| *g)
    }

    // An in-flight lookup spans an L2 read, a resolve and an L2 write.
    fn tombstone_ttl(&self) -> Duration {
        self.timeout.saturating_mul(3).max(TOMBSTONE_MIN_TTL)
    }

    /// Returns the principal's authorities, resolving them on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error only if the permission source itself fails; cache
    /// tier failures are absorbed.
    pub async fn get_or_resolve(&self, principal_id: Uuid) -> AuthResult<Arc<Authorities>> {
        if let Some(entry) = self.local.get(&principal_id) {
            if !entry.is_expired() {
                debug!(principal_id = %principal_id, "permission cache hit (L1)");
                return Ok(Arc::clone(&entry.authorities));
            }
            drop(entry);
            self.local.remove(&principal_id);
        }

        let generation = self.generation(principal_id);

        if let Some(authorities) = self.read_shared(principal_id).await {
            debug!(principal_id = %principal_id, "permission cache hit (L2)");
            return Ok(self.promote(principal_id, generation, authorities));
        }

        debug!(principal_id = %principal_id, "permission cache miss");
        let resolved = with_timeout(
            self.timeout,
            "permission resolve",
            self.source.resolve(principal_id),
        )
        .await?;

        if self.generation(principal_id) != generation {
            debug!(principal_id = %principal_id, "permissions changed during resolve, not caching");
            return Ok(Arc::new(resolved));
        }
        self.write_shared(principal_id, &resolved).await;
        Ok(self.promote(principal_id, generation, resolved))
    }

    /// Puts `authorities` into L1 unless the principal was evicted since
    /// `generation` was read.
    fn promote(
        &self,
        principal_id: Uuid,
        generation: u64,
        authorities: Authorities,
    ) -> Arc<Authorities> {
        let entry = CachedAuthorities::new(authorities, self.ttl);
        let authorities = Arc::clone(&entry.authorities);
        // The generation guard is held across the insert so that
        // evict_local cannot run in between.
        let current = self.generations.entry(principal_id).or_insert(0);
        if *current == generation {
            self.local.insert(principal_id, entry);
        }
        authorities
    }

    async fn read_shared(&self, principal_id: Uuid) -> Option<Authorities> {
        let raw = match with_timeout(
            self.timeout,
            "permission cache read",
            self.store.get(&Self::key(principal_id)),
        )
        .await
        {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(principal_id = %principal_id, error = %err, "Permission cache L2 read failed, resolving fresh");
                return None;
            }
        };
        if raw == TOMBSTONE {
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(authorities) => Some(authorities),
            Err(err) => {
                warn!(principal_id = %principal_id, error = %err, "Discarding unreadable permission cache entry");
                None
            }
        }
    }

    async fn write_shared(&self, principal_id: Uuid, authorities: &Authorities) {
        let payload = match serde_json::to_string(authorities) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(principal_id = %principal_id, error = %err, "Cannot serialize permissions for L2");
                return;
            }
        };

        // Never overwrites: a tombstone or a newer entry wins.
        match with_timeout(
            self.timeout,
            "permission cache write",
            self.store
                .set_if_absent(&Self::key(principal_id), &payload, self.ttl),
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(principal_id = %principal_id, "permission cache L2 entry already present");
            }
            Err(err) => {
                warn!(principal_id = %principal_id, error = %err, "Permission cache L2 write failed");
            }
        }
    }

    /// Drops the principal's entry from both tiers and tells other instances.
    ///
    /// The L2 entry is replaced by a tombstone so that lookups still in
    /// flight cannot store what they resolved before the change.
    pub async fn evict(&self, principal_id: Uuid) {
        self.evict_local(principal_id);

        if let Err(err) = with_timeout(
            self.timeout,
            "permission cache evict",
            self.store
                .set(&Self::key(principal_id), TOMBSTONE, self.tombstone_ttl()),
        )
        .await
        {
            warn!(principal_id = %principal_id, error = %err, "Permission cache L2 evict failed");
        }

        if let Err(err) = with_timeout(
            self.timeout,
            "permission invalidation publish",
            self.store
                .publish(INVALIDATION_CHANNEL, &principal_id.to_string()),
        )
        .await
        {
            warn!(principal_id = %principal_id, error = %err, "Permission invalidation publish failed");
        }
    }

    /// Drops the principal's L1 entry and stops lookups already in flight
    /// from filling it again. Called for invalidations received from other
    /// instances.
    pub fn evict_local(&self, principal_id: Uuid) {
        let mut generation = self.generations.entry(principal_id).or_insert(0);
        *generation += 1;
        let removed = self.local.remove(&principal_id).is_some();
        drop(generation);
        if removed {
            debug!(principal_id = %principal_id, "permission cache L1 entry evicted");
        }
    }

    /// Hook for role or permission changes made elsewhere.
    pub async fn on_role_changed(&self, principal_id: Uuid) {
        self.evict(principal_id).await;
    }

    /// Clears every cached view of the principal's authorities and reports
    /// which caches were cleared.
    pub async fn clear(&self, principal_id: Uuid) -> Vec<&'static str> {
        self.evict(principal_id).await;
        CLEARED_CACHES.to_vec()
    }

    /// Number of L1 entries, expired ones included.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
