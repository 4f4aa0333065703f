//! Shared store selection.
//!
//! - **Redis disabled**: [`MemoryStore`], correct for a single instance only
//! - **Redis enabled**: [`RedisStore`]; if Redis cannot be reached at startup
//!   the server refuses to start instead of silently keeping revocations and
//!   rate-limit counters in one process

pub mod pubsub;
pub mod redis;

use std::sync::Arc;

use eduhub_auth::{MemoryStore, SharedStore};

use crate::config::RedisConfig;

pub use self::pubsub::PermissionInvalidationListener;
pub use self::redis::RedisStore;

/// The store chosen at startup.
#[derive(Clone)]
pub enum StoreBackend {
    Memory(Arc<MemoryStore>),
    Redis { store: RedisStore, url: String },
}

impl StoreBackend {
    pub fn shared(&self) -> Arc<dyn SharedStore> {
        match self {
            Self::Memory(store) => store.clone(),
            Self::Redis { store, .. } => Arc::new(store.clone()),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis { .. } => "redis",
        }
    }

    /// Redis URL for the invalidation listener.
    pub fn redis_url(&self) -> Option<&str> {
        match self {
            Self::Memory(_) => None,
            Self::Redis { url, .. } => Some(url),
        }
    }
}

pub async fn create_shared_store(config: &RedisConfig) -> anyhow::Result<StoreBackend> {
    if !config.enabled {
        tracing::info!("Redis disabled, session state is local to this instance");
        return Ok(StoreBackend::Memory(Arc::new(MemoryStore::new())));
    }

    tracing::info!(url = %config.url, "Connecting to Redis");
    let store = RedisStore::connect(config).await?;
    tracing::info!("Connected to Redis");

    Ok(StoreBackend::Redis {
        store,
        url: config.url.clone(),
    })
}
