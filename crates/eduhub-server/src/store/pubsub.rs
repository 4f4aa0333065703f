//! Redis Pub/Sub for cross-instance permission cache invalidation.

use std::time::Duration;

use eduhub_auth::PermissionCache;
use eduhub_auth::permission::INVALIDATION_CHANNEL;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Drops L1 permission entries that another instance evicted.
///
/// ```text
/// Instance 1: cache.evict(id)
///   -> PUBLISH permissions:invalidate <id>
/// Instance 2: listener receives <id> -> cache.evict_local(id)
/// ```
///
/// The publishing instance receives its own message too; evicting an entry
/// twice is harmless.
pub struct PermissionInvalidationListener {
    pub redis_url: String,
    pub cache: PermissionCache,
}

impl PermissionInvalidationListener {
    /// Spawns the listener. It reconnects with exponential backoff (1s up to
    /// 5 minutes) for as long as the process runs.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                match self.run(&mut backoff).await {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Permission invalidation listener error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self, backoff: &mut Duration) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = INVALIDATION_CHANNEL, "Subscribed to invalidation channel");
        *backoff = Duration::from_secs(1);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>().ok().and_then(|p| parse_principal(&p)) {
                Some(principal_id) => {
                    tracing::debug!(principal_id = %principal_id, "received permission invalidation");
                    self.cache.evict_local(principal_id);
                }
                None => tracing::warn!("ignoring malformed invalidation message"),
            }
        }

        Err("pub/sub connection closed".to_string())
    }
}

fn parse_principal(payload: &str) -> Option<Uuid> {
    Uuid::parse_str(payload.trim()).ok()
}
