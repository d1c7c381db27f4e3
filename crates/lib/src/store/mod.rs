//! Key-value storage used for deduplication and conversation memory.
//!
//! Only the primitives the pipeline needs are exposed, and each one is atomic at the
//! provider: set-if-absent with expiry (dedup) and list append with trim (history).
//! Callers never read-modify-write whole values.

mod memory;
mod redis_rest;

pub use memory::MemoryStore;
pub use redis_rest::RedisRestStore;

#[cfg(test)]
pub(crate) use memory::UnavailableStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store api error: {0}")]
    Api(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Provider-side primitives over a shared key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short identifier for logs (e.g. "redis", "memory").
    fn kind(&self) -> &'static str;

    /// Round-trip check used at startup.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Atomically set `key` to `value` with `ttl` only if it does not exist.
    /// Returns true when the key was set, false when it already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// All elements of the list at `key`, oldest first. Missing key => empty.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically append `values` to the list at `key`, keep only the last `keep_last`
    /// elements and, when `ttl` is set, refresh the key's expiry.
    async fn list_append(
        &self,
        key: &str,
        values: &[String],
        keep_last: usize,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Remove `key`. Missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Pick the store for the gateway: the REST-backed Redis when configured and reachable,
/// otherwise the in-process store.
pub async fn connect(redis_url: Option<&str>, redis_token: Option<&str>) -> Arc<dyn KvStore> {
    if let (Some(url), Some(token)) = (redis_url, redis_token) {
        match RedisRestStore::new(url, token) {
            Ok(store) => match store.ping().await {
                Ok(()) => {
                    log::info!("store: connected to redis at {}", store.base_url());
                    return Arc::new(store);
                }
                Err(e) => log::warn!("store: could not reach redis at {}: {}", url, e),
            },
            Err(e) => log::warn!("store: invalid redis client configuration: {}", e),
        }
    } else {
        log::warn!("store: redis REST url/token not configured");
    }
    log::warn!(
        "store: falling back to in-memory store for dedup and history (NOT SUITABLE FOR PRODUCTION WITH MULTIPLE INSTANCES)"
    );
    Arc::new(MemoryStore::new())
}
