//! Deduplication gate: the idempotency boundary for inbound webhook deliveries.

use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "whatsapp_processed_msg:";

/// Default retention for processed message ids (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Records message ids with a set-if-absent and reports repeats.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// True if `message_id` was already seen within the retention window.
    /// The first sighting records the id. When the store fails the gate opens
    /// (returns false) so the message is still processed.
    pub async fn is_duplicate(&self, message_id: &str) -> bool {
        let key = format!("{}{}", KEY_PREFIX, message_id);
        match self.store.set_if_absent(&key, "1", self.ttl).await {
            Ok(true) => false,
            Ok(false) => {
                log::info!("dedup: duplicate message {}, ignoring", message_id);
                true
            }
            Err(e) => {
                log::warn!(
                    "dedup: {} store error, processing {} without duplicate check: {}",
                    self.store.kind(),
                    message_id,
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UnavailableStore};

    #[tokio::test]
    async fn second_sighting_is_duplicate() {
        let gate = DedupGate::new(Arc::new(MemoryStore::new()), DEFAULT_TTL);
        assert!(!gate.is_duplicate("wamid.1").await);
        assert!(gate.is_duplicate("wamid.1").await);
        assert!(!gate.is_duplicate("wamid.2").await);
    }

    #[tokio::test]
    async fn concurrent_deliveries_pass_once() {
        let gate = DedupGate::new(Arc::new(MemoryStore::new()), DEFAULT_TTL);
        let (a, b) = tokio::join!(gate.is_duplicate("same"), gate.is_duplicate("same"));
        assert!(a ^ b);
    }

    #[tokio::test]
    async fn unavailable_store_fails_open() {
        let gate = DedupGate::new(Arc::new(UnavailableStore), DEFAULT_TTL);
        assert!(!gate.is_duplicate("x").await);
        assert!(!gate.is_duplicate("x").await);
    }
}
