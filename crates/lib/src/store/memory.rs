//! In-process store: one map behind a mutex, with lazy per-key expiry.
//! Survives only as long as the process and is not shared between instances.

use super::{KvStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut g = self.inner.lock().await;
        if g.get(key).is_some_and(|e| !e.expired(now)) {
            return Ok(false);
        }
        g.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut g = self.inner.lock().await;
        match g.get(key) {
            Some(e) if e.expired(now) => {
                g.remove(key);
                Ok(Vec::new())
            }
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.clone()),
            Some(_) => Err(StoreError::Api(format!("{} holds a non-list value", key))),
            None => Ok(Vec::new()),
        }
    }

    async fn list_append(
        &self,
        key: &str,
        values: &[String],
        keep_last: usize,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut g = self.inner.lock().await;
        if g.get(key).is_some_and(|e| e.expired(now)) {
            g.remove(key);
        }
        let entry = g.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        let Value::List(items) = &mut entry.value else {
            return Err(StoreError::Api(format!("{} holds a non-list value", key)));
        };
        items.extend(values.iter().cloned());
        if items.len() > keep_last {
            let excess = items.len() - keep_last;
            items.drain(..excess);
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().await.remove(key);
        Ok(())
    }
}

/// Store whose every call fails, for exercising degraded paths.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl KvStore for UnavailableStore {
    fn kind(&self) -> &'static str {
        "unavailable"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn list_range(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn list_append(
        &self,
        _: &str,
        _: &[String],
        _: usize,
        _: Option<Duration>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_only_sets_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("k", "1", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_key_can_be_set_again() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "1", Duration::ZERO).await.unwrap());
        assert!(store.set_if_absent("k", "1", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn list_append_keeps_tail_in_order() {
        let store = MemoryStore::new();
        let batch: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        store.list_append("l", &batch, 3, None).await.unwrap();
        store
            .list_append("l", &["5".to_string()], 3, None)
            .await
            .unwrap();
        assert_eq!(store.list_range("l").await.unwrap(), vec!["3", "4", "5"]);
        store.delete("l").await.unwrap();
        assert!(store.list_range("l").await.unwrap().is_empty());
    }
}
