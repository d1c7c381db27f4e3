//! Conversation memory per sender.
//!
//! A sender's history is a list of turns (human/assistant) kept in the shared store,
//! oldest first. New turns are appended atomically at the store, so concurrent
//! messages from the same sender cannot overwrite each other's turns. Store failures
//! and corrupt records degrade to an empty history.

use crate::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "whatsapp_history:";

/// Default number of turns kept per sender (ten exchanges).
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Store-backed session memory keyed by sender.
#[derive(Clone)]
pub struct SessionMemory {
    store: Arc<dyn KvStore>,
    limit: usize,
    ttl: Option<Duration>,
}

impl SessionMemory {
    /// `limit` bounds the turns kept per sender; `ttl` optionally expires idle sessions.
    /// The limit is rounded up to whole exchanges so trimming never orphans a reply.
    pub fn new(store: Arc<dyn KvStore>, limit: usize, ttl: Option<Duration>) -> Self {
        let limit = limit.max(2);
        Self {
            store,
            limit: limit + limit % 2,
            ttl,
        }
    }

    fn key(sender: &str) -> String {
        format!("{}{}", KEY_PREFIX, sender)
    }

    /// History for `sender`, oldest first. Empty when the sender is new, the store is
    /// unavailable, or the stored records cannot be decoded.
    pub async fn get_history(&self, sender: &str) -> Vec<Turn> {
        let key = Self::key(sender);
        let raw = match self.store.list_range(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("session: could not load history for {}: {}", sender, e);
                return Vec::new();
            }
        };
        let decoded: Result<Vec<Turn>, _> = raw.iter().map(|r| serde_json::from_str(r)).collect();
        match decoded {
            Ok(turns) => turns,
            Err(e) => {
                log::warn!(
                    "session: corrupt history for {}, starting a new session: {}",
                    sender,
                    e
                );
                if let Err(e) = self.store.delete(&key).await {
                    log::debug!("session: could not clear corrupt history for {}: {}", sender, e);
                }
                Vec::new()
            }
        }
    }

    /// Append turns to the end of `sender`'s history in one store operation.
    /// Skipped with a warning when the store is unavailable.
    pub async fn append(&self, sender: &str, turns: &[Turn]) {
        let encoded: Vec<String> = match turns.iter().map(serde_json::to_string).collect() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("session: could not encode turns for {}: {}", sender, e);
                return;
            }
        };
        if let Err(e) = self
            .store
            .list_append(&Self::key(sender), &encoded, self.limit, self.ttl)
            .await
        {
            log::warn!("session: could not save history for {}: {}", sender, e);
        }
    }

    /// Replace `sender`'s whole history (used for resets). Not atomic with respect to
    /// concurrent appends; the normal message path uses `append`.
    pub async fn save_history(&self, sender: &str, history: &[Turn]) {
        if let Err(e) = self.store.delete(&Self::key(sender)).await {
            log::warn!("session: could not save history for {}: {}", sender, e);
            return;
        }
        let start = history.len().saturating_sub(self.limit);
        if start < history.len() {
            self.append(sender, &history[start..]).await;
        }
    }
}
