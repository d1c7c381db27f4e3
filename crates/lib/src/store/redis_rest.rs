//! Redis over its HTTP REST interface (Upstash-compatible).
//!
//! A command is a JSON array POSTed to the base URL with a bearer token; the reply is
//! `{"result": ...}` or `{"error": "..."}`. `/multi-exec` runs several commands as one
//! MULTI/EXEC transaction and replies with one such object per command.

use super::{KvStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CommandReply {
    fn into_result(self) -> Result<Value, StoreError> {
        match self.error {
            Some(e) => Err(StoreError::Api(e)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Client for a Redis REST endpoint.
#[derive(Clone)]
pub struct RedisRestStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl RedisRestStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a single command and return its `result`.
    async fn command(&self, args: &[&str]) -> Result<Value, StoreError> {
        let res = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!("{} {}", status, body)));
        }
        let reply: CommandReply = res.json().await?;
        reply.into_result()
    }

    /// Run commands in one MULTI/EXEC transaction. Fails if any command failed.
    async fn transaction(&self, commands: Vec<Vec<String>>) -> Result<Vec<Value>, StoreError> {
        let url = format!("{}/multi-exec", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Api(format!("{} {}", status, body)));
        }
        let replies: Vec<CommandReply> = res.json().await?;
        replies.into_iter().map(CommandReply::into_result).collect()
    }
}

#[async_trait]
impl KvStore for RedisRestStore {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self.command(&["PING"]).await? {
            Value::String(s) if s.eq_ignore_ascii_case("pong") => Ok(()),
            other => Err(StoreError::Unavailable(format!("unexpected PING reply: {}", other))),
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let ttl = ttl.as_secs().max(1).to_string();
        let reply = self
            .command(&["SET", key, value, "NX", "EX", ttl.as_str()])
            .await?;
        Ok(!reply.is_null())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.command(&["LRANGE", key, "0", "-1"]).await? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect()),
            other => Err(StoreError::Api(format!("unexpected LRANGE reply: {}", other))),
        }
    }

    async fn list_append(
        &self,
        key: &str,
        values: &[String],
        keep_last: usize,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut push = vec!["RPUSH".to_string(), key.to_string()];
        push.extend(values.iter().cloned());
        let keep_from = format!("-{}", keep_last.max(1));
        let mut commands = vec![
            push,
            vec!["LTRIM".to_string(), key.to_string(), keep_from, "-1".to_string()],
        ];
        if let Some(ttl) = ttl {
            commands.push(vec![
                "EXPIRE".to_string(),
                key.to_string(),
                ttl.as_secs().max(1).to_string(),
            ]);
        }
        self.transaction(commands).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.command(&["DEL", key]).await.map(|_| ())
    }
}
