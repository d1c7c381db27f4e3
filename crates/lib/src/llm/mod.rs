//! Language model and embedding abstraction.
//!
//! The pipeline only needs two capabilities: chat completion (messages in, text out)
//! and text embedding. Both are traits so the gateway can inject the Azure OpenAI
//! client and tests can inject fakes.

mod azure;

pub use azure::{AzureOpenAiClient, AzureOpenAiSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One message in a chat completion request (OpenAI shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm api error: {0}")]
    Api(String),
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
    #[error("llm returned an empty response")]
    Empty,
}

/// Chat completion: prompt messages in, assistant text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Text embedding used for retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
