//! Azure OpenAI client: chat completions and embeddings against named deployments.
//!
//! Chat: POST {endpoint}/openai/deployments/{deployment}/chat/completions?api-version=..
//! Embeddings: POST {endpoint}/openai/deployments/{deployment}/embeddings?api-version=..
//! Both authenticate with the `api-key` header.

use super::{ChatMessage, Embedder, LanguageModel, LlmError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resolved connection settings (see `config::resolve_runtime`).
#[derive(Debug, Clone)]
pub struct AzureOpenAiSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub embeddings_endpoint: String,
    pub embeddings_api_key: String,
    pub embeddings_deployment: String,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct AzureOpenAiClient {
    settings: AzureOpenAiSettings,
    client: reqwest::Client,
}

impl AzureOpenAiClient {
    pub fn new(mut settings: AzureOpenAiSettings) -> Result<Self, LlmError> {
        settings.endpoint = settings.endpoint.trim_end_matches('/').to_string();
        settings.embeddings_endpoint = settings.embeddings_endpoint.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { settings, client })
    }

    pub fn deployment(&self) -> &str {
        &self.settings.deployment
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.settings.endpoint, self.settings.deployment, self.settings.api_version
        )
    }

    fn embeddings_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.settings.embeddings_endpoint,
            self.settings.embeddings_deployment,
            self.settings.api_version
        )
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        api_key: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let res = self
            .client
            .post(url)
            .header("api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.settings.timeout)
                } else {
                    LlmError::Request(e)
                }
            })?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, LlmError> {
        let content = self
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Option<Vec<EmbeddingData>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingsResponse {
    fn into_vector(self) -> Result<Vec<f32>, LlmError> {
        self.data
            .and_then(|d| d.into_iter().next())
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(LlmError::Empty)
    }
}

#[async_trait]
impl LanguageModel for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatRequest {
            messages,
            temperature: self.settings.temperature,
        };
        let data: ChatResponse = self.post(&self.chat_url(), &self.settings.api_key, &body).await?;
        data.into_content()
    }
}

#[async_trait]
impl Embedder for AzureOpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingsRequest { input: text };
        let data: EmbeddingsResponse = self
            .post(&self.embeddings_url(), &self.settings.embeddings_api_key, &body)
            .await?;
        data.into_vector()
    }
}
