//! Retrieval-augmented answering over the agency's knowledge index.
//!
//! The index is a JSON file of pre-embedded documents built offline. Answering a
//! question: condense it against the history (only when there is history), embed it,
//! take the top-k documents by cosine similarity and ask the model with that context.

use crate::llm::{ChatMessage, Embedder, LanguageModel, LlmError};
use crate::session::{Role, Turn};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("could not read knowledge index {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid knowledge index {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("knowledge index has no documents")]
    Empty,
    #[error("document {id} has embedding dimension {found}, expected {expected}")]
    Dimension {
        id: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    documents: Vec<Document>,
}

/// In-memory vector index, read-only after load.
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    documents: Vec<Document>,
    dimension: usize,
}

impl KnowledgeIndex {
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: IndexFile = serde_json::from_str(&raw).map_err(|source| IndexError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let index = Self::from_documents(file.documents)?;
        log::info!(
            "rag: loaded {} documents ({} dims) from {}",
            index.len(),
            index.dimension,
            path.display()
        );
        Ok(index)
    }

    /// All documents must share one non-zero embedding dimension.
    pub fn from_documents(documents: Vec<Document>) -> Result<Self, IndexError> {
        let dimension = documents.first().ok_or(IndexError::Empty)?.embedding.len();
        if dimension == 0 {
            return Err(IndexError::Empty);
        }
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != dimension) {
            return Err(IndexError::Dimension {
                id: bad.id.clone(),
                expected: dimension,
                found: bad.embedding.len(),
            });
        }
        Ok(Self {
            documents,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Top `k` documents by cosine similarity, best first; equal scores keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&Document, f32)> {
        if query.len() != self.dimension {
            log::warn!(
                "rag: query embedding has {} dims, index has {}",
                query.len(),
                self.dimension
            );
            return Vec::new();
        }
        let mut scored: Vec<(&Document, f32)> = self
            .documents
            .iter()
            .map(|d| (d, cosine(query, &d.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Retrieval plus generation: question and history in, answer text out.
#[async_trait]
pub trait RagService: Send + Sync {
    async fn answer(&self, query: &str, history: &[Turn]) -> Result<String, LlmError>;
}

const CONDENSE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

fn qa_prompt(context: &str, today: &str) -> String {
    format!(
        "You are an expert real estate assistant for 'Apolo'. \
Your goal is to help users find properties and organize visits. \
Be friendly, professional, and concise. Answer in the user's language. \
Use the following context to answer the user's question. \
If the information is not in the context, say you don't have that detail and offer to help in other ways. \
Do not make up information.\n\nToday is {}.\n\nContext:\n{}",
        today, context
    )
}

fn history_messages(history: &[Turn]) -> impl Iterator<Item = ChatMessage> + '_ {
    history.iter().map(|t| match t.role {
        Role::Human => ChatMessage::user(t.text.clone()),
        Role::Assistant => ChatMessage::assistant(t.text.clone()),
    })
}

pub struct RagChain {
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    index: Arc<KnowledgeIndex>,
    top_k: usize,
}

impl RagChain {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        index: Arc<KnowledgeIndex>,
        top_k: usize,
    ) -> Self {
        Self {
            model,
            embedder,
            index,
            top_k: top_k.max(1),
        }
    }

    /// Standalone form of `query`. Falls back to the query itself if condensing fails.
    async fn standalone_question(&self, query: &str, history: &[Turn]) -> String {
        if history.is_empty() {
            return query.to_string();
        }
        let mut messages = vec![ChatMessage::system(CONDENSE_PROMPT)];
        messages.extend(history_messages(history));
        messages.push(ChatMessage::user(query));
        match self.model.complete(&messages).await {
            Ok(q) if !q.trim().is_empty() => q.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                log::warn!("rag: could not condense question, using it as is: {}", e);
                query.to_string()
            }
        }
    }
}

#[async_trait]
impl RagService for RagChain {
    async fn answer(&self, query: &str, history: &[Turn]) -> Result<String, LlmError> {
        let standalone = self.standalone_question(query, history).await;
        let vector = self.embedder.embed(&standalone).await?;
        let hits = self.index.search(&vector, self.top_k);
        log::debug!(
            "rag: {} documents for {:?} (best {:?})",
            hits.len(),
            standalone,
            hits.first().map(|(d, s)| (d.id.as_str(), *s))
        );
        let context = hits
            .iter()
            .map(|(d, _)| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let today = chrono::Local::now().format("%d/%m/%Y").to_string();

        let mut messages = vec![ChatMessage::system(qa_prompt(&context, &today))];
        messages.extend(history_messages(history));
        messages.push(ChatMessage::user(query));
        let answer = self.model.complete(&messages).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(answer.to_string())
    }
}
