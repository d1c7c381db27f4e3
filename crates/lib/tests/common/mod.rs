//! In-process fakes for the pipeline's collaborators.
#![allow(dead_code)]

use apolo::catalog::{PropertyCatalog, PropertyListing};
use apolo::channels::{Messenger, MessengerError, OutboundPart};
use apolo::llm::{ChatMessage, LanguageModel, LlmError};
use apolo::orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorSettings};
use apolo::rag::RagService;
use apolo::session::Turn;
use apolo::store::{KvStore, MemoryStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SENDER: &str = "5219981112233";
pub const AGENT: &str = "5219980001111";

pub const NOT_A_LEAD: &str = r#"{"is_lead": false, "interest": "inquiry", "property_mentions": []}"#;

/// Classification model that always returns the same text.
pub struct ScriptedModel {
    reply: String,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub enum RagBehavior {
    Answer(String),
    Fail,
    Hang,
    /// Answer after a pause, like a slow model call.
    Delay(Duration, String),
}

pub struct FakeRag {
    behavior: RagBehavior,
    pub calls: AtomicUsize,
    pub history_lens: Mutex<Vec<usize>>,
}

impl FakeRag {
    pub fn new(behavior: RagBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            history_lens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RagService for FakeRag {
    async fn answer(&self, _query: &str, history: &[Turn]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lens.lock().unwrap().push(history.len());
        match &self.behavior {
            RagBehavior::Answer(text) => Ok(text.clone()),
            RagBehavior::Fail => Err(LlmError::Api("500 Internal Server Error".to_string())),
            RagBehavior::Hang => std::future::pending().await,
            RagBehavior::Delay(pause, text) => {
                tokio::time::sleep(*pause).await;
                Ok(text.clone())
            }
        }
    }
}

/// Messenger that records every part it is asked to deliver.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, OutboundPart)>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, OutboundPart)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<OutboundPart> {
        self.sent()
            .into_iter()
            .filter(|(n, _)| n == to)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn id(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, to: &str, part: &OutboundPart) -> Result<String, MessengerError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), part.clone()));
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Store whose every call fails, as when Redis is unreachable mid-flight.
pub struct DownStore;

#[async_trait]
impl KvStore for DownStore {
    fn kind(&self) -> &'static str {
        "down"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn list_range(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn list_append(
        &self,
        _: &str,
        _: &[String],
        _: usize,
        _: Option<Duration>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

pub fn catalog() -> PropertyCatalog {
    let photos: Vec<String> = (1..=6)
        .map(|i| format!("https://cdn.apolo.mx/lagos/{}.jpg", i))
        .collect();
    let listings: Vec<PropertyListing> = serde_json::from_value(serde_json::json!([
        {
            "title": "Casa en Residencial Lagos del Sol",
            "price": "$4,500,000 MXN",
            "address": "Calle Cormoranes, Cancún",
            "photos": photos,
            "agent_name": "Laura Méndez",
            "agent_phone": "+529981234567",
            "url": "https://apolo.mx/propiedades/lagos-del-sol"
        },
        {
            "title": "Oficina en Plaza Mayor",
            "price": 18000,
            "address": "Centro, Mérida",
            "photos": ["https://cdn.apolo.mx/plaza/1.jpg"]
        }
    ]))
    .unwrap();
    PropertyCatalog::from_listings(listings)
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub model: Arc<ScriptedModel>,
    pub rag: Arc<FakeRag>,
    pub messenger: Arc<RecordingMessenger>,
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        agent_numbers: vec![AGENT.to_string()],
        llm_timeout: Duration::from_millis(300),
        ..OrchestratorSettings::default()
    }
}

pub fn harness_with_store(classification: &str, rag: RagBehavior, store: Arc<dyn KvStore>) -> Harness {
    harness_with_settings(classification, rag, store, settings())
}

pub fn harness_with_settings(
    classification: &str,
    rag: RagBehavior,
    store: Arc<dyn KvStore>,
    settings: OrchestratorSettings,
) -> Harness {
    let model = Arc::new(ScriptedModel::new(classification));
    let rag = Arc::new(FakeRag::new(rag));
    let messenger = Arc::new(RecordingMessenger::default());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            store,
            model: model.clone(),
            rag: rag.clone(),
            messenger: messenger.clone(),
            catalog: Arc::new(catalog()),
        },
        settings,
    ));
    Harness {
        orchestrator,
        model,
        rag,
        messenger,
    }
}

pub fn harness(classification: &str, rag: RagBehavior) -> Harness {
    harness_with_store(classification, rag, Arc::new(MemoryStore::new()))
}
