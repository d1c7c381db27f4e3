//! Gateway HTTP server: webhook endpoints, the inbound queue, and the message processor.

use crate::catalog::PropertyCatalog;
use crate::channels::{DialogMessenger, InboundMessage, Messenger, TwilioMessenger};
use crate::config::{self, Config, MessagingSettings};
use crate::gateway::protocol::{self, Skip, TwilioForm, VerifyQuery, WebhookEnvelope};
use crate::llm::AzureOpenAiClient;
use crate::orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorSettings};
use crate::rag::{KnowledgeIndex, RagChain};
use crate::store;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Inbound queue depth. Webhook handlers wait when the processor falls this far behind.
const INBOUND_QUEUE: usize = 256;

/// How long shutdown waits for in-flight messages after the listener stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Settings the webhook handlers need.
#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    pub port: u16,
    /// Shared token for the GET /webhook handshake. None: the handshake always fails.
    pub verify_token: Option<String>,
    /// Messages from this number are acknowledged and dropped.
    pub bot_number: Option<String>,
    /// Outbound provider id, reported by the health endpoint.
    pub provider: String,
}

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub settings: Arc<WebhookSettings>,
    /// Sender for inbound messages. Processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

/// Build the webhook router and start the processor that feeds `orchestrator`.
/// The returned handle finishes once the router is dropped and every accepted message
/// has been processed. Must be called inside a tokio runtime.
pub fn router(
    orchestrator: Arc<Orchestrator>,
    settings: WebhookSettings,
) -> (Router, JoinHandle<()>) {
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
    let processor = spawn_processor(orchestrator, inbound_rx);
    let state = GatewayState {
        settings: Arc::new(settings),
        inbound_tx,
    };
    let app = Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(verify_webhook).post(cloud_webhook))
        .route("/twilio/webhook", post(twilio_webhook))
        .with_state(state);
    (app, processor)
}

/// Process queued messages, each in its own task so one slow model call does not hold up
/// other senders. A panic in a message task is logged and does not stop the processor.
/// When the queue closes, the processor waits for the tasks still running.
pub fn spawn_processor(
    orchestrator: Arc<Orchestrator>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => match msg {
                    Some(msg) => {
                        tasks.spawn(process_one(orchestrator.clone(), msg));
                    }
                    None => break,
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }
        if !tasks.is_empty() {
            log::info!("gateway: inbound queue closed, waiting for {} in-flight messages", tasks.len());
        }
        while tasks.join_next().await.is_some() {}
        log::info!("gateway: inbound queue closed, processor stopped");
    })
}

async fn process_one(orchestrator: Arc<Orchestrator>, msg: InboundMessage) {
    let (message_id, sender) = (msg.message_id.clone(), msg.sender.clone());
    let task = tokio::spawn(async move { orchestrator.handle(&msg).await });
    match task.await {
        Ok(outcome) => {
            log::debug!("gateway: [{}] from {} finished: {:?}", message_id, sender, outcome)
        }
        Err(e) if e.is_panic() => {
            log::error!("gateway: [{}] from {} panicked during processing", message_id, sender)
        }
        Err(e) => log::error!("gateway: [{}] from {} was cancelled: {}", message_id, sender, e),
    }
}

fn build_messenger(settings: &MessagingSettings) -> Result<Arc<dyn Messenger>> {
    Ok(match settings {
        MessagingSettings::Twilio {
            account_sid,
            auth_token,
            phone_number,
            api_base,
        } => Arc::new(
            TwilioMessenger::new(account_sid, auth_token, phone_number, api_base.as_deref())
                .context("building twilio client")?,
        ),
        MessagingSettings::Dialog { base_url, api_key } => Arc::new(
            DialogMessenger::new(base_url, api_key).context("building 360dialog client")?,
        ),
    })
}

/// Resolve and validate the runtime, construct every service, and serve webhooks until
/// SIGINT or SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let runtime = config::resolve_runtime(&config)?;

    let store = store::connect(runtime.redis_url.as_deref(), runtime.redis_token.as_deref()).await;
    let azure = Arc::new(
        AzureOpenAiClient::new(runtime.llm.clone()).context("building azure openai client")?,
    );
    log::info!("gateway: chat deployment {}", azure.deployment());
    let index = Arc::new(
        KnowledgeIndex::load(&runtime.index_path)
            .with_context(|| format!("loading knowledge index {}", runtime.index_path.display()))?,
    );
    let catalog = Arc::new(PropertyCatalog::load_or_empty(runtime.catalog_path.as_deref()));
    log::info!("gateway: {} catalog listings", catalog.len());
    let messenger = build_messenger(&runtime.messaging)?;
    let rag = Arc::new(RagChain::new(azure.clone(), azure.clone(), index, runtime.top_k));

    let settings = WebhookSettings {
        port: config.gateway.port,
        verify_token: runtime.verify_token.clone(),
        bot_number: runtime.bot_number.clone(),
        provider: messenger.id().to_string(),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            store,
            model: azure,
            rag,
            messenger,
            catalog,
        },
        OrchestratorSettings::from_config(&config),
    ));
    let (app, processor) = router(orchestrator, settings);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    if tokio::time::timeout(DRAIN_TIMEOUT, processor).await.is_err() {
        log::warn!(
            "gateway: in-flight messages still running after {}s, stopping anyway",
            DRAIN_TIMEOUT.as_secs()
        );
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn status(s: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": s }))
}

/// Screen and enqueue one message. The JSON status tells the caller what happened to it.
async fn accept(state: &GatewayState, parsed: Result<InboundMessage, Skip>) -> (StatusCode, Json<serde_json::Value>) {
    let msg = match parsed.and_then(|m| protocol::screen(m, state.settings.bot_number.as_deref())) {
        Ok(m) => m,
        Err(skip) => {
            log::debug!("gateway: inbound skipped: {}", skip.status());
            return (StatusCode::OK, status(skip.status()));
        }
    };
    let message_id = msg.message_id.clone();
    if state.inbound_tx.send(msg).await.is_err() {
        log::error!("gateway: [{}] inbound queue closed", message_id);
        return (StatusCode::SERVICE_UNAVAILABLE, status("unavailable"));
    }
    (StatusCode::OK, status("accepted"))
}

/// POST /webhook: WhatsApp Cloud API (360dialog) notification.
async fn cloud_webhook(State(state): State<GatewayState>, body: Bytes) -> impl IntoResponse {
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("gateway: invalid webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, status("invalid_payload"));
        }
    };
    accept(&state, protocol::cloud_inbound(&envelope)).await
}

/// GET /webhook: subscription handshake. Echoes the challenge or answers 403.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    match query.accept(state.settings.verify_token.as_deref()) {
        Some(challenge) => {
            log::info!("gateway: webhook verified");
            (StatusCode::OK, challenge.to_string())
        }
        None => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
    }
}

/// POST /twilio/webhook: Twilio form post. Missing MessageSid, From or Body is a 400.
async fn twilio_webhook(
    State(state): State<GatewayState>,
    Form(form): Form<TwilioForm>,
) -> impl IntoResponse {
    match form.inbound() {
        Some(msg) => accept(&state, Ok(msg)).await,
        None => {
            log::warn!("gateway: twilio webhook missing required fields");
            (StatusCode::BAD_REQUEST, status("missing_fields"))
        }
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "provider": state.settings.provider,
        "port": state.settings.port,
    }))
}
