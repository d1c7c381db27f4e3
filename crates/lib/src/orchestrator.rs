//! Per-message pipeline.
//!
//! received -> duplicate (stop) | reset (stop) | routed -> lead confirmed (notify, stop)
//! | answered -> photos or text only. Nothing in here returns an error: every failure is
//! logged and reported through `Outcome`, so the transport is always acknowledged.

use crate::agent::{self, ResponseGenerator, DEFAULT_REPLY_TIMEOUT};
use crate::catalog::PropertyCatalog;
use crate::channels::{send_text, send_with_photos, InboundMessage, Messenger};
use crate::config::{self, Config};
use crate::dedup::{self, DedupGate};
use crate::leads::{self, Interest, LeadAssessment, LeadClassifier};
use crate::llm::LanguageModel;
use crate::photos;
use crate::rag::RagService;
use crate::routing::{LinkRouter, Strategy};
use crate::session::{self, SessionMemory, Turn};
use crate::store::KvStore;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;

/// Sent when the reply could not be generated (model error or timeout).
pub const APOLOGY_MESSAGE: &str =
    "Lo siento, tuve un problema para responder en este momento. ¿Podrías intentarlo de nuevo en unos minutos?";

/// Sent after a conversation reset.
pub const RESET_MESSAGE: &str =
    "Listo, empecemos de nuevo. ¿En qué puedo ayudarte? 🏡";

const RESET_TRIGGERS: &[&str] = &["/reset", "/nuevo"];

/// True when the message asks to start a new conversation.
pub fn is_reset(body: &str) -> bool {
    let b = body.trim();
    RESET_TRIGGERS.iter().any(|t| b.eq_ignore_ascii_case(t))
}

/// Service handles the pipeline talks to.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn KvStore>,
    pub model: Arc<dyn LanguageModel>,
    pub rag: Arc<dyn RagService>,
    pub messenger: Arc<dyn Messenger>,
    pub catalog: Arc<PropertyCatalog>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Numbers that receive lead alerts. Empty: alerts are skipped with a warning.
    pub agent_numbers: Vec<String>,
    pub dedup_ttl: Duration,
    pub history_limit: usize,
    pub session_ttl: Option<Duration>,
    /// Bound on the classification call and on reply generation.
    pub llm_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            agent_numbers: Vec::new(),
            dedup_ttl: dedup::DEFAULT_TTL,
            history_limit: session::DEFAULT_HISTORY_LIMIT,
            session_ttl: None,
            llm_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            agent_numbers: config::resolve_agent_numbers(cfg),
            dedup_ttl: Duration::from_secs(cfg.store.dedup_ttl_secs),
            history_limit: cfg.store.history_limit,
            session_ttl: cfg.store.session_ttl_secs.map(Duration::from_secs),
            llm_timeout: Duration::from_secs(cfg.llm.timeout_secs),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Duplicate,
    Reset,
    LeadConfirmed {
        interest: Interest,
        rule: &'static str,
        alerts_sent: usize,
    },
    Answered {
        strategy: Strategy,
        photos: usize,
        parts_failed: usize,
    },
    /// Reply generation failed; the apology was sent when possible.
    Failed { reason: String },
}

pub struct Orchestrator {
    dedup: DedupGate,
    memory: SessionMemory,
    router: LinkRouter,
    classifier: LeadClassifier,
    generator: ResponseGenerator,
    messenger: Arc<dyn Messenger>,
    catalog: Arc<PropertyCatalog>,
    agent_numbers: Vec<String>,
    llm_timeout: Duration,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        if settings.agent_numbers.is_empty() {
            log::warn!("orchestrator: no agent numbers configured, lead alerts will be skipped");
        }
        Self {
            dedup: DedupGate::new(deps.store.clone(), settings.dedup_ttl),
            memory: SessionMemory::new(deps.store, settings.history_limit, settings.session_ttl),
            router: LinkRouter::default(),
            classifier: LeadClassifier::new(deps.model),
            generator: ResponseGenerator::new(deps.rag, settings.llm_timeout),
            messenger: deps.messenger,
            catalog: deps.catalog,
            agent_numbers: settings.agent_numbers,
            llm_timeout: settings.llm_timeout,
        }
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Process one inbound message to completion.
    pub async fn handle(&self, msg: &InboundMessage) -> Outcome {
        if self.dedup.is_duplicate(&msg.message_id).await {
            return Outcome::Duplicate;
        }
        log::info!("orchestrator: [{}] {} => {}", msg.message_id, msg.sender, msg.body);

        if is_reset(&msg.body) {
            self.memory.save_history(&msg.sender, &[]).await;
            send_text(self.messenger.as_ref(), &msg.sender, RESET_MESSAGE, None).await;
            log::info!("orchestrator: conversation reset for {}", msg.sender);
            return Outcome::Reset;
        }

        let analysis = self.router.analyze(&msg.body);
        let assessment = self.classify(&msg.body).await;
        let decision = leads::confirm(&assessment, &msg.body);
        log::info!(
            "orchestrator: [{}] strategy={} ({}), lead={} interest={} -> {} ({})",
            msg.message_id,
            analysis.strategy.as_str(),
            analysis.reason,
            assessment.is_lead,
            assessment.interest.as_str(),
            if decision.confirmed() { "confirmed" } else { "not confirmed" },
            decision.rule
        );

        if decision.confirmed() {
            let alerts_sent = self.notify_lead(msg, &assessment).await;
            return Outcome::LeadConfirmed {
                interest: assessment.interest,
                rule: decision.rule,
                alerts_sent,
            };
        }

        let reply = match agent::run_turn(
            &self.memory,
            &self.generator,
            &msg.sender,
            &msg.body,
            &analysis,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                log::error!(
                    "orchestrator: [{}] reply generation failed for {}: {}",
                    msg.message_id,
                    msg.sender,
                    e
                );
                send_text(self.messenger.as_ref(), &msg.sender, APOLOGY_MESSAGE, None).await;
                return Outcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let photos = photos::select_photos(&self.catalog, &reply, &analysis, false, &msg.body);
        let report = send_with_photos(self.messenger.as_ref(), &msg.sender, &reply, &photos).await;
        if report.all_failed() {
            log::error!(
                "orchestrator: [{}] reply to {} could not be delivered",
                msg.message_id,
                msg.sender
            );
        }
        Outcome::Answered {
            strategy: analysis.strategy,
            photos: photos.len(),
            parts_failed: report.failed,
        }
    }

    async fn classify(&self, body: &str) -> LeadAssessment {
        match tokio::time::timeout(self.llm_timeout, self.classifier.classify(body)).await {
            Ok(a) => a,
            Err(_) => {
                log::warn!(
                    "orchestrator: lead classification timed out after {:?}",
                    self.llm_timeout
                );
                LeadAssessment::parsing_error()
            }
        }
    }

    /// Confirm to the sender and alert every agent number. Returns alerts delivered.
    async fn notify_lead(&self, msg: &InboundMessage, assessment: &LeadAssessment) -> usize {
        let confirmation = leads::confirmation_message(assessment.interest);
        send_text(self.messenger.as_ref(), &msg.sender, confirmation, None).await;
        self.memory
            .append(
                &msg.sender,
                &[Turn::human(msg.body.clone()), Turn::assistant(confirmation)],
            )
            .await;

        if self.agent_numbers.is_empty() {
            log::warn!(
                "orchestrator: lead from {} not forwarded, no agent numbers configured",
                msg.sender
            );
            return 0;
        }
        let query = format!("{} {}", msg.body, assessment.property_mentions.join(" "));
        let listing = self.catalog.best_match(&query).map(|m| m.listing);
        let alert = leads::format_agent_alert(&msg.sender, &msg.body, assessment, listing, Local::now());

        let mut delivered = 0;
        for agent in &self.agent_numbers {
            let report = send_text(self.messenger.as_ref(), agent, &alert, None).await;
            if report.failed == 0 {
                delivered += 1;
                log::info!("orchestrator: lead alert for {} sent to agent {}", msg.sender, agent);
            } else {
                log::error!("orchestrator: lead alert for {} to agent {} failed", msg.sender, agent);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_triggers_are_exact_and_case_insensitive() {
        assert!(is_reset("/reset"));
        assert!(is_reset("  /NUEVO "));
        assert!(!is_reset("/reset por favor"));
        assert!(!is_reset("reset"));
    }

    #[test]
    fn default_settings() {
        let s = OrchestratorSettings::default();
        assert_eq!(s.dedup_ttl, Duration::from_secs(86_400));
        assert_eq!(s.history_limit, 20);
        assert!(s.agent_numbers.is_empty());
    }

    #[test]
    fn settings_from_config() {
        let mut cfg = Config::default();
        cfg.leads.notification_numbers = vec!["+5219981112233".to_string()];
        cfg.store.dedup_ttl_secs = 3600;
        cfg.store.session_ttl_secs = Some(7 * 86_400);
        let s = OrchestratorSettings::from_config(&cfg);
        assert_eq!(s.dedup_ttl, Duration::from_secs(3600));
        assert_eq!(s.session_ttl, Some(Duration::from_secs(604_800)));
    }
}
