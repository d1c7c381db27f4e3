//! Inbound message from a webhook transport, queued for the orchestrator.

use chrono::{DateTime, Utc};

/// One inbound text message. Identity is `message_id`: the transport may deliver the
/// same id more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender phone identifier as the transport reports it (no `whatsapp:` prefix).
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(message_id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sender: sender.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }
}
