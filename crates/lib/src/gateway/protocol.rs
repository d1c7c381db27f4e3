//! Webhook wire types: WhatsApp Cloud API (360dialog) envelope, the GET handshake query,
//! and Twilio's form post.

use crate::channels::InboundMessage;
use serde::{Deserialize, Serialize};

/// Cloud API notification: `entry[].changes[].value.messages[]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: WebhookValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<CloudMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<CloudText>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudText {
    #[serde(default)]
    pub body: String,
}

impl WebhookEnvelope {
    /// First message of the first change, as the Cloud API delivers one per call.
    pub fn first_message(&self) -> Option<&CloudMessage> {
        self.entry
            .first()
            .and_then(|e| e.changes.first())
            .and_then(|c| c.value.messages.first())
    }
}

/// Why an inbound payload was acknowledged without processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoMessage,
    NotText,
    SelfBotNumber,
    Empty,
}

impl Skip {
    pub fn status(&self) -> &'static str {
        match self {
            Skip::NoMessage => "no_message",
            Skip::NotText => "not_text",
            Skip::SelfBotNumber => "self_bot_number",
            Skip::Empty => "empty",
        }
    }
}

fn same_number(a: &str, b: &str) -> bool {
    let digits = |s: &str| -> String { s.chars().filter(char::is_ascii_digit).collect() };
    let (a, b) = (digits(a), digits(b));
    !a.is_empty() && a == b
}

/// Drop messages from the bot itself and empty bodies.
pub fn screen(msg: InboundMessage, bot_number: Option<&str>) -> Result<InboundMessage, Skip> {
    if bot_number.is_some_and(|bot| same_number(bot, &msg.sender)) {
        return Err(Skip::SelfBotNumber);
    }
    if msg.body.trim().is_empty() {
        return Err(Skip::Empty);
    }
    Ok(msg)
}

/// Turn a Cloud API envelope into an inbound message, or the reason it is skipped.
pub fn cloud_inbound(envelope: &WebhookEnvelope) -> Result<InboundMessage, Skip> {
    let msg = envelope.first_message().ok_or(Skip::NoMessage)?;
    if msg.kind != "text" {
        return Err(Skip::NotText);
    }
    let body = msg.text.as_ref().map(|t| t.body.as_str()).unwrap_or("");
    Ok(InboundMessage::new(&msg.id, &msg.from, body))
}

/// GET /webhook subscription handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerifyQuery {
    /// The challenge to echo back when mode is `subscribe` and the token matches.
    pub fn accept(&self, expected: Option<&str>) -> Option<&str> {
        let expected = expected?;
        if self.mode.as_deref() == Some("subscribe") && self.verify_token.as_deref() == Some(expected) {
            self.challenge.as_deref()
        } else {
            None
        }
    }
}

/// Twilio inbound form fields used by the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwilioForm {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

impl TwilioForm {
    /// None when a required field is missing.
    pub fn inbound(&self) -> Option<InboundMessage> {
        let sid = self.message_sid.as_deref()?;
        let from = self.from.as_deref()?;
        let body = self.body.as_deref()?;
        let sender = from.trim().trim_start_matches("whatsapp:");
        Some(InboundMessage::new(sid, sender, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(message: serde_json::Value) -> WebhookEnvelope {
        serde_json::from_value(serde_json::json!({
            "entry": [{ "changes": [{ "value": { "messages": [message] } }] }]
        }))
        .unwrap()
    }

    #[test]
    fn text_message_is_extracted() {
        let env = envelope(serde_json::json!({
            "id": "wamid.1", "from": "5219981112233", "type": "text",
            "timestamp": "1700000000", "text": { "body": "Hola" }
        }));
        let msg = cloud_inbound(&env).unwrap();
        assert_eq!(msg.message_id, "wamid.1");
        assert_eq!(msg.sender, "5219981112233");
        assert_eq!(msg.body, "Hola");
    }

    #[test]
    fn non_text_and_empty_envelopes_are_skipped() {
        let image = envelope(serde_json::json!({ "id": "wamid.2", "from": "1", "type": "image" }));
        assert_eq!(cloud_inbound(&image).unwrap_err(), Skip::NotText);
        assert_eq!(cloud_inbound(&WebhookEnvelope::default()).unwrap_err(), Skip::NoMessage);
    }

    #[test]
    fn screening_drops_bot_and_blank_messages() {
        let own = InboundMessage::new("a", "5219980000000", "hola");
        assert_eq!(screen(own, Some("+52 998 000 0000")).unwrap_err(), Skip::SelfBotNumber);
        let blank = InboundMessage::new("b", "5215550000", "   ");
        assert_eq!(screen(blank, None).unwrap_err(), Skip::Empty);
        assert!(screen(InboundMessage::new("c", "5215550000", "hola"), Some("5219980000000")).is_ok());
    }

    #[test]
    fn handshake_requires_matching_token() {
        let q = VerifyQuery {
            mode: Some("subscribe".into()),
            verify_token: Some("secreto".into()),
            challenge: Some("42".into()),
        };
        assert_eq!(q.accept(Some("secreto")), Some("42"));
        assert_eq!(q.accept(Some("otro")), None);
        assert_eq!(q.accept(None), None);
    }

    #[test]
    fn twilio_form_strips_prefix() {
        let form = TwilioForm {
            message_sid: Some("SM1".into()),
            from: Some("whatsapp:+5215550000".into()),
            body: Some("Hola".into()),
        };
        assert_eq!(form.inbound().unwrap().sender, "+5215550000");
        let missing = TwilioForm { body: None, ..form };
        assert!(missing.inbound().is_none());
    }
}
