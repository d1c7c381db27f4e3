//! 360dialog (WhatsApp Cloud API) sender: POST {base}/messages with `D360-API-KEY`.

use super::outbound::{Messenger, MessengerError, OutboundPart};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Cloud API limit for media captions.
const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct DialogMessenger {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DialogMessenger {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, MessengerError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    async fn post(&self, body: &Value) -> Result<String, MessengerError> {
        let url = format!("{}/messages", self.base_url);
        let res = self
            .client
            .post(&url)
            .header("D360-API-KEY", &self.api_key)
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MessengerError::Api(format!("{} {}", status, body)));
        }
        let data: SendResponse = res.json().await?;
        Ok(data
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_default())
    }
}

/// Cloud API payload: a text message, or an image with the body as caption.
fn payload(to: &str, part: &OutboundPart) -> Value {
    let to = to.trim().trim_start_matches('+');
    match &part.media_url {
        Some(link) => {
            let mut image = json!({ "link": link });
            if !part.body.is_empty() {
                image["caption"] = Value::String(part.body.clone());
            }
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "image",
                "image": image,
            })
        }
        None => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "body": part.body },
        }),
    }
}

#[async_trait]
impl Messenger for DialogMessenger {
    fn id(&self) -> &str {
        "360dialog"
    }

    async fn deliver(&self, to: &str, part: &OutboundPart) -> Result<String, MessengerError> {
        // Captions are capped; a longer body goes out as text ahead of the bare image.
        if let Some(link) = &part.media_url {
            if part.body.chars().count() > CAPTION_LIMIT {
                self.post(&payload(to, &OutboundPart::text(part.body.clone())))
                    .await?;
                return self.post(&payload(to, &OutboundPart::media(link.clone()))).await;
            }
        }
        self.post(&payload(to, part)).await
    }
}
