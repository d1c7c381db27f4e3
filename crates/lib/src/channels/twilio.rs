//! Twilio WhatsApp sender: Messages REST API, form-encoded, basic auth.

use super::outbound::{Messenger, MessengerError, OutboundPart};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// `whatsapp:+<digits>` address for Twilio.
fn whatsapp_address(number: &str) -> String {
    let n = number.trim().trim_start_matches("whatsapp:");
    if n.starts_with('+') {
        format!("whatsapp:{}", n)
    } else {
        format!("whatsapp:+{}", n)
    }
}

pub struct TwilioMessenger {
    account_sid: String,
    auth_token: String,
    from: String,
    api_base: String,
    client: reqwest::Client,
}

impl TwilioMessenger {
    pub fn new(
        account_sid: &str,
        auth_token: &str,
        phone_number: &str,
        api_base: Option<&str>,
    ) -> Result<Self, MessengerError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from: whatsapp_address(phone_number),
            api_base: api_base
                .unwrap_or(TWILIO_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    fn form(&self, to: &str, part: &OutboundPart) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("From", self.from.clone()),
            ("To", whatsapp_address(to)),
            ("Body", part.body.clone()),
        ];
        if let Some(url) = &part.media_url {
            form.push(("MediaUrl", url.clone()));
        }
        form
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    fn id(&self) -> &str {
        "twilio"
    }

    async fn deliver(&self, to: &str, part: &OutboundPart) -> Result<String, MessengerError> {
        let res = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&self.form(to, part))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MessengerError::Api(format!("{} {}", status, body)));
        }
        let msg: MessageResource = res.json().await?;
        Ok(msg.sid)
    }
}
