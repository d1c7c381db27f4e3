//! Outbound messages: provider trait, long-text splitting and multi-part sends.
//!
//! Each provider message carries at most one media attachment. Long bodies are split
//! into sequential chunks; only the first chunk may carry media. Extra photos follow
//! as text-less messages.

use async_trait::async_trait;

/// Conservative per-message character ceiling (Twilio rejects bodies over 1600).
pub const MAX_CHARS_PER_MESSAGE: usize = 1500;

/// Photos sent per reply at most.
pub const MAX_PHOTOS_PER_REPLY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("messenger request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("messenger api error: {0}")]
    Api(String),
}

/// One provider message: text (possibly empty) and zero or one media URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPart {
    pub body: String,
    pub media_url: Option<String>,
}

impl OutboundPart {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media_url: None,
        }
    }

    pub fn media(url: impl Into<String>) -> Self {
        Self {
            body: String::new(),
            media_url: Some(url.into()),
        }
    }
}

/// Messaging provider: delivers one part to a phone number.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Provider id for logs (e.g. "twilio").
    fn id(&self) -> &str;

    /// Send one part to `to` (digits with optional leading '+'). Returns the provider's message id.
    async fn deliver(&self, to: &str, part: &OutboundPart) -> Result<String, MessengerError>;
}

/// Outcome of a multi-part send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
}

impl SendReport {
    pub fn all_failed(&self) -> bool {
        self.sent == 0 && self.failed > 0
    }
}

const SENTENCE_ENDS: &[&str] = &[". ", "! ", "? ", "; "];

/// Split `text` into chunks of at most `limit` characters. Prefers paragraph breaks,
/// then line breaks, then sentence ends, then spaces, as long as the chunk keeps at
/// least a third of the window; otherwise cuts hard. Whitespace at chunk boundaries is
/// dropped. Short text (including empty) is returned as a single chunk.
pub fn split_body(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let text = text.trim();
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let Some((window_end, _)) = remaining.char_indices().nth(limit) else {
            chunks.push(remaining.to_string());
            break;
        };
        let window = &remaining[..window_end];
        let split_at = soft_boundary(window, limit).unwrap_or(window_end);
        let chunk = remaining[..split_at].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

/// Byte offset to end the chunk at, if a natural boundary sits late enough in `window`.
fn soft_boundary(window: &str, limit: usize) -> Option<usize> {
    let min_chars = (limit / 3).max(1);
    let long_enough = |end: usize| window[..end].chars().count() >= min_chars;

    let paragraph = window.rfind("\n\n");
    let line = window.rfind('\n');
    let sentence = SENTENCE_ENDS
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|i| i + 1))
        .max();
    let space = window.rfind(' ');

    [paragraph, line, sentence, space]
        .into_iter()
        .flatten()
        .find(|&end| end > 0 && long_enough(end))
}

/// Parts for one text body: chunks in order, `media` attached to the first only.
pub fn text_parts(body: &str, media: Option<&str>) -> Vec<OutboundPart> {
    split_body(body, MAX_CHARS_PER_MESSAGE)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| OutboundPart {
            body: chunk,
            media_url: if i == 0 { media.map(str::to_string) } else { None },
        })
        .collect()
}

/// Parts for a reply with photos: the first photo rides with the first text chunk,
/// each further photo (up to four in total) is its own text-less message.
pub fn reply_parts(body: &str, photos: &[String]) -> Vec<OutboundPart> {
    let mut parts = text_parts(body, photos.first().map(String::as_str));
    parts.extend(
        photos
            .iter()
            .take(MAX_PHOTOS_PER_REPLY)
            .skip(1)
            .map(|url| OutboundPart::media(url.clone())),
    );
    parts
}

async fn deliver_all(messenger: &dyn Messenger, to: &str, parts: &[OutboundPart]) -> SendReport {
    let mut report = SendReport::default();
    let total = parts.len();
    for (i, part) in parts.iter().enumerate() {
        match messenger.deliver(to, part).await {
            Ok(id) => {
                report.sent += 1;
                log::info!(
                    "{}: sent to {} ({}), part {}/{}, media: {}",
                    messenger.id(),
                    to,
                    id,
                    i + 1,
                    total,
                    part.media_url.is_some()
                );
            }
            Err(e) => {
                report.failed += 1;
                log::error!(
                    "{}: failed to send part {}/{} to {}: {}",
                    messenger.id(),
                    i + 1,
                    total,
                    to,
                    e
                );
            }
        }
    }
    report
}

/// Send `body` (split as needed) with an optional media URL on the first chunk.
pub async fn send_text(
    messenger: &dyn Messenger,
    to: &str,
    body: &str,
    media: Option<&str>,
) -> SendReport {
    deliver_all(messenger, to, &text_parts(body, media)).await
}

/// Send `body` plus up to four photos. Failures are counted, not fatal.
pub async fn send_with_photos(
    messenger: &dyn Messenger,
    to: &str,
    body: &str,
    photos: &[String],
) -> SendReport {
    let parts = reply_parts(body, photos);
    let report = deliver_all(messenger, to, &parts).await;
    if !photos.is_empty() {
        log::info!(
            "{}: reply to {} with {} photo(s): {} sent, {} failed",
            messenger.id(),
            to,
            photos.len().min(MAX_PHOTOS_PER_REPLY),
            report.sent,
            report.failed
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_body("Hola", 1500), vec!["Hola"]);
        assert_eq!(split_body("", 1500), vec![""]);
    }

    #[test]
    fn chunks_respect_limit_and_round_trip() {
        let paragraph = "La casa tiene tres recámaras y jardín. Está cerca de la playa! ¿Quieres verla?\n";
        let text = paragraph.repeat(60);
        let chunks = split_body(&text, 200);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 200));
        assert_eq!(squash(&chunks.concat()), squash(&text));
    }

    #[test]
    fn prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a ".repeat(60).trim(), "b ".repeat(60).trim());
        let chunks = split_body(&text, 150);
        assert_eq!(chunks[0], "a ".repeat(60).trim());
        assert_eq!(chunks[1], "b ".repeat(60).trim());
    }

    #[test]
    fn hard_cut_without_boundaries() {
        let text = "ñ".repeat(3100);
        let chunks = split_body(&text, 1500);
        assert_eq!(
            chunks.iter().map(|c| c.chars().count()).collect::<Vec<_>>(),
            vec![1500, 1500, 100]
        );
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn media_only_on_first_chunk() {
        let text = "palabra ".repeat(400);
        let parts = text_parts(&text, Some("https://cdn.example.com/1.jpg"));
        assert!(parts.len() > 1);
        assert!(parts[0].media_url.is_some());
        assert!(parts[1..].iter().all(|p| p.media_url.is_none()));
    }

    #[test]
    fn extra_photos_are_separate_and_capped() {
        let photos: Vec<String> = (0..6).map(|i| format!("https://cdn.example.com/{}.jpg", i)).collect();
        let parts = reply_parts("Mira esta casa", &photos);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].body, "Mira esta casa");
        assert_eq!(parts[0].media_url.as_deref(), Some("https://cdn.example.com/0.jpg"));
        assert_eq!(parts[3], OutboundPart::media("https://cdn.example.com/3.jpg"));
    }

    struct FlakyMessenger {
        sent: Mutex<Vec<OutboundPart>>,
    }

    #[async_trait]
    impl Messenger for FlakyMessenger {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _to: &str, part: &OutboundPart) -> Result<String, MessengerError> {
            if part.media_url.as_deref() == Some("bad") {
                return Err(MessengerError::Api("400 invalid media".into()));
            }
            self.sent.lock().unwrap().push(part.clone());
            Ok("SM1".to_string())
        }
    }

    #[tokio::test]
    async fn failed_part_does_not_abort_the_rest() {
        let m = FlakyMessenger {
            sent: Mutex::new(Vec::new()),
        };
        let photos = vec!["ok1".to_string(), "bad".to_string(), "ok2".to_string()];
        let report = send_with_photos(&m, "+5215550000", "Hola", &photos).await;
        assert_eq!(report, SendReport { sent: 2, failed: 1 });
        assert_eq!(m.sent.lock().unwrap().len(), 2);
    }
}
