//! Messaging channels (WhatsApp via Twilio or 360dialog).
//!
//! Inbound messages arrive through the gateway webhooks and are queued as
//! `InboundMessage`. Replies go out through a `Messenger`, which only knows how to
//! deliver one part; splitting and photo sequencing live in `outbound`.

mod dialog;
mod inbound;
mod outbound;
mod twilio;

pub use dialog::DialogMessenger;
pub use inbound::InboundMessage;
pub use outbound::{
    reply_parts, send_text, send_with_photos, split_body, text_parts, Messenger, MessengerError,
    OutboundPart, SendReport, MAX_CHARS_PER_MESSAGE, MAX_PHOTOS_PER_REPLY,
};
pub use twilio::{TwilioMessenger, TWILIO_API_BASE};
