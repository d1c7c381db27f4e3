//! Gateway: HTTP webhook server.
//!
//! Webhook handlers only parse, screen and enqueue; a processor task runs each message
//! through the orchestrator in the background so transports are acknowledged promptly.

mod protocol;
mod server;

pub use protocol::{cloud_inbound, screen, Skip, TwilioForm, VerifyQuery, WebhookEnvelope};
pub use server::{router, run_gateway, spawn_processor, GatewayState, WebhookSettings};
