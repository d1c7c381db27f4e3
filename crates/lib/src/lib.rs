//! Apolo core library: the WhatsApp assistant's message pipeline (routing, lead
//! qualification, photo selection, dedup and conversation memory), its provider clients,
//! and the webhook gateway used by the CLI.

pub mod agent;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod gateway;
pub mod init;
pub mod leads;
pub mod llm;
pub mod orchestrator;
pub mod photos;
pub mod rag;
pub mod routing;
pub mod rules;
pub mod session;
pub mod store;
