//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.apolo/config.json`) and environment.
//! Every secret and endpoint can be given in either place; a non-empty environment
//! variable wins over the file. `resolve_runtime` checks that everything the gateway
//! cannot run without is present.

use crate::llm::AzureOpenAiSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound messaging provider and credentials.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Lead alert recipients.
    #[serde(default)]
    pub leads: LeadsConfig,

    /// Dedup and conversation memory store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Azure OpenAI chat and embeddings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Knowledge index and property catalog files.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

/// Gateway bind, port, and webhook verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook server (default 5000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Token for the GET /webhook handshake. Overridden by WEBHOOK_VERIFY_TOKEN env.
    #[serde(default)]
    pub verify_token: Option<String>,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            verify_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingProvider {
    Twilio,
    Dialog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    /// "twilio" or "dialog". When unset, the provider with complete credentials is used
    /// (Twilio first).
    #[serde(default)]
    pub provider: Option<MessagingProvider>,

    #[serde(default)]
    pub twilio: TwilioConfig,

    #[serde(default)]
    pub dialog: DialogConfig,

    /// The bot's own number; messages from it are ignored. Overridden by BOT_NUMBER env.
    #[serde(default)]
    pub bot_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwilioConfig {
    /// Overridden by TWILIO_ACCOUNT_SID env.
    pub account_sid: Option<String>,
    /// Overridden by TWILIO_AUTH_TOKEN env.
    pub auth_token: Option<String>,
    /// Sender number, E.164 without the `whatsapp:` prefix. Overridden by TWILIO_PHONE_NUMBER env.
    pub phone_number: Option<String>,
    /// API base (default https://api.twilio.com); for tests and proxies.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogConfig {
    /// Overridden by DIALOG_BASE_URL env.
    pub base_url: Option<String>,
    /// Overridden by DIALOG_API_KEY env.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadsConfig {
    /// Agent numbers for lead alerts. Overridden by AGENT_NUMBERS / LEAD_NOTIFICATION_NUMBER env.
    #[serde(default)]
    pub notification_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Redis REST endpoint (Upstash-compatible). Overridden by REDIS_REST_URL env.
    #[serde(default)]
    pub redis_rest_url: Option<String>,
    /// Overridden by REDIS_REST_TOKEN env.
    #[serde(default)]
    pub redis_rest_token: Option<String>,
    /// Retention of processed message ids (default one day).
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Turns kept per sender (default 20).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Idle sessions expire after this many seconds. Unset: sessions never expire.
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

fn default_dedup_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_history_limit() -> usize {
    crate::session::DEFAULT_HISTORY_LIMIT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_rest_url: None,
            redis_rest_token: None,
            dedup_ttl_secs: default_dedup_ttl_secs(),
            history_limit: default_history_limit(),
            session_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Overridden by AZURE_OPENAI_ENDPOINT env.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Overridden by AZURE_OPENAI_API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chat deployment name. Overridden by AZURE_OPENAI_DEPLOYMENT_NAME env.
    #[serde(default)]
    pub deployment: Option<String>,
    /// Overridden by OPENAI_API_VERSION env.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Overridden by AZURE_EMBEDDINGS_ENDPOINT env.
    #[serde(default)]
    pub embeddings_endpoint: Option<String>,
    /// Overridden by AZURE_EMBEDDINGS_API_KEY env.
    #[serde(default)]
    pub embeddings_api_key: Option<String>,
    /// Overridden by AZURE_EMBEDDINGS_DEPLOYMENT_NAME env.
    #[serde(default = "default_embeddings_deployment")]
    pub embeddings_deployment: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Bound on each model call, including retrieval (default 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}

fn default_embeddings_deployment() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: None,
            api_version: default_api_version(),
            embeddings_endpoint: None,
            embeddings_api_key: None,
            embeddings_deployment: default_embeddings_deployment(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeConfig {
    /// Pre-embedded knowledge index (JSON). Overridden by KNOWLEDGE_INDEX_PATH env.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    /// Parsed listings (JSON array). Overridden by PROPERTY_CATALOG_PATH env.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Documents retrieved per question (default 4).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_index_path() -> PathBuf {
    PathBuf::from("apolo_index.json")
}

fn default_top_k() -> usize {
    crate::rag::DEFAULT_TOP_K
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            catalog_path: None,
            top_k: default_top_k(),
        }
    }
}

/// Environment lookup; `process_env` in production, a map in tests.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Env `name` (trimmed, non-empty) overrides the config value.
fn resolve(env: EnvLookup<'_>, name: &str, config_value: Option<&str>) -> Option<String> {
    non_empty(env(name).as_deref()).or_else(|| non_empty(config_value))
}

fn resolve_redis_with(config: &Config, env: EnvLookup<'_>) -> (Option<String>, Option<String>) {
    let url = resolve(env, "REDIS_REST_URL", config.store.redis_rest_url.as_deref());
    if let Some(warning) = legacy_redis_warning(env, url.as_deref()) {
        log::warn!("config: {}", warning);
    }
    (
        url,
        resolve(env, "REDIS_REST_TOKEN", config.store.redis_rest_token.as_deref()),
    )
}

/// Direct Redis settings (REDIS_HOST/REDIS_PORT/REDIS_PASSWORD) are not read. When they
/// are present without a REST endpoint, the store silently becomes in-memory.
fn legacy_redis_warning(env: EnvLookup<'_>, rest_url: Option<&str>) -> Option<String> {
    if rest_url.is_some() {
        return None;
    }
    let host = non_empty(env("REDIS_HOST").as_deref())?;
    Some(format!(
        "REDIS_HOST={} is set but REDIS_REST_URL is not; direct Redis connections are not supported, using the in-memory store",
        host
    ))
}

/// Parse a list of phone numbers: a JSON array (`["+52..", ".."]`) or a comma-separated
/// list. A malformed JSON array yields an empty list.
pub fn parse_number_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return match serde_json::from_str::<Vec<String>>(raw) {
            Ok(list) => list
                .iter()
                .filter_map(|s| non_empty(Some(s.as_str())))
                .collect(),
            Err(e) => {
                log::warn!("config: malformed agent number list {:?}: {}", raw, e);
                Vec::new()
            }
        };
    }
    raw.split(',').filter_map(|s| non_empty(Some(s))).collect()
}

/// Agent numbers for lead alerts: AGENT_NUMBERS and LEAD_NOTIFICATION_NUMBER env when
/// set, otherwise `leads.notificationNumbers`. Duplicates are dropped, order kept.
pub fn resolve_agent_numbers(config: &Config) -> Vec<String> {
    resolve_agent_numbers_with(config, &process_env)
}

fn resolve_agent_numbers_with(config: &Config, env: EnvLookup<'_>) -> Vec<String> {
    let mut from_env = env("AGENT_NUMBERS")
        .map(|raw| parse_number_list(&raw))
        .unwrap_or_default();
    if let Some(n) = non_empty(env("LEAD_NOTIFICATION_NUMBER").as_deref()) {
        from_env.push(n);
    }
    let numbers: Vec<String> = if from_env.is_empty() {
        config
            .leads
            .notification_numbers
            .iter()
            .filter_map(|s| non_empty(Some(s.as_str())))
            .collect()
    } else {
        from_env
    };
    let mut out: Vec<String> = Vec::with_capacity(numbers.len());
    for n in numbers {
        if !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

/// Resolve the optional property catalog: env PROPERTY_CATALOG_PATH overrides config.
pub fn resolve_catalog_path(config: &Config) -> Option<PathBuf> {
    resolve_catalog_path_with(config, &process_env)
}

fn resolve_catalog_path_with(config: &Config, env: EnvLookup<'_>) -> Option<PathBuf> {
    resolve(
        env,
        "PROPERTY_CATALOG_PATH",
        config.knowledge.catalog_path.as_deref().and_then(Path::to_str),
    )
    .map(PathBuf::from)
}

/// Resolved outbound provider credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingSettings {
    Twilio {
        account_sid: String,
        auth_token: String,
        phone_number: String,
        api_base: Option<String>,
    },
    Dialog {
        base_url: String,
        api_key: String,
    },
}

fn resolve_twilio(config: &Config, env: EnvLookup<'_>) -> Result<MessagingSettings> {
    let t = &config.messaging.twilio;
    let account_sid = resolve(env, "TWILIO_ACCOUNT_SID", t.account_sid.as_deref());
    let auth_token = resolve(env, "TWILIO_AUTH_TOKEN", t.auth_token.as_deref());
    let phone_number = resolve(env, "TWILIO_PHONE_NUMBER", t.phone_number.as_deref());
    match (account_sid, auth_token, phone_number) {
        (Some(account_sid), Some(auth_token), Some(phone_number)) => Ok(MessagingSettings::Twilio {
            account_sid,
            auth_token,
            phone_number,
            api_base: non_empty(t.api_base.as_deref()),
        }),
        _ => anyhow::bail!(
            "twilio credentials are not fully configured (TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_PHONE_NUMBER)"
        ),
    }
}

fn resolve_dialog(config: &Config, env: EnvLookup<'_>) -> Result<MessagingSettings> {
    let d = &config.messaging.dialog;
    match (
        resolve(env, "DIALOG_BASE_URL", d.base_url.as_deref()),
        resolve(env, "DIALOG_API_KEY", d.api_key.as_deref()),
    ) {
        (Some(base_url), Some(api_key)) => Ok(MessagingSettings::Dialog { base_url, api_key }),
        _ => anyhow::bail!("360dialog credentials are not fully configured (DIALOG_BASE_URL, DIALOG_API_KEY)"),
    }
}

fn resolve_messaging(config: &Config, env: EnvLookup<'_>) -> Result<MessagingSettings> {
    match config.messaging.provider {
        Some(MessagingProvider::Twilio) => resolve_twilio(config, env),
        Some(MessagingProvider::Dialog) => resolve_dialog(config, env),
        None => resolve_twilio(config, env)
            .or_else(|_| resolve_dialog(config, env))
            .context("no messaging provider configured: set Twilio or 360dialog credentials"),
    }
}

fn resolve_llm(config: &Config, env: EnvLookup<'_>) -> Result<AzureOpenAiSettings> {
    let l = &config.llm;
    let required = |name: &str, value: Option<&str>| {
        resolve(env, name, value).with_context(|| format!("{} is not configured", name))
    };
    Ok(AzureOpenAiSettings {
        endpoint: required("AZURE_OPENAI_ENDPOINT", l.endpoint.as_deref())?,
        api_key: required("AZURE_OPENAI_API_KEY", l.api_key.as_deref())?,
        deployment: required("AZURE_OPENAI_DEPLOYMENT_NAME", l.deployment.as_deref())?,
        api_version: resolve(env, "OPENAI_API_VERSION", Some(l.api_version.as_str()))
            .unwrap_or_else(default_api_version),
        embeddings_endpoint: required("AZURE_EMBEDDINGS_ENDPOINT", l.embeddings_endpoint.as_deref())?,
        embeddings_api_key: required("AZURE_EMBEDDINGS_API_KEY", l.embeddings_api_key.as_deref())?,
        embeddings_deployment: resolve(
            env,
            "AZURE_EMBEDDINGS_DEPLOYMENT_NAME",
            Some(l.embeddings_deployment.as_str()),
        )
        .unwrap_or_else(default_embeddings_deployment),
        temperature: l.temperature,
        timeout: Duration::from_secs(l.timeout_secs.max(1)),
    })
}

/// Everything the gateway needs to start, validated.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub messaging: MessagingSettings,
    pub llm: AzureOpenAiSettings,
    pub index_path: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub top_k: usize,
    pub redis_url: Option<String>,
    pub redis_token: Option<String>,
    pub verify_token: Option<String>,
    pub bot_number: Option<String>,
}

/// Validate and resolve the runtime surface from config and the process environment.
/// Missing messaging credentials, model credentials or knowledge index are fatal.
pub fn resolve_runtime(config: &Config) -> Result<RuntimeSettings> {
    resolve_runtime_with(config, &process_env)
}

pub fn resolve_runtime_with(config: &Config, env: EnvLookup<'_>) -> Result<RuntimeSettings> {
    let messaging = resolve_messaging(config, env)?;
    let llm = resolve_llm(config, env)?;
    let index_path = resolve(
        env,
        "KNOWLEDGE_INDEX_PATH",
        config.knowledge.index_path.to_str(),
    )
    .map(PathBuf::from)
    .unwrap_or_else(default_index_path);
    if !index_path.is_file() {
        anyhow::bail!("knowledge index not found at {}", index_path.display());
    }
    let catalog_path = resolve_catalog_path_with(config, env);
    let (redis_url, redis_token) = resolve_redis_with(config, env);
    Ok(RuntimeSettings {
        messaging,
        llm,
        index_path,
        catalog_path,
        top_k: config.knowledge.top_k.max(1),
        redis_url,
        redis_token,
        verify_token: resolve(env, "WEBHOOK_VERIFY_TOKEN", config.gateway.verify_token.as_deref()),
        bot_number: resolve(env, "BOT_NUMBER", config.messaging.bot_number.as_deref()),
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("APOLO_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".apolo").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or APOLO_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
