use apolo::catalog::PropertyCatalog;
use apolo::leads::Interest;
use apolo::photos;
use apolo::routing::LinkRouter;
use apolo::rules::{self, GateInput};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "apolo")]
#[command(about = "Apolo CLI: WhatsApp assistant gateway and routing inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: APOLO_CONFIG_PATH or ~/.apolo/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Serve the WhatsApp webhooks (Cloud API / 360dialog and Twilio).
    Gateway {
        /// Config file path (default: APOLO_CONFIG_PATH or ~/.apolo/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 5000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Show how a message would be routed, which keyword rules it hits, and (with --reply)
    /// which photos would be attached. No model is called.
    Analyze {
        /// Inbound message text
        message: String,

        /// Candidate reply text, used for photo selection
        #[arg(long, value_name = "TEXT")]
        reply: Option<String>,

        /// Property catalog JSON (default: knowledge.catalogPath / PROPERTY_CATALOG_PATH)
        #[arg(long, value_name = "PATH")]
        catalog: Option<PathBuf>,

        /// Run the lead gate as if the model classified the message as a lead with this
        /// interest (buy, rent, visit, inquiry)
        #[arg(long, value_name = "INTEREST")]
        interest: Option<String>,

        /// Config file path (default: APOLO_CONFIG_PATH or ~/.apolo/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not load .env: {}", e);
        }
    }

    let cli = Cli::parse();
    let default_level = match cli.command {
        Some(Commands::Gateway { .. }) => "info",
        _ => "warn",
    };
    init_logging(default_level);

    match cli.command {
        Some(Commands::Version) => {
            println!("apolo {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Analyze {
            message,
            reply,
            catalog,
            interest,
            config,
        }) => {
            if let Err(e) = run_analyze(&message, reply.as_deref(), catalog, interest.as_deref(), config) {
                log::error!("analyze failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// RUST_LOG wins; LOGGING_LEVEL (e.g. "INFO", "debug") is honoured when RUST_LOG is unset.
fn init_logging(default_level: &str) {
    let fallback = std::env::var("LOGGING_LEVEL")
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_level.to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(fallback)).init();
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(apolo::config::default_config_path);
    let dir = apolo::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = apolo::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    apolo::gateway::run_gateway(config).await
}

fn run_analyze(
    message: &str,
    reply: Option<&str>,
    catalog_path: Option<PathBuf>,
    interest: Option<&str>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let analysis = LinkRouter::default().analyze(message);
    let normalized = rules::normalize(message);
    let hit = |list: &[&'static str]| rules::find_keyword(&normalized, list);

    let mut out = json!({
        "routing": analysis,
        "rules": {
            "contact": hit(rules::CONTACT_KEYWORDS),
            "specificReference": hit(rules::SPECIFIC_REFERENCE_KEYWORDS),
            "address": hit(rules::ADDRESS_KEYWORDS),
            "photoRequest": hit(rules::PHOTO_REQUEST_KEYWORDS),
        },
        "photoTrigger": photos::photo_trigger(&analysis, false, message).map(|t| t.as_str()),
    });

    if let Some(raw) = interest {
        let interest: Interest = serde_json::from_value(json!(raw.trim().to_lowercase()))?;
        let decision = rules::evaluate_gate(&GateInput {
            is_lead: true,
            interest,
            has_property_mentions: false,
            normalized_text: &normalized,
        });
        out["leadGate"] = json!({
            "interest": interest.as_str(),
            "confirmed": decision.confirmed(),
            "rule": decision.rule,
        });
    }

    if let Some(reply) = reply {
        let catalog_path = match catalog_path {
            Some(p) => Some(p),
            None => {
                let (config, _) = apolo::config::load_config(config_path)?;
                apolo::config::resolve_catalog_path(&config)
            }
        };
        let catalog = PropertyCatalog::load_or_empty(catalog_path.as_deref());
        let selected = photos::select_photos(&catalog, reply, &analysis, false, message);
        out["photos"] = json!(selected);
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
