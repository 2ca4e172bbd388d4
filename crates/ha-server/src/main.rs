//! Firebase store bridge
//!
//! Connects to a running Home Assistant over its websocket API, mirrors
//! state changes into Firestore and turns trigger documents back into
//! service calls.

use anyhow::{Context as _, Result};
use clap::Parser;
use ha_config::load_yaml;
use ha_core::events::STATE_CHANGED;
use ha_event_bus::EventBus;
use ha_firebase_store::{setup, FirebaseStoreConfig, DOMAIN};
use ha_remote::EventStream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "ha-firebase-store", version, about)]
struct Args {
    /// Configuration directory
    #[arg(short, long, env = "HA_CONFIG_DIR", default_value = ".")]
    config: PathBuf,

    /// Configuration file inside the configuration directory
    #[arg(short, long, default_value = "configuration.yaml")]
    file: PathBuf,

    /// Log filter, e.g. `info` or `ha_firebase_store=debug`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref())?;

    info!(config_dir = %args.config.display(), "Starting Firebase store bridge");

    let root = load_yaml(&args.config, &args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    let config = FirebaseStoreConfig::from_root(&root)
        .with_context(|| format!("invalid {} configuration", DOMAIN))?;

    let token = config
        .web_token
        .clone()
        .context("web_token is required to subscribe to Home Assistant events")?;

    let bus = Arc::new(EventBus::new());
    let integration = setup(bus.clone(), &config, &args.config).await?;

    let stream = EventStream::new(&config.base_url, token, bus)
        .with_event_types(vec![STATE_CHANGED.to_string()])
        .spawn();

    info!(base_url = %config.base_url, "Bridge is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    stream.stop().await;
    integration.shutdown().await;

    Ok(())
}
