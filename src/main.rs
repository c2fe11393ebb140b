//! # LLM Chat Gateway
//!
//! Chat-completion gateway that fronts OpenAI-compatible providers and
//! returns one response shape for all of them.
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration
//! llm-chat-gateway
//!
//! # Start with a config file
//! llm-chat-gateway --config /path/to/gateway.yaml
//!
//! # Environment overrides
//! GATEWAY_PORT=9000 llm-chat-gateway
//! ```

use anyhow::{bail, Context};
use gateway_config::load_config;
use gateway_server::{AppState, Server, ServerConfig};
use gateway_telemetry::init_logging;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path(env::args().skip(1))?;
    let config = load_config(path.as_deref())
        .await
        .context("Failed to load configuration")?;

    init_logging(&config.logging.to_logging_config()).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.bind_addr(),
        "Starting LLM Chat Gateway"
    );
    if config.enabled_providers().next().is_none() {
        warn!("No providers configured; every request will be rejected");
    }

    let (state, events) = AppState::builder()
        .config(config.clone())
        .build()
        .context("Failed to build gateway state")?;

    let server_config = ServerConfig {
        bind_addr: config.server.bind_addr(),
        shutdown_grace: config.server.shutdown_grace,
    };
    Server::new(server_config, state, events).run().await?;
    Ok(())
}

/// `--config <path>`, `--config=<path>`, or a lone positional path
fn config_path(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let Some(value) = args.next() else {
                bail!("{arg} requires a path");
            };
            path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else if arg.starts_with('-') {
            bail!("Unknown argument: {arg}");
        } else {
            path = Some(PathBuf::from(arg));
        }
    }
    Ok(path)
}
