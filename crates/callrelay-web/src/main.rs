//! Chat relay server.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p callrelay-web -- --config relay.json
//! cargo run -p callrelay-web -- --port 8080 --model llama3.2
//! ```
//!
//! ## Sending messages
//!
//! **SSE** (`POST /api/chat`):
//! ```json
//! {"message": "FUNCTION:showAlert:Deploy finished"}
//! ```
//!
//! **WebSocket** (connect to `/ws`):
//! ```json
//! {"type": "chat", "message": "What's the weather in Paris?"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use callrelay::prelude::*;
use callrelay_web::{WebConfig, spawn_web};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Function-call relay server.
#[derive(Parser)]
#[command(about = "HTTP, SSE and WebSocket server for the callrelay pipeline")]
struct Args {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the port.
    #[arg(long)]
    port: Option<u16>,

    /// Serve static files from this directory.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Override the model name.
    #[arg(long)]
    model: Option<String>,

    /// Override the LLM endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Enable command functions.
    #[arg(long)]
    allow_commands: bool,

    /// Enable script functions.
    #[arg(long)]
    allow_scripts: bool,
}

impl Args {
    fn apply_to(self, config: &mut RelayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.static_dir.is_some() {
            config.server.static_dir = self.static_dir;
        }
        if let Some(model) = self.model {
            config.llm.model = model;
        }
        if let Some(endpoint) = self.endpoint {
            config.llm.endpoint = endpoint;
        }
        config.security.allow_commands |= self.allow_commands;
        config.security.allow_scripts |= self.allow_scripts;
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 1. Configuration, with command-line overrides.
    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    args.apply_to(&mut config);

    // 2. The pipeline.
    let relay = Arc::new(config.build_relay(&ScriptLibrary::with_standard_scripts())?);
    info!(
        "{} functions registered, model {} at {}",
        relay.dispatcher().registry().len(),
        config.llm.model,
        config.llm.endpoint
    );

    // 3. Serve until interrupted.
    let addr = spawn_web(relay, WebConfig::from_relay_config(&config)?).await?;
    println!("Listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for shutdown signal: {e}"))?;
    info!("Shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args =
            Args::try_parse_from(["callrelay-web", "--port", "8080", "--allow-scripts"]).unwrap();
        let mut config = RelayConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.server.port, 8080);
        assert!(config.security.allow_scripts);
        assert!(!config.security.allow_commands);
    }

    #[test]
    fn absent_flags_keep_config() {
        let args = Args::try_parse_from(["callrelay-web"]).unwrap();
        let mut config = RelayConfig::default();
        config.security.allow_commands = true;
        args.apply_to(&mut config);
        assert!(config.security.allow_commands);
        assert_eq!(config.server.port, 3000);
    }
}
