//! Command-line relay: send messages through the pipeline and print events.
//!
//! Each event is printed to stdout as one JSON line. Logs go to stderr and
//! follow `RUST_LOG` (default `info`).
//!
//! ```sh
//! # One message
//! callrelay --config relay.json --message "FUNCTION:showAlert:hello"
//!
//! # Every stdin line is a message
//! echo "what time is it?" | callrelay --model llama3.2
//!
//! # Registered functions
//! callrelay --config relay.json --list
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use callrelay::prelude::*;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Relay chat messages to an LLM and dispatch the function calls they contain.
#[derive(Parser)]
#[command(name = "callrelay")]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Message to relay. Without this, reads one message per stdin line.
    #[arg(long)]
    message: Option<String>,

    /// Override the LLM endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the model name.
    #[arg(long)]
    model: Option<String>,

    /// Override the relay mode (`stream` or `inspect`).
    #[arg(long)]
    mode: Option<RelayMode>,

    /// Enable command functions.
    #[arg(long)]
    allow_commands: bool,

    /// Enable script functions.
    #[arg(long)]
    allow_scripts: bool,

    /// Print the registered functions and exit.
    #[arg(long)]
    list: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Relay one message, printing events as they arrive.
async fn relay_message(relay: &Arc<Relay>, message: String) -> Result<(), String> {
    let (mut sink, mut rx) = ChannelSink::channel();
    let relay = relay.clone();
    let task = tokio::spawn(async move {
        relay
            .run(&message, &RequestContext::default(), &mut sink)
            .await;
    });

    while let Some(event) = rx.recv().await {
        let line = serde_json::to_string(&event)
            .map_err(|e| format!("failed to encode event: {e}"))?;
        println!("{line}");
    }
    task.await.map_err(|e| format!("relay task failed: {e}"))
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_tracing();

    // 1. Configuration, with command-line overrides.
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.llm.endpoint = endpoint;
    }
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(mode) = cli.mode {
        config.llm.mode = mode;
    }
    config.security.allow_commands |= cli.allow_commands;
    config.security.allow_scripts |= cli.allow_scripts;

    // 2. The pipeline.
    let relay = Arc::new(config.build_relay(&ScriptLibrary::with_standard_scripts())?);

    if cli.list {
        for summary in relay.dispatcher().registry().list() {
            println!("{:<20} {:<15} {}", summary.name, summary.kind, summary.description);
        }
        return Ok(());
    }

    // 3. Messages.
    if let Some(message) = cli.message {
        return relay_message(&relay, message).await;
    }
    for line in std::io::stdin().lines() {
        let line = line.map_err(|e| format!("failed to read stdin: {e}"))?;
        if line.trim().is_empty() {
            continue;
        }
        relay_message(&relay, line).await?;
    }
    Ok(())
}
