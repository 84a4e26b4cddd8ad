//! Function-call detection, dispatch, and streaming relay for LLM chat backends.
//!
//! `callrelay` sits between a user's chat message and an LLM completion
//! backend. Models (or users) request side effects by emitting a single-line
//! textual call of the form `FUNCTION:<name>:<arguments>`. The relay detects
//! that pattern, routes the call to a registered handler (HTTP API, shell
//! command, in-process script, workflow webhook, document retrieval, or a
//! browser-side action), and reports the outcome to the caller as an ordered
//! stream of typed events. Messages without a call are forwarded to the
//! backend and its tokens are relayed as they arrive.
//!
//! # Getting started
//!
//! ```ignore
//! use callrelay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let config = RelayConfig::load("relay.json")?;
//!     let relay = config.build_relay(&ScriptLibrary::with_standard_scripts())?;
//!
//!     let mut events: Vec<StreamEvent> = Vec::new();
//!     relay
//!         .run("FUNCTION:showAlert:Build complete", &RequestContext::default(), &mut events)
//!         .await;
//!
//!     for event in &events {
//!         println!("{}", serde_json::to_string(event).unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Register functions:** [`FunctionRegistry`](functions::registry::FunctionRegistry)
//!   owns every [`FunctionDefinition`](functions::FunctionDefinition). The four
//!   browser actions (`showAlert`, `openWindow`, `showModal`, `speak`) are
//!   registered at construction; everything else comes from
//!   [`RelayConfig`](config::RelayConfig) or from code.
//! - **Execute calls:** the per-kind executors live in [`executors`]. Each one
//!   converts every failure into a [`DispatchResult::Failure`](functions::result::DispatchResult)
//!   rather than returning an error.
//! - **Detect calls:** [`FunctionCallDetector`](detect::FunctionCallDetector)
//!   matches the process-wide pattern and runs the function's argument parser.
//! - **Dispatch:** [`Dispatcher`](dispatch::Dispatcher) resolves a detected call
//!   and [`classify`](dispatch::classify) shapes its result for the relay.
//! - **Stream:** [`Relay`](relay::Relay) drives the per-request state machine
//!   and writes [`StreamEvent`](relay::StreamEvent)s to an
//!   [`EventSink`](relay::sink::EventSink).
//! - **Talk to the model:** [`backend`] defines the
//!   [`CompletionBackend`](backend::CompletionBackend) seam and the Ollama-style
//!   NDJSON client.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`functions`] | Definitions, registry, argument parsers, built-in browser actions, dispatch results |
//! | [`executors`] | API, command, script, workflow, and retrieval executors plus their shared context |
//! | [`detect`] | `FUNCTION:<name>:<args>` detection |
//! | [`dispatch`] | Dispatch coordinator and result classification |
//! | [`relay`] | Stream events, sinks, per-request sessions, the relay state machine |
//! | [`backend`] | LLM completion collaborator, NDJSON stream decoding |
//! | [`context`] | Request context and prompt assembly |
//! | [`store`] | Document stores backing retrieval functions |
//! | [`config`] | JSON configuration and construction of the whole pipeline |

pub mod backend;
pub mod config;
pub mod context;
pub mod detect;
pub mod dispatch;
pub mod executors;
pub mod functions;
pub mod prelude;
pub mod relay;
pub mod store;

use schemars::JsonSchema;

// ── Constants ──────────────────────────────────────────────────────

/// User-agent sent on every outbound HTTP request.
pub const USER_AGENT: &str = concat!("callrelay/", env!("CARGO_PKG_VERSION"));

/// Default function-call pattern. Group 1 is the function name, group 2 the
/// raw argument text (greedy to the end of the trimmed input).
pub const DEFAULT_FUNCTION_PATTERN: &str = r"(?s)^FUNCTION:([A-Za-z0-9_]+):(.*)$";

/// Status text emitted before a detected call is dispatched.
pub const PROCESSING_STATUS: &str = "Processing your request...";

/// Error text emitted when a request exceeds its overall deadline.
pub const RESPONSE_TIMEOUT: &str = "Response timeout";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use callrelay::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct AlertArgs {
///     message: String,
/// }
///
/// let schema = json_schema_for::<AlertArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"message".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

/// Shorten text for log lines, appending `...` when cut. Counts chars, not
/// bytes, so multi-byte input never splits.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
