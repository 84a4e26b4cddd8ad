//! Convenience re-exports for common `callrelay` types.
//!
//! ```ignore
//! use callrelay::prelude::*;
//! ```
//!
//! Covers configuration, the registry and definitions, every executor, the
//! relay and its events. Backend internals (NDJSON decoding, chunk streams)
//! are left out; import those from [`backend`](crate::backend) directly.

// ── Core ────────────────────────────────────────────────────────────
pub use crate::{DEFAULT_FUNCTION_PATTERN, json_schema_for};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{FunctionSpec, RelayConfig};

// ── Functions ───────────────────────────────────────────────────────
pub use crate::functions::args::ArgumentParser;
pub use crate::functions::builtin::BrowserActionKind;
pub use crate::functions::registry::FunctionRegistry;
pub use crate::functions::result::{BrowserAction, DispatchResult, SuccessPayload};
pub use crate::functions::{FunctionDefinition, FunctionKind, FunctionSummary};

// ── Executors ───────────────────────────────────────────────────────
pub use crate::executors::api::ApiExecutor;
pub use crate::executors::command::CommandExecutor;
pub use crate::executors::retrieval::RetrievalExecutor;
pub use crate::executors::script::{ScriptContext, ScriptError, ScriptExecutor, ScriptLibrary};
pub use crate::executors::workflow::WorkflowExecutor;
pub use crate::executors::{ExecutionContext, SecurityPolicy};
pub use crate::store::{DocumentStore, InMemoryStore, StoreRegistry};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::backend::CompletionBackend;
pub use crate::backend::ollama::OllamaBackend;
pub use crate::context::RequestContext;
pub use crate::detect::FunctionCallDetector;
pub use crate::dispatch::Dispatcher;
pub use crate::relay::sink::{ChannelSink, EventSink};
pub use crate::relay::{Relay, RelayMode, RelayOptions, StreamEvent};
