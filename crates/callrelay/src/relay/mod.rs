//! The per-request relay.
//!
//! [`Relay::run`] takes one user message through the state machine
//!
//! ```text
//! Idle -> AwaitingFirstDecision -> Forwarding  -> Terminating -> Closed
//!                               -> Dispatching ->
//! ```
//!
//! and writes [`StreamEvent`]s to an [`EventSink`]. Whatever happens (a call
//! result, backend failure, timeout, client disconnect) the sink sees at most
//! one `done`, and nothing after it.

pub mod session;
pub mod sink;

use crate::backend::{CompletionBackend, GenerateRequest};
use crate::context::{RequestContext, build_system_prompt};
use crate::detect::{DetectedCall, FunctionCallDetector};
use crate::dispatch::{Dispatcher, Outcome, classify};
use crate::{PROCESSING_STATUS, RESPONSE_TIMEOUT, preview};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session::RelaySession;
use sink::EventSink;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

// ── Events ─────────────────────────────────────────────────────────

/// One event on the wire. Serializes as a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        text: String,
    },
    Status {
        text: String,
    },
    FunctionResult {
        data: Value,
    },
    SearchResults {
        results: Vec<Value>,
        #[serde(rename = "totalResults")]
        total_results: usize,
    },
    BrowserAction {
        action: String,
        data: Value,
    },
    Error {
        error: String,
    },
    Done,
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    /// The `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Status { .. } => "status",
            Self::FunctionResult { .. } => "function_result",
            Self::SearchResults { .. } => "search_results",
            Self::BrowserAction { .. } => "browser_action",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

// ── State and options ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AwaitingFirstDecision,
    Forwarding,
    Dispatching,
    Terminating,
    Closed,
}

/// Where the relay looks for a call besides the user message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Stream backend tokens straight through.
    #[default]
    Stream,
    /// Ask for a full completion first and check it for a call; a plain
    /// answer goes out as a single token.
    Inspect,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::Inspect => "inspect",
        })
    }
}

impl std::str::FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "inspect" => Ok(Self::Inspect),
            other => Err(format!("unknown relay mode '{other}' (expected stream or inspect)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub mode: RelayMode,
    /// Check the user message itself for a call.
    pub detect_in_messages: bool,
    /// Deadline for the whole request.
    pub response_timeout: Duration,
    /// System preamble; `None` uses the default.
    pub system_prompt: Option<String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mode: RelayMode::Stream,
            detect_in_messages: true,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            system_prompt: None,
        }
    }
}

// ── Relay ──────────────────────────────────────────────────────────

/// Detection, dispatch and backend streaming for chat requests.
///
/// Immutable once built; share it behind an `Arc` and call [`run`](Self::run)
/// from one task per request.
pub struct Relay {
    dispatcher: Dispatcher,
    detector: FunctionCallDetector,
    backend: Arc<dyn CompletionBackend>,
    options: RelayOptions,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("dispatcher", &self.dispatcher)
            .field("pattern", &self.detector.pattern())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(
        dispatcher: Dispatcher,
        detector: FunctionCallDetector,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            dispatcher,
            detector,
            backend,
            options: RelayOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Relay one message. Always terminates the sink's stream.
    pub async fn run(&self, message: &str, ctx: &RequestContext, sink: &mut dyn EventSink) {
        let mut session = RelaySession::new(sink);
        let deadline = self.options.response_timeout;

        if tokio::time::timeout(deadline, self.drive(message, ctx, &mut session))
            .await
            .is_err()
        {
            warn!(
                "Request timed out after {:.0}s: {}",
                deadline.as_secs_f64(),
                preview(message, 80)
            );
            session.fail(RESPONSE_TIMEOUT);
        }
        session.finish();
    }

    async fn drive(&self, message: &str, ctx: &RequestContext, session: &mut RelaySession<'_>) {
        session.transition(RelayState::AwaitingFirstDecision);
        let registry = self.dispatcher.registry();

        if self.options.detect_in_messages
            && let Some(call) = self.detector.detect(message, registry).into_call()
        {
            return self.dispatch(call, session).await;
        }

        let request = self.build_request(message, ctx);
        match self.options.mode {
            RelayMode::Stream => self.forward(&request, session).await,
            RelayMode::Inspect => {
                let text = match self.backend.generate(&request).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Backend completion failed: {e}");
                        return session.fail(e);
                    }
                };
                if let Some(call) = self.detector.detect(&text, registry).into_call() {
                    return self.dispatch(call, session).await;
                }
                session.transition(RelayState::Forwarding);
                if !text.is_empty() {
                    session.emit(StreamEvent::token(text));
                }
                session.finish();
            }
        }
    }

    fn build_request(&self, message: &str, ctx: &RequestContext) -> GenerateRequest {
        let system = build_system_prompt(
            self.options.system_prompt.as_deref(),
            self.dispatcher.registry(),
            ctx,
            chrono::Utc::now(),
        );
        GenerateRequest::new(message).with_system(system)
    }

    async fn forward(&self, request: &GenerateRequest, session: &mut RelaySession<'_>) {
        session.transition(RelayState::Forwarding);
        let mut stream = match self.backend.stream(request).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Backend stream failed to open: {e}");
                return session.fail(e);
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(text) = chunk.text
                        && !session.emit(StreamEvent::token(text))
                    {
                        // Client is gone; dropping the stream abandons the backend request.
                        debug!("Stopped relaying after client disconnect");
                        return;
                    }
                    if chunk.done {
                        return session.finish();
                    }
                }
                Err(e) => {
                    warn!("Backend stream failed: {e}");
                    return session.fail(e);
                }
            }
        }
        debug!("Backend stream ended without a done record");
        session.finish();
    }

    async fn dispatch(&self, call: DetectedCall, session: &mut RelaySession<'_>) {
        session.transition(RelayState::Dispatching);
        session.emit(StreamEvent::status(PROCESSING_STATUS));

        let result = self.dispatcher.dispatch(&call).await;
        match classify(result) {
            Outcome::BrowserAction {
                action,
                data,
                confirmation,
            } => {
                info!("Browser action {action} from {}", call.function_name);
                session.emit(StreamEvent::BrowserAction { action, data });
                if !confirmation.is_empty() {
                    session.emit(StreamEvent::token(confirmation));
                }
                session.finish();
            }
            Outcome::Listing { results } => {
                session.emit(StreamEvent::SearchResults {
                    total_results: results.len(),
                    results,
                });
                session.finish();
            }
            Outcome::Payload { data } => {
                session.emit(StreamEvent::FunctionResult { data });
                session.finish();
            }
            Outcome::Error { message } => {
                warn!("Function {} failed: {message}", call.function_name);
                session.fail(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendChunk, BackendFuture, ChunkStream};
    use crate::executors::api::ApiExecutor;
    use crate::executors::command::{CommandExecutor, CommandLimits, CommandOutput, CommandRunner, RunFuture};
    use crate::executors::testing::serve;
    use crate::executors::{ExecutionContext, SecurityPolicy};
    use crate::functions::FunctionDefinition;
    use crate::functions::args::ArgumentParser;
    use crate::functions::registry::FunctionRegistry;
    use crate::relay::sink::RecordingSink;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted backend: replays chunks, or a full completion.
    #[derive(Default)]
    struct ScriptedBackend {
        chunks: Vec<Result<BackendChunk, String>>,
        completion: String,
        open_error: Option<String>,
        stall: bool,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl CompletionBackend for ScriptedBackend {
        fn generate<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, String> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request.clone());
                if let Some(e) = &self.open_error {
                    return Err(e.clone());
                }
                Ok(self.completion.clone())
            })
        }

        fn stream<'a>(&'a self, request: &'a GenerateRequest) -> BackendFuture<'a, ChunkStream<'a>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request.clone());
                if let Some(e) = &self.open_error {
                    return Err(e.clone());
                }
                let head = futures::stream::iter(self.chunks.clone());
                if self.stall {
                    Ok(head.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(head.boxed())
                }
            })
        }
    }

    #[derive(Default)]
    struct CountingRunner {
        spawns: AtomicUsize,
    }

    impl CommandRunner for CountingRunner {
        fn run<'a>(&'a self, _command: &'a str, _limits: CommandLimits) -> RunFuture<'a> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            })
        }
    }

    fn relay_with(registry: FunctionRegistry, ctx: ExecutionContext, backend: ScriptedBackend) -> Relay {
        let dispatcher = Dispatcher::new(Arc::new(registry), ctx);
        Relay::new(
            dispatcher,
            FunctionCallDetector::standard().unwrap(),
            Arc::new(backend),
        )
    }

    fn default_ctx() -> ExecutionContext {
        ExecutionContext::new(SecurityPolicy::default()).unwrap()
    }

    async fn run(relay: &Relay, message: &str) -> RecordingSink {
        let mut sink = RecordingSink::new();
        relay.run(message, &RequestContext::default(), &mut sink).await;
        sink
    }

    /// Exactly one `done`, last; at most one `error`, right before it.
    fn assert_terminal_invariant(sink: &RecordingSink) {
        let kinds = sink.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == "done").count(), 1, "{kinds:?}");
        assert_eq!(kinds.last(), Some(&"done"), "{kinds:?}");
        let errors: Vec<usize> = kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == "error")
            .map(|(i, _)| i)
            .collect();
        assert!(errors.len() <= 1, "{kinds:?}");
        if let Some(&i) = errors.first() {
            assert_eq!(i, kinds.len() - 2, "{kinds:?}");
        }
    }

    #[tokio::test]
    async fn plain_message_streams_tokens() {
        let backend = ScriptedBackend {
            chunks: vec![
                Ok(BackendChunk::text("Hi")),
                Ok(BackendChunk {
                    text: Some(" there".into()),
                    done: true,
                }),
            ],
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend);
        let sink = run(&relay, "hello").await;
        assert_eq!(
            sink.events,
            vec![
                StreamEvent::token("Hi"),
                StreamEvent::token(" there"),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn backend_receives_catalog_in_system_prompt() {
        let backend = Arc::new(ScriptedBackend {
            chunks: vec![Ok(BackendChunk::done())],
            ..Default::default()
        });
        let relay = Relay::new(
            Dispatcher::new(Arc::new(FunctionRegistry::new()), default_ctx()),
            FunctionCallDetector::standard().unwrap(),
            backend.clone(),
        );
        let sink = run(&relay, "what can you do?").await;
        assert_eq!(sink.kinds(), ["done"]);
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].prompt, "what can you do?");
        assert!(requests[0].system.as_deref().unwrap().contains("FUNCTION:showAlert"));
    }

    #[tokio::test]
    async fn alert_call_is_dispatched() {
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), ScriptedBackend::default());
        let sink = run(&relay, "FUNCTION:showAlert:Build complete").await;
        assert_eq!(
            sink.events,
            vec![
                StreamEvent::status("Processing your request..."),
                StreamEvent::BrowserAction {
                    action: "alert".into(),
                    data: json!({"message": "Build complete"}),
                },
                StreamEvent::token("Alert displayed: \"Build complete\""),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn api_500_surfaces_single_error() {
        let base = serve(Router::new().route(
            "/weather",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let registry = FunctionRegistry::new().with(FunctionDefinition::api(
            "weather",
            ApiExecutor::get(format!("{base}/weather")),
        ));
        let relay = relay_with(registry, default_ctx(), ScriptedBackend::default());
        let sink = run(&relay, "FUNCTION:weather:Paris").await;
        assert_eq!(sink.kinds(), ["status", "error", "done"]);
        let StreamEvent::Error { error } = &sink.events[1] else {
            panic!("expected error event");
        };
        assert!(error.contains("500"), "got {error}");
        assert_terminal_invariant(&sink);
    }

    #[tokio::test]
    async fn disallowed_command_never_spawns() {
        let runner = Arc::new(CountingRunner::default());
        let ctx = ExecutionContext::new(SecurityPolicy {
            allow_commands: true,
            allow_scripts: false,
        })
        .unwrap()
        .with_runner(runner.clone());
        let registry = FunctionRegistry::new().with(
            FunctionDefinition::command(
                "run",
                CommandExecutor::template("{{cmd}}").with_allowed_prefixes(vec!["ping".into()]),
            )
            .with_parser(ArgumentParser::text("cmd")),
        );
        let relay = relay_with(registry, ctx, ScriptedBackend::default());
        let sink = run(&relay, "FUNCTION:run:rm -rf /").await;
        assert_eq!(sink.kinds(), ["status", "error", "done"]);
        let StreamEvent::Error { error } = &sink.events[1] else {
            panic!("expected error event");
        };
        assert!(error.contains("not allowed"));
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_function_falls_through_to_backend() {
        let backend = ScriptedBackend {
            chunks: vec![Ok(BackendChunk::text("no such thing")), Ok(BackendChunk::done())],
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend);
        let sink = run(&relay, "FUNCTION:launchRockets:now").await;
        assert_eq!(sink.kinds(), ["token", "done"]);
    }

    #[tokio::test]
    async fn backend_open_failure_is_error_then_done() {
        let backend = ScriptedBackend {
            open_error: Some("LLM backend HTTP 503 Service Unavailable: down".into()),
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend);
        let sink = run(&relay, "hello").await;
        assert_eq!(sink.kinds(), ["error", "done"]);
        assert_terminal_invariant(&sink);
    }

    #[tokio::test]
    async fn mid_stream_error_stops_tokens() {
        let backend = ScriptedBackend {
            chunks: vec![
                Ok(BackendChunk::text("partial")),
                Err("failed to read LLM stream: reset".into()),
                Ok(BackendChunk::text("never")),
            ],
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend);
        let sink = run(&relay, "hello").await;
        assert_eq!(sink.kinds(), ["token", "error", "done"]);
        assert_terminal_invariant(&sink);
    }

    #[tokio::test]
    async fn stalled_backend_times_out() {
        let backend = ScriptedBackend {
            chunks: vec![Ok(BackendChunk::text("thinking"))],
            stall: true,
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend).with_options(RelayOptions {
            response_timeout: Duration::from_millis(50),
            ..RelayOptions::default()
        });
        let sink = run(&relay, "hello").await;
        assert_eq!(
            sink.events,
            vec![
                StreamEvent::token("thinking"),
                StreamEvent::Error {
                    error: "Response timeout".into()
                },
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn inspect_mode_dispatches_model_call() {
        let backend = ScriptedBackend {
            completion: "  FUNCTION:speak:good morning\n".into(),
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend).with_options(RelayOptions {
            mode: RelayMode::Inspect,
            ..RelayOptions::default()
        });
        let sink = run(&relay, "say good morning").await;
        assert_eq!(sink.kinds(), ["status", "browser_action", "token", "done"]);
    }

    #[tokio::test]
    async fn inspect_mode_relays_plain_answer_once() {
        let backend = ScriptedBackend {
            completion: "Just chatting.".into(),
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend).with_options(RelayOptions {
            mode: RelayMode::Inspect,
            ..RelayOptions::default()
        });
        let sink = run(&relay, "hi").await;
        assert_eq!(sink.events, vec![StreamEvent::token("Just chatting."), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn message_detection_can_be_disabled() {
        let backend = ScriptedBackend {
            chunks: vec![Ok(BackendChunk::done())],
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend).with_options(RelayOptions {
            detect_in_messages: false,
            ..RelayOptions::default()
        });
        let sink = run(&relay, "FUNCTION:showAlert:hi").await;
        assert_eq!(sink.kinds(), ["done"]);
    }

    #[tokio::test]
    async fn client_disconnect_stops_relay() {
        let backend = ScriptedBackend {
            chunks: vec![
                Ok(BackendChunk::text("a")),
                Ok(BackendChunk::text("b")),
                Ok(BackendChunk::text("c")),
            ],
            ..Default::default()
        };
        let relay = relay_with(FunctionRegistry::new(), default_ctx(), backend);
        let mut sink = RecordingSink::disconnect_after(1);
        relay.run("hello", &RequestContext::default(), &mut sink).await;
        assert_eq!(sink.kinds(), ["token"]);
        // Only the refused token; no done is attempted after closure.
        assert_eq!(sink.rejected(), 1);
    }

    #[tokio::test]
    async fn listing_and_payload_shapes() {
        let base = serve(
            Router::new()
                .route("/list", get(|| async { axum::Json(json!({"items": ["x", "y"]})) }))
                .route("/one", get(|| async { axum::Json(json!({"temp": 7})) })),
        )
        .await;
        let registry = FunctionRegistry::new()
            .with(FunctionDefinition::api(
                "list",
                ApiExecutor::get(format!("{base}/list")).with_transform(
                    crate::executors::api::ResponseTransform::Listing {
                        pointer: "/items".into(),
                    },
                ),
            ))
            .with(FunctionDefinition::api("one", ApiExecutor::get(format!("{base}/one"))));
        let relay = relay_with(registry, default_ctx(), ScriptedBackend::default());

        let sink = run(&relay, "FUNCTION:list:").await;
        assert_eq!(
            sink.events[1],
            StreamEvent::SearchResults {
                results: vec![json!("x"), json!("y")],
                total_results: 2
            }
        );
        assert_terminal_invariant(&sink);

        let sink = run(&relay, "FUNCTION:one:").await;
        assert_eq!(
            sink.events[1],
            StreamEvent::FunctionResult {
                data: json!({"temp": 7})
            }
        );
        assert_terminal_invariant(&sink);
    }

    #[test]
    fn mode_parses_from_flag_text() {
        assert_eq!("Inspect".parse::<RelayMode>(), Ok(RelayMode::Inspect));
        assert_eq!(RelayMode::Stream.to_string(), "stream");
        assert!("batch".parse::<RelayMode>().is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        assert_eq!(
            serde_json::to_value(StreamEvent::SearchResults {
                results: vec![],
                total_results: 0
            })
            .unwrap(),
            json!({"type": "search_results", "results": [], "totalResults": 0})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Done).unwrap(),
            json!({"type": "done"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Error { error: "x".into() }).unwrap(),
            json!({"type": "error", "error": "x"})
        );
    }
}
