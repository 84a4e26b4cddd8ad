//! In-process script executor.
//!
//! Scripts are Rust routines registered by the host in a [`ScriptLibrary`]
//! and referenced by name from configuration. A script receives a
//! [`ScriptContext`] holding the call arguments and three capabilities
//! (logger, timer, byte buffers). Nothing else about the process is passed
//! in. This is a capability convention between host and script, not an
//! isolation boundary: a script is still trusted Rust code.

use super::ExecutionContext;
use crate::functions::result::DispatchResult;
use futures::FutureExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SCRIPTS_DISABLED: &str = "Script execution is disabled by security policy";

/// Longest sleep a script timer grants.
pub const MAX_SCRIPT_SLEEP: Duration = Duration::from_secs(60);

pub type ScriptFuture = Pin<Box<dyn Future<Output = Result<Value, ScriptError>> + Send>>;
pub type ScriptFn = Arc<dyn Fn(ScriptContext) -> ScriptFuture + Send + Sync>;

// ── ScriptError ────────────────────────────────────────────────────

/// Error raised by a script, with the frames it passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
    pub stack: Vec<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Push a frame describing where the error travelled through.
    pub fn context(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }

    /// Frames joined innermost first.
    pub fn stack_trace(&self) -> String {
        let mut trace = format!("Error: {}", self.message);
        for frame in &self.stack {
            trace.push_str("\n    at ");
            trace.push_str(frame);
        }
        trace
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<String> for ScriptError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ScriptError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// ── Capabilities ───────────────────────────────────────────────────

/// Captures script log lines and mirrors them to tracing.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    script: String,
    lines: Arc<Mutex<Vec<String>>>,
}

impl ScriptLogger {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("[script {}] {message}", self.script);
        self.push(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("[script {}] {message}", self.script);
        self.push(format!("WARN {message}"));
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Everything logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Timer scheduling for scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptTimer;

impl ScriptTimer {
    /// Sleep, capped at [`MAX_SCRIPT_SLEEP`].
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration.min(MAX_SCRIPT_SLEEP)).await;
    }

    /// Run `fut`, failing if it takes longer than `duration`.
    pub async fn timeout<T>(
        &self,
        duration: Duration,
        fut: impl Future<Output = T>,
    ) -> Result<T, ScriptError> {
        tokio::time::timeout(duration, fut).await.map_err(|_| {
            ScriptError::new(format!("timed out after {}ms", duration.as_millis()))
        })
    }
}

/// Byte helpers: hex and UTF-8 conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptBuffers;

impl ScriptBuffers {
    pub fn from_utf8(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    pub fn to_utf8(&self, bytes: &[u8]) -> Result<String, ScriptError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ScriptError::new(format!("invalid UTF-8: {e}")))
    }

    pub fn to_hex(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    pub fn from_hex(&self, text: &str) -> Result<Vec<u8>, ScriptError> {
        hex::decode(text.trim()).map_err(|e| ScriptError::new(format!("invalid hex: {e}")))
    }
}

/// Everything a script can reach.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub args: Value,
    pub logger: ScriptLogger,
    pub timer: ScriptTimer,
    pub buffers: ScriptBuffers,
}

impl ScriptContext {
    pub fn new(script: &str, args: Value) -> Self {
        Self {
            args,
            logger: ScriptLogger::new(script),
            timer: ScriptTimer,
            buffers: ScriptBuffers,
        }
    }

    /// String argument, or an error naming the missing key.
    pub fn str_arg(&self, key: &str) -> Result<&str, ScriptError> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ScriptError::new(format!("missing string argument '{key}'")))
    }
}

// ── ScriptLibrary ──────────────────────────────────────────────────

/// Named script routines available to configuration.
#[derive(Clone, Default)]
pub struct ScriptLibrary {
    scripts: HashMap<String, ScriptFn>,
}

impl fmt::Debug for ScriptLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.scripts.keys().collect();
        names.sort();
        f.debug_struct("ScriptLibrary").field("scripts", &names).finish()
    }
}

impl ScriptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine under `name`.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, routine: F)
    where
        F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ScriptError>> + Send + 'static,
    {
        let erased = move |ctx: ScriptContext| -> ScriptFuture { Box::pin(routine(ctx)) };
        self.scripts.insert(name.into(), Arc::new(erased));
    }

    /// Register (builder pattern).
    pub fn with<F, Fut>(mut self, name: impl Into<String>, routine: F) -> Self
    where
        F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ScriptError>> + Send + 'static,
    {
        self.register(name, routine);
        self
    }

    pub fn get(&self, name: &str) -> Option<ScriptFn> {
        self.scripts.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Library with the stock scripts:
    ///
    /// - `echo`: returns its arguments.
    /// - `word_count`: counts words in `text`.
    /// - `hex_encode`: hex-encodes the UTF-8 bytes of `text`.
    /// - `delay`: sleeps `ms` milliseconds (capped) and reports it.
    pub fn with_standard_scripts() -> Self {
        Self::new()
            .with("echo", echo)
            .with("word_count", word_count)
            .with("hex_encode", hex_encode)
            .with("delay", delay)
    }
}

async fn echo(ctx: ScriptContext) -> Result<Value, ScriptError> {
    Ok(ctx.args)
}

async fn word_count(ctx: ScriptContext) -> Result<Value, ScriptError> {
    let text = ctx.str_arg("text")?;
    let words = text.split_whitespace().count();
    ctx.logger.log(format!("counted {words} words"));
    Ok(json!({"words": words, "characters": text.chars().count()}))
}

async fn hex_encode(ctx: ScriptContext) -> Result<Value, ScriptError> {
    let text = ctx.str_arg("text")?;
    let bytes = ctx.buffers.from_utf8(text);
    Ok(json!({"hex": ctx.buffers.to_hex(&bytes)}))
}

async fn delay(ctx: ScriptContext) -> Result<Value, ScriptError> {
    let ms = ctx
        .args
        .get("ms")
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
        .ok_or_else(|| ScriptError::new("missing numeric argument 'ms'"))?;
    let duration = Duration::from_millis(ms).min(MAX_SCRIPT_SLEEP);
    ctx.timer.sleep(duration).await;
    Ok(json!({"sleptMs": duration.as_millis() as u64}))
}

// ── ScriptExecutor ─────────────────────────────────────────────────

/// Runs one library script.
#[derive(Clone)]
pub struct ScriptExecutor {
    script: String,
    routine: Option<ScriptFn>,
}

impl fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("script", &self.script)
            .field("bound", &self.routine.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

impl ScriptExecutor {
    pub fn new(script: impl Into<String>, routine: ScriptFn) -> Self {
        Self {
            script: script.into(),
            routine: Some(routine),
        }
    }

    /// Resolve `script` from a library. A name the library lacks yields an
    /// executor that fails at invocation.
    pub fn from_library(script: impl Into<String>, library: &ScriptLibrary) -> Self {
        let script = script.into();
        let routine = library.get(&script);
        Self { script, routine }
    }

    /// An executor with no routine.
    pub fn unbound(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            routine: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.routine.is_some()
    }

    pub async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> DispatchResult {
        if !ctx.security.allow_scripts {
            return DispatchResult::failure(SCRIPTS_DISABLED);
        }
        let Some(routine) = &self.routine else {
            return DispatchResult::failure(format!("Script '{}' is not registered", self.script));
        };

        let frame = format!("script '{}'", self.script);
        let script_ctx = ScriptContext::new(&self.script, args.clone());
        let logger = script_ctx.logger.clone();

        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| routine(script_ctx))) {
            Ok(fut) => fut,
            Err(payload) => {
                let message = format!("Script panicked: {}", panic_message(payload.as_ref()));
                return DispatchResult::failure_with_stack(message, format!("at {frame}"));
            }
        };

        let result = AssertUnwindSafe(fut).catch_unwind().await;
        debug!("Script {} finished ({} log lines)", self.script, logger.lines().len());

        match result {
            Ok(Ok(value)) => DispatchResult::data(value),
            Ok(Err(err)) => {
                let err = err.context(frame);
                warn!("Script {} failed: {}", self.script, err.message);
                DispatchResult::failure_with_stack(err.message.clone(), err.stack_trace())
            }
            Err(payload) => {
                let message = format!("Script panicked: {}", panic_message(payload.as_ref()));
                warn!("{message} ({frame})");
                DispatchResult::failure_with_stack(message, format!("at {frame}"))
            }
        }
    }
}
