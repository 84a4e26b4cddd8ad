//! Dispatch of detected calls and classification of their results.

use crate::detect::DetectedCall;
use crate::executors::ExecutionContext;
use crate::functions::registry::FunctionRegistry;
use crate::functions::result::{BrowserAction, DispatchResult, Failure, SuccessPayload};
use crate::preview;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Error from [`Dispatcher::invoke`], before any executor ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    NotFound(String),
    InvalidArguments { name: String, error: String },
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "Function '{name}' not found"),
            Self::InvalidArguments { name, error } => {
                write!(f, "Invalid arguments for '{name}': {error}")
            }
        }
    }
}

/// Resolves calls against the registry and runs their executors.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    context: ExecutionContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>, context: ExecutionContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Execute a detected call. The name is looked up again so this is
    /// correct even for calls that did not come from the detector.
    pub async fn dispatch(&self, call: &DetectedCall) -> DispatchResult {
        let name = &call.function_name;
        let Some(def) = self.registry.get(name) else {
            return DispatchResult::failure(format!("Function '{name}' not found"));
        };

        info!("[function] {name}({})", preview(&call.raw_arguments, 120));
        let start = Instant::now();
        let result = def.execute(&call.arguments, &self.context).await;
        debug!(
            "Function {name} ({}) finished in {:.0}ms, success={}",
            def.kind(),
            start.elapsed().as_secs_f64() * 1000.0,
            result.is_success()
        );
        trace!("Function {name} result: {:?}", result);
        result
    }

    /// Parse raw arguments for `name` and dispatch, without going through
    /// pattern detection.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> Result<DispatchResult, InvokeError> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;
        let arguments = def
            .parse_arguments(raw_arguments)
            .map_err(|error| InvokeError::InvalidArguments {
                name: name.to_string(),
                error,
            })?;
        let call = DetectedCall {
            function_name: name.to_string(),
            raw_arguments: raw_arguments.to_string(),
            arguments,
        };
        Ok(self.dispatch(&call).await)
    }
}

// ── Classification ─────────────────────────────────────────────────

/// How the relay reports a result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    BrowserAction {
        action: String,
        data: Value,
        confirmation: String,
    },
    Listing {
        results: Vec<Value>,
    },
    Payload {
        data: Value,
    },
    Error {
        message: String,
    },
}

/// Shape a result for the relay.
///
/// Typed results map directly. A plain data object is inspected the same way
/// a loosely shaped result would be: a `browserAction` object wins, then a
/// `results` array, then `success: false` with an `error`; anything else is
/// a generic payload.
pub fn classify(result: DispatchResult) -> Outcome {
    match result {
        DispatchResult::Failure(Failure { error, .. }) => Outcome::Error { message: error },
        DispatchResult::Success(SuccessPayload::BrowserAction(BrowserAction {
            action,
            data,
            confirmation,
        })) => Outcome::BrowserAction {
            action,
            data,
            confirmation,
        },
        DispatchResult::Success(SuccessPayload::Results(results)) => Outcome::Listing { results },
        DispatchResult::Success(SuccessPayload::Data(data)) => classify_data(data),
    }
}

fn classify_data(data: Value) -> Outcome {
    if let Some(action) = data.get("browserAction").filter(|a| a.is_object()) {
        let name = action.get("action").and_then(Value::as_str).unwrap_or_default();
        if !name.is_empty() {
            return Outcome::BrowserAction {
                action: name.to_string(),
                data: action.get("data").cloned().unwrap_or(Value::Null),
                confirmation: action
                    .get("confirmation")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
        }
    }
    if let Some(Value::Array(results)) = data.get("results") {
        return Outcome::Listing {
            results: results.clone(),
        };
    }
    if data.get("success") == Some(&Value::Bool(false)) {
        let message = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Function failed")
            .to_string();
        return Outcome::Error { message };
    }
    Outcome::Payload { data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::SecurityPolicy;
    use crate::executors::command::{COMMANDS_DISABLED, CommandExecutor};
    use crate::functions::FunctionDefinition;
    use serde_json::json;

    fn dispatcher(registry: FunctionRegistry) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            ExecutionContext::new(SecurityPolicy::default()).unwrap(),
        )
    }

    #[tokio::test]
    async fn dispatch_rechecks_name() {
        let d = dispatcher(FunctionRegistry::new());
        let call = DetectedCall {
            function_name: "ghost".into(),
            raw_arguments: String::new(),
            arguments: json!({}),
        };
        assert_eq!(
            d.dispatch(&call).await.error(),
            Some("Function 'ghost' not found")
        );
    }

    #[tokio::test]
    async fn invoke_parses_and_runs() {
        let d = dispatcher(FunctionRegistry::new());
        let result = d.invoke("showAlert", "hi").await.unwrap();
        assert_eq!(
            classify(result),
            Outcome::BrowserAction {
                action: "alert".into(),
                data: json!({"message": "hi"}),
                confirmation: "Alert displayed: \"hi\"".into(),
            }
        );
    }

    #[tokio::test]
    async fn invoke_reports_missing_and_bad_arguments() {
        let d = dispatcher(FunctionRegistry::new());
        assert_eq!(
            d.invoke("ghost", "").await.unwrap_err(),
            InvokeError::NotFound("ghost".into())
        );

        let d = dispatcher(FunctionRegistry::new().with(
            FunctionDefinition::command("run", CommandExecutor::template("ls"))
                .with_parser(crate::functions::args::ArgumentParser::Json),
        ));
        let err = d.invoke("run", "[").await.unwrap_err();
        assert!(matches!(err, InvokeError::InvalidArguments { .. }));
        let result = d.invoke("run", "{}").await.unwrap();
        assert_eq!(result.error(), Some(COMMANDS_DISABLED));
    }

    #[test]
    fn classify_typed_results() {
        assert_eq!(
            classify(DispatchResult::results(vec![json!("a")])),
            Outcome::Listing {
                results: vec![json!("a")]
            }
        );
        assert_eq!(
            classify(DispatchResult::failure("bad")),
            Outcome::Error {
                message: "bad".into()
            }
        );
        assert_eq!(
            classify(DispatchResult::data(json!({"temp": 3}))),
            Outcome::Payload {
                data: json!({"temp": 3})
            }
        );
    }

    #[test]
    fn classify_promotes_loose_data() {
        let listing = classify(DispatchResult::data(json!({"results": [1, 2]})));
        assert_eq!(
            listing,
            Outcome::Listing {
                results: vec![json!(1), json!(2)]
            }
        );

        let action = classify(DispatchResult::data(
            json!({"browserAction": {"action": "speak", "data": {"text": "x"}}}),
        ));
        assert!(matches!(action, Outcome::BrowserAction { ref action, .. } if action == "speak"));

        let error = classify(DispatchResult::data(json!({"success": false, "error": "nope"})));
        assert_eq!(
            error,
            Outcome::Error {
                message: "nope".into()
            }
        );
    }
}
