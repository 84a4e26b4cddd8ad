//! The value every executor produces.
//!
//! Executors never return `Err`. Whatever goes wrong (security gate, HTTP
//! status, timeout, malformed response, script error) is folded into
//! [`DispatchResult::Failure`] so the relay can always report something.

use serde::Serialize;
use serde_json::{Value, json};

/// Outcome of executing one function.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Success(SuccessPayload),
    Failure(Failure),
}

/// What a successful execution carries. Exactly one shape per result.
#[derive(Debug, Clone, PartialEq)]
pub enum SuccessPayload {
    /// A side effect the client performs (alert, navigation, modal, speech).
    BrowserAction(BrowserAction),
    /// A search or listing outcome.
    Results(Vec<Value>),
    /// Any other payload.
    Data(Value),
}

/// Client-side action descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserAction {
    pub action: String,
    pub data: Value,
    /// Human-readable confirmation relayed as a token after the action.
    #[serde(skip)]
    pub confirmation: String,
}

/// A failed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub error: String,
    /// Diagnostic trace (script failures only).
    pub stack: Option<String>,
}

impl DispatchResult {
    pub fn data(value: Value) -> Self {
        Self::Success(SuccessPayload::Data(value))
    }

    pub fn results(results: Vec<Value>) -> Self {
        Self::Success(SuccessPayload::Results(results))
    }

    pub fn browser_action(
        action: impl Into<String>,
        data: Value,
        confirmation: impl Into<String>,
    ) -> Self {
        Self::Success(SuccessPayload::BrowserAction(BrowserAction {
            action: action.into(),
            data,
            confirmation: confirmation.into(),
        }))
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(Failure {
            error: error.into(),
            stack: None,
        })
    }

    pub fn failure_with_stack(error: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Failure(Failure {
            error: error.into(),
            stack: Some(stack.into()),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The error message, if this is a failure.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure(f) => Some(&f.error),
            Self::Success(_) => None,
        }
    }

    /// Wire shape used by the direct invocation endpoint and the CLI:
    /// `{"success": true, "data": ...}`, `{"success": true, "results": [...]}`,
    /// `{"success": true, "browserAction": {...}}`, or
    /// `{"success": false, "error": "..."}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success(SuccessPayload::Data(data)) => json!({"success": true, "data": data}),
            Self::Success(SuccessPayload::Results(results)) => {
                json!({"success": true, "results": results})
            }
            Self::Success(SuccessPayload::BrowserAction(action)) => {
                json!({"success": true, "browserAction": action})
            }
            Self::Failure(Failure { error, stack: None }) => {
                json!({"success": false, "error": error})
            }
            Self::Failure(Failure {
                error,
                stack: Some(stack),
            }) => json!({"success": false, "error": error, "stack": stack}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_json_shape() {
        let result = DispatchResult::failure("Invalid response format");
        assert_eq!(
            result.to_json(),
            json!({"success": false, "error": "Invalid response format"})
        );
        assert_eq!(result.error(), Some("Invalid response format"));
        assert!(!result.is_success());
    }

    #[test]
    fn browser_action_json_omits_confirmation() {
        let result =
            DispatchResult::browser_action("alert", json!({"message": "hi"}), "Alert displayed");
        let value = result.to_json();
        assert_eq!(value["browserAction"]["action"], "alert");
        assert!(value["browserAction"].get("confirmation").is_none());
    }

    #[test]
    fn script_failure_carries_stack() {
        let result = DispatchResult::failure_with_stack("boom", "at script 'x'");
        assert_eq!(result.to_json()["stack"], "at script 'x'");
    }
}
