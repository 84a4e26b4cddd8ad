//! Detection of textual function calls.
//!
//! A call is a text that, once trimmed, is entirely `FUNCTION:<name>:<args>`.
//! Calls embedded in a longer message are not detected, and only one call
//! per text is recognized. Unknown names and unparseable arguments are not
//! errors: the relay treats them as plain chat. They get their own
//! [`Detection`] variants and log lines so they can be told apart from text
//! that was never a call.

use crate::functions::registry::FunctionRegistry;
use crate::preview;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// A call that matched the pattern, names a registered function, and whose
/// arguments parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCall {
    pub function_name: String,
    pub raw_arguments: String,
    pub arguments: Value,
}

/// Outcome of checking one text.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Call(DetectedCall),
    /// The text is not shaped like a call.
    NotACall,
    /// Shaped like a call, but the name is not registered.
    UnknownFunction { name: String },
    /// Registered name, but the argument parser rejected the text.
    InvalidArguments { name: String, error: String },
}

impl Detection {
    /// The call, if any. Every other outcome means "treat as chat".
    pub fn into_call(self) -> Option<DetectedCall> {
        match self {
            Self::Call(call) => Some(call),
            _ => None,
        }
    }
}

/// Matches the process-wide function-call pattern.
#[derive(Debug, Clone)]
pub struct FunctionCallDetector {
    pattern: Regex,
}

impl FunctionCallDetector {
    /// Compile a pattern. It must capture the name and the arguments, either
    /// as named groups `name` and `args` or as groups 1 and 2.
    pub fn with_pattern(pattern: &str) -> Result<Self, String> {
        let pattern =
            Regex::new(pattern).map_err(|e| format!("invalid function pattern: {e}"))?;
        let named = pattern.capture_names().flatten().any(|n| n == "name")
            && pattern.capture_names().flatten().any(|n| n == "args");
        if !named && pattern.captures_len() < 3 {
            return Err(
                "function pattern must capture the function name and its arguments".into(),
            );
        }
        Ok(Self { pattern })
    }

    /// Detector for [`DEFAULT_FUNCTION_PATTERN`](crate::DEFAULT_FUNCTION_PATTERN).
    pub fn standard() -> Result<Self, String> {
        Self::with_pattern(crate::DEFAULT_FUNCTION_PATTERN)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Match the trimmed text against the pattern without consulting a
    /// registry. Returns `(name, raw_arguments)`.
    pub fn scan<'t>(&self, text: &'t str) -> Option<(&'t str, &'t str)> {
        let caps = self.pattern.captures(text.trim())?;
        let name = caps.name("name").or_else(|| caps.get(1))?.as_str();
        let args = caps
            .name("args")
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        Some((name, args))
    }

    /// Full detection: match, check the name, parse the arguments.
    pub fn detect(&self, text: &str, registry: &FunctionRegistry) -> Detection {
        let Some((name, raw)) = self.scan(text) else {
            trace!("No function call in: {}", preview(text, 80));
            return Detection::NotACall;
        };

        let Some(def) = registry.get(name) else {
            debug!("Ignoring call to unknown function {name}");
            return Detection::UnknownFunction {
                name: name.to_string(),
            };
        };

        match def.parse_arguments(raw) {
            Ok(arguments) => {
                debug!("Detected call {name}({})", preview(raw, 120));
                Detection::Call(DetectedCall {
                    function_name: name.to_string(),
                    raw_arguments: raw.to_string(),
                    arguments,
                })
            }
            Err(error) => {
                warn!("Ignoring call to {name}: {error}");
                Detection::InvalidArguments {
                    name: name.to_string(),
                    error,
                }
            }
        }
    }
}
