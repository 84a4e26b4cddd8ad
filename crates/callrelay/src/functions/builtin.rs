//! Built-in browser actions.
//!
//! These handlers run nothing on the server. They echo their single string
//! argument back as an action descriptor the client performs, and never fail.

use super::FunctionDefinition;
use super::args::ArgumentParser;
use super::result::DispatchResult;
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Client-side action performed by a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserActionKind {
    Alert,
    OpenWindow,
    Modal,
    Speak,
}

#[derive(Deserialize, JsonSchema)]
struct AlertArgs {
    /// Text shown in the alert dialog.
    message: String,
}

#[derive(Deserialize, JsonSchema)]
struct OpenWindowArgs {
    /// URL to open in a new window.
    url: String,
}

#[derive(Deserialize, JsonSchema)]
struct ModalArgs {
    /// Content rendered inside the modal.
    content: String,
}

#[derive(Deserialize, JsonSchema)]
struct SpeakArgs {
    /// Text read aloud by the client's speech synthesis.
    text: String,
}

impl BrowserActionKind {
    pub const ALL: [BrowserActionKind; 4] = [Self::Alert, Self::OpenWindow, Self::Modal, Self::Speak];

    /// Registered function name.
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Alert => "showAlert",
            Self::OpenWindow => "openWindow",
            Self::Modal => "showModal",
            Self::Speak => "speak",
        }
    }

    /// Action tag sent to the client.
    pub fn action(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::OpenWindow => "open",
            Self::Modal => "modal",
            Self::Speak => "speak",
        }
    }

    /// Name of the single payload field.
    pub fn field(self) -> &'static str {
        match self {
            Self::Alert => "message",
            Self::OpenWindow => "url",
            Self::Modal => "content",
            Self::Speak => "text",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Alert => "Show an alert dialog in the user's browser",
            Self::OpenWindow => "Open a URL in a new browser window",
            Self::Modal => "Display content in a modal dialog",
            Self::Speak => "Read text aloud using the browser's speech synthesis",
        }
    }

    fn schema(self) -> Value {
        match self {
            Self::Alert => json_schema_for::<AlertArgs>(),
            Self::OpenWindow => json_schema_for::<OpenWindowArgs>(),
            Self::Modal => json_schema_for::<ModalArgs>(),
            Self::Speak => json_schema_for::<SpeakArgs>(),
        }
    }

    fn confirmation(self, value: &str) -> String {
        match self {
            Self::Alert => format!("Alert displayed: \"{value}\""),
            Self::OpenWindow => format!("Opened window: \"{value}\""),
            Self::Modal => format!("Modal displayed: \"{value}\""),
            Self::Speak => format!("Speaking: \"{value}\""),
        }
    }

    /// The payload when `args` has the typed shape.
    fn typed_payload(self, args: &Value) -> Option<String> {
        let args = args.clone();
        match self {
            Self::Alert => serde_json::from_value::<AlertArgs>(args).ok().map(|a| a.message),
            Self::OpenWindow => serde_json::from_value::<OpenWindowArgs>(args).ok().map(|a| a.url),
            Self::Modal => serde_json::from_value::<ModalArgs>(args).ok().map(|a| a.content),
            Self::Speak => serde_json::from_value::<SpeakArgs>(args).ok().map(|a| a.text),
        }
    }

    /// Pass the payload field through as a browser action. A missing field
    /// becomes empty text and a non-string value its JSON text.
    pub fn execute(self, args: &Value) -> DispatchResult {
        let value = self.typed_payload(args).unwrap_or_else(|| match args.get(self.field()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        });
        let mut data = Map::new();
        data.insert(self.field().to_string(), Value::String(value.clone()));
        DispatchResult::browser_action(self.action(), Value::Object(data), self.confirmation(&value))
    }

    /// Full definition registered by [`FunctionRegistry::new`](super::registry::FunctionRegistry::new).
    pub fn definition(self) -> FunctionDefinition {
        FunctionDefinition::browser_action(self)
            .with_description(self.description())
            .with_parser(ArgumentParser::text(self.field()))
            .with_parameters(self.schema())
    }
}

/// Definitions for every built-in action.
pub fn builtin_definitions() -> Vec<FunctionDefinition> {
    BrowserActionKind::ALL
        .iter()
        .map(|kind| kind.definition())
        .collect()
}
