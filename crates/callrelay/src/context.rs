//! Request context and prompt assembly.
//!
//! [`RequestContext`] carries what the transport knows about the caller
//! (identity from auth, browser user agent, language, time zone).
//! [`PromptBuilder`] turns the system preamble, the function catalog and that
//! context into the system prompt sent with every backend request.

use crate::functions::registry::FunctionRegistry;
use chrono::{DateTime, SecondsFormat, Utc};

/// Default system preamble.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant embedded in a web application. \
Answer conversationally. When the user asks for an action that one of the \
available functions performs, reply with only the function call and nothing else.";

/// What the transport knows about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub identity: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub time_zone: Option<String>,
}

impl RequestContext {
    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_time_zone(mut self, time_zone: Option<String>) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// One `- key: value` line per known fact, server time first.
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        let mut lines = vec![format!(
            "- Current time (UTC): {}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        )];
        let facts = [
            ("User", &self.identity),
            ("Client", &self.user_agent),
            ("Language", &self.language),
            ("Time zone", &self.time_zone),
        ];
        for (label, value) in facts {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                lines.push(format!("- {label}: {value}"));
            }
        }
        lines.join("\n")
    }
}

/// Builder for multi-section system prompts.
///
/// Sections are joined with blank lines; empty sections are skipped.
///
/// ```
/// use callrelay::context::PromptBuilder;
///
/// let prompt = PromptBuilder::new("You are terse.")
///     .section("Context", "- Language: en")
///     .section("Empty", "")
///     .build();
/// assert!(prompt.contains("## Context"));
/// assert!(!prompt.contains("## Empty"));
/// ```
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    sections: Vec<String>,
}

impl PromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        let preamble = preamble.into();
        Self {
            sections: if preamble.trim().is_empty() {
                Vec::new()
            } else {
                vec![preamble]
            },
        }
    }

    /// Append `## heading` followed by `content`, unless `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The function catalog: calling syntax plus one line per function.
pub fn function_catalog(registry: &FunctionRegistry) -> String {
    if registry.is_empty() {
        return String::new();
    }
    let mut out = String::from(
        "To call a function, reply with a single line of the form \
         FUNCTION:<name>:<arguments> and nothing else.\n",
    );
    for def in registry.definitions() {
        out.push_str(&format!(
            "\n- FUNCTION:{}:{} ({}) {}",
            def.name,
            def.parser.hint(),
            def.kind(),
            def.description
        ));
    }
    out
}

/// System prompt for one request.
pub fn build_system_prompt(
    preamble: Option<&str>,
    registry: &FunctionRegistry,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> String {
    PromptBuilder::new(preamble.unwrap_or(DEFAULT_SYSTEM_PROMPT))
        .section("Available functions", function_catalog(registry))
        .section("Request context", ctx.describe(now))
        .build()
}
