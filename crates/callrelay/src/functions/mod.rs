//! Function definitions and the registry that owns them.
//!
//! A [`FunctionDefinition`] pairs a name with an [`ArgumentParser`] and a
//! [`Handler`]. The handler is a closed enum with one variant per function
//! kind, so adding a kind is a compile-time change rather than a string match.

pub mod args;
pub mod builtin;
pub mod registry;
pub mod result;

use crate::executors::ExecutionContext;
use crate::executors::api::ApiExecutor;
use crate::executors::command::CommandExecutor;
use crate::executors::retrieval::RetrievalExecutor;
use crate::executors::script::ScriptExecutor;
use crate::executors::workflow::WorkflowExecutor;
use args::{ArgumentParser, validate_arguments};
use builtin::BrowserActionKind;
use result::DispatchResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The kind of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Api,
    Command,
    Script,
    Workflow,
    Retrieval,
    BrowserAction,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Api => "api",
            Self::Command => "command",
            Self::Script => "script",
            Self::Workflow => "workflow",
            Self::Retrieval => "retrieval",
            Self::BrowserAction => "browser_action",
        };
        f.pad(s)
    }
}

/// Execution strategy of a definition, one variant per [`FunctionKind`].
#[derive(Debug)]
pub enum Handler {
    Api(ApiExecutor),
    Command(CommandExecutor),
    Script(ScriptExecutor),
    Workflow(WorkflowExecutor),
    Retrieval(RetrievalExecutor),
    BrowserAction(BrowserActionKind),
}

impl Handler {
    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::Api(_) => FunctionKind::Api,
            Self::Command(_) => FunctionKind::Command,
            Self::Script(_) => FunctionKind::Script,
            Self::Workflow(_) => FunctionKind::Workflow,
            Self::Retrieval(_) => FunctionKind::Retrieval,
            Self::BrowserAction(_) => FunctionKind::BrowserAction,
        }
    }
}

/// Entry in the function listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FunctionKind,
    pub description: String,
}

/// A named, callable function.
///
/// Built once at startup and immutable afterwards.
#[derive(Debug)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parser: ArgumentParser,
    /// JSON Schema the parsed arguments must satisfy.
    pub parameters: Option<Value>,
    pub handler: Handler,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parser: ArgumentParser::default(),
            parameters: None,
            handler,
        }
    }

    pub fn api(name: impl Into<String>, executor: ApiExecutor) -> Self {
        Self::new(name, Handler::Api(executor))
    }

    pub fn command(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self::new(name, Handler::Command(executor))
    }

    pub fn script(name: impl Into<String>, executor: ScriptExecutor) -> Self {
        Self::new(name, Handler::Script(executor))
    }

    pub fn workflow(name: impl Into<String>, executor: WorkflowExecutor) -> Self {
        Self::new(name, Handler::Workflow(executor))
    }

    pub fn retrieval(name: impl Into<String>, executor: RetrievalExecutor) -> Self {
        Self::new(name, Handler::Retrieval(executor))
    }

    pub fn browser_action(kind: BrowserActionKind) -> Self {
        Self::new(kind.function_name(), Handler::BrowserAction(kind))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parser(mut self, parser: ArgumentParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    pub fn kind(&self) -> FunctionKind {
        self.handler.kind()
    }

    /// Run the parser, then the schema check if one is declared.
    pub fn parse_arguments(&self, raw: &str) -> Result<Value, String> {
        let args = self.parser.parse(raw)?;
        if let Some(schema) = &self.parameters {
            validate_arguments(schema, &args)?;
        }
        Ok(args)
    }

    /// Execute with already-parsed arguments. Never fails: every problem is
    /// a [`DispatchResult::Failure`].
    pub async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> DispatchResult {
        match &self.handler {
            Handler::Api(exec) => exec.execute(args, ctx).await,
            Handler::Command(exec) => exec.execute(args, ctx).await,
            Handler::Script(exec) => exec.execute(args, ctx).await,
            Handler::Workflow(exec) => exec.execute(args, ctx).await,
            Handler::Retrieval(exec) => exec.execute(args).await,
            Handler::BrowserAction(kind) => kind.execute(args),
        }
    }

    pub fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            name: self.name.clone(),
            kind: self.kind(),
            description: self.description.clone(),
        }
    }
}
