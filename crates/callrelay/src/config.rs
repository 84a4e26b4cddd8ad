//! JSON configuration and pipeline construction.
//!
//! [`RelayConfig`] is read from a JSON file (every section optional) and
//! turns into a ready [`Relay`] via [`build_relay`](RelayConfig::build_relay).
//! Function entries are validated when the file is loaded: an unknown
//! `type`, a bad name, an invalid HTTP method or an uncompilable parameter
//! schema is a load error, not a skipped entry.
//!
//! ```json
//! {
//!   "server": { "port": 8080 },
//!   "llm": { "model": "llama3.2", "mode": "inspect" },
//!   "security": { "allowCommands": true },
//!   "stores": { "docs": { "type": "memory", "directory": "./docs" } },
//!   "functions": {
//!     "weather": {
//!       "type": "api",
//!       "url": "https://wttr.in/{{city}}?format=j1",
//!       "arguments": { "format": "text", "field": "city" },
//!       "description": "Current weather for a city"
//!     },
//!     "ping": {
//!       "type": "command",
//!       "command": "ping -c 1 {{host}}",
//!       "allowedCommands": ["ping"],
//!       "arguments": { "format": "text", "field": "host" }
//!     }
//!   }
//! }
//! ```

use crate::backend::CompletionBackend;
use crate::backend::ollama::OllamaBackend;
use crate::detect::FunctionCallDetector;
use crate::dispatch::Dispatcher;
use crate::executors::api::{ApiExecutor, Endpoint, RequestBody, ResponseTransform};
use crate::executors::command::CommandExecutor;
use crate::executors::retrieval::{QueryBuilder, RetrievalExecutor};
use crate::executors::script::{ScriptExecutor, ScriptLibrary};
use crate::executors::workflow::WorkflowExecutor;
use crate::executors::{ExecutionContext, SecurityPolicy};
use crate::functions::FunctionDefinition;
use crate::functions::args::{ArgumentParser, check_schema};
use crate::functions::registry::FunctionRegistry;
use crate::relay::{Relay, RelayMode, RelayOptions};
use crate::store::{HttpStore, InMemoryStore, StoreRegistry};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Default: `"127.0.0.1"`.
    pub host: String,
    /// Default: `3000`.
    pub port: u16,
    /// Directory served at `/` when set.
    pub static_dir: Option<PathBuf>,
    /// Allow any origin. Default: `false`.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            static_dir: None,
            cors: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    /// Default: `"http://localhost:11434"`.
    pub endpoint: String,
    /// Default: `"llama3.2"`.
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    /// Default: `10`.
    pub connect_timeout_secs: u64,
    /// Default: `120`.
    pub response_timeout_secs: u64,
    /// Default: `stream`.
    pub mode: RelayMode,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            system_prompt: None,
            temperature: None,
            connect_timeout_secs: 10,
            response_timeout_secs: 120,
            mode: RelayMode::Stream,
        }
    }
}

/// Bearer-token authentication for the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Token to identity.
    pub tokens: BTreeMap<String, String>,
}

impl AuthConfig {
    pub fn identity_for(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Inline documents and/or a directory of `.txt`/`.md` files.
    Memory {
        #[serde(default)]
        documents: Vec<String>,
        #[serde(default)]
        directory: Option<PathBuf>,
    },
    Http {
        url: String,
    },
}

// ── Function specs ─────────────────────────────────────────────────

/// Fields shared by every function entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    #[serde(default)]
    pub description: Option<String>,
    /// Argument parser. Default: `auto`.
    #[serde(default)]
    pub arguments: Option<ArgumentParser>,
    /// JSON Schema for parsed arguments.
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    /// Static URL or `{{key}}` template.
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Send the parsed arguments as a JSON body.
    #[serde(default)]
    pub send_arguments: bool,
    /// Return only the value at this JSON pointer.
    #[serde(default)]
    pub result_pointer: Option<String>,
    /// Report the array at this JSON pointer as search results.
    #[serde(default)]
    pub results_pointer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    /// Command line, `{{key}}` placeholders filled verbatim.
    pub command: String,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    /// Library script name. Default: the function name.
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    /// Base URL of the workflow engine.
    pub endpoint: String,
    /// Default: the function name.
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    pub store: String,
    /// Query template. Takes precedence over `queryField`.
    #[serde(default)]
    pub query: Option<String>,
    /// Argument used as the query. Default: `"query"`.
    #[serde(default)]
    pub query_field: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One configured function, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionSpec {
    Api(ApiSpec),
    Command(CommandSpec),
    Script(ScriptSpec),
    Workflow(WorkflowSpec),
    Retrieval(RetrievalSpec),
}

impl FunctionSpec {
    pub fn common(&self) -> &CommonSpec {
        match self {
            Self::Api(s) => &s.common,
            Self::Command(s) => &s.common,
            Self::Script(s) => &s.common,
            Self::Workflow(s) => &s.common,
            Self::Retrieval(s) => &s.common,
        }
    }
}

fn parse_method(method: Option<&str>) -> Result<reqwest::Method, String> {
    let method = method.unwrap_or("GET").trim().to_ascii_uppercase();
    reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| format!("invalid HTTP method '{method}'"))
}

// ── RelayConfig ────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub security: SecurityPolicy,
    pub auth: AuthConfig,
    /// Default: [`DEFAULT_FUNCTION_PATTERN`](crate::DEFAULT_FUNCTION_PATTERN).
    pub function_pattern: String,
    /// Check user messages for calls before asking the model. Default: `true`.
    pub detect_in_messages: bool,
    pub stores: BTreeMap<String, StoreConfig>,
    pub functions: BTreeMap<String, FunctionSpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            security: SecurityPolicy::default(),
            auth: AuthConfig::default(),
            function_pattern: crate::DEFAULT_FUNCTION_PATTERN.into(),
            detect_in_messages: true,
            stores: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
        let config = Self::from_json(&text)
            .map_err(|e| format!("invalid config '{}': {e}", path.display()))?;
        info!(
            "Loaded config from {} ({} functions, {} stores)",
            path.display(),
            config.functions.len(),
            config.stores.len()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without building executors.
    pub fn validate(&self) -> Result<(), String> {
        FunctionCallDetector::with_pattern(&self.function_pattern)?;

        let name_re = Regex::new(r"^[A-Za-z0-9_]+$").map_err(|e| e.to_string())?;
        for (name, spec) in &self.functions {
            if !name_re.is_match(name) {
                return Err(format!(
                    "function name '{name}' must contain only letters, digits and underscores"
                ));
            }
            if let Some(schema) = &spec.common().parameters {
                check_schema(schema).map_err(|e| format!("function '{name}': {e}"))?;
            }
            if let FunctionSpec::Api(api) = spec {
                parse_method(api.method.as_deref()).map_err(|e| format!("function '{name}': {e}"))?;
            }
        }
        if self.auth.enabled && self.auth.tokens.is_empty() {
            warn!("Auth is enabled but no tokens are configured; every protected request will be rejected");
        }
        Ok(())
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            mode: self.llm.mode,
            detect_in_messages: self.detect_in_messages,
            response_timeout: Duration::from_secs(self.llm.response_timeout_secs),
            system_prompt: self.llm.system_prompt.clone(),
        }
    }

    pub fn build_execution_context(&self) -> Result<ExecutionContext, String> {
        ExecutionContext::new(self.security)
    }

    pub fn build_stores(&self, http: &reqwest::Client) -> Result<StoreRegistry, String> {
        let mut stores = StoreRegistry::new();
        for (name, store) in &self.stores {
            match store {
                StoreConfig::Memory {
                    documents,
                    directory,
                } => {
                    let mut memory = match directory {
                        Some(dir) => InMemoryStore::from_dir(dir)
                            .map_err(|e| format!("store '{name}': {e}"))?,
                        None => InMemoryStore::default(),
                    };
                    for doc in documents {
                        memory.add(doc.clone());
                    }
                    debug!("Store {name}: {} documents in memory", memory.len());
                    stores.insert(name.clone(), Arc::new(memory));
                }
                StoreConfig::Http { url } => {
                    stores.insert(name.clone(), Arc::new(HttpStore::new(http.clone(), url.clone())));
                }
            }
        }
        Ok(stores)
    }

    /// Built-ins plus every configured function. Configured entries with a
    /// built-in's name replace it.
    pub fn build_registry(
        &self,
        scripts: &ScriptLibrary,
        stores: &StoreRegistry,
    ) -> Result<FunctionRegistry, String> {
        let mut registry = FunctionRegistry::new();
        for (name, spec) in &self.functions {
            let def = build_definition(name, spec, scripts, stores)
                .map_err(|e| format!("function '{name}': {e}"))?;
            registry.register(def);
        }
        info!("Registered {} functions", registry.len());
        Ok(registry)
    }

    pub fn build_backend(&self) -> Result<OllamaBackend, String> {
        Ok(OllamaBackend::new(&self.llm.endpoint, &self.llm.model)?
            .with_temperature(self.llm.temperature)
            .with_connect_timeout(Duration::from_secs(self.llm.connect_timeout_secs)))
    }

    /// The whole pipeline, talking to the configured Ollama endpoint.
    pub fn build_relay(&self, scripts: &ScriptLibrary) -> Result<Relay, String> {
        let backend = self.build_backend()?;
        self.build_relay_with_backend(scripts, Arc::new(backend))
    }

    /// The whole pipeline with a caller-supplied backend.
    pub fn build_relay_with_backend(
        &self,
        scripts: &ScriptLibrary,
        backend: Arc<dyn CompletionBackend>,
    ) -> Result<Relay, String> {
        let context = self.build_execution_context()?;
        let stores = self.build_stores(&context.http)?;
        let registry = self.build_registry(scripts, &stores)?;
        let detector = FunctionCallDetector::with_pattern(&self.function_pattern)?;
        let dispatcher = Dispatcher::new(Arc::new(registry), context);
        Ok(Relay::new(dispatcher, detector, backend).with_options(self.relay_options()))
    }
}

fn build_definition(
    name: &str,
    spec: &FunctionSpec,
    scripts: &ScriptLibrary,
    stores: &StoreRegistry,
) -> Result<FunctionDefinition, String> {
    let def = match spec {
        FunctionSpec::Api(api) => {
            let endpoint = if api.url.contains("{{") {
                Endpoint::Template(api.url.clone())
            } else {
                Endpoint::Static(api.url.clone())
            };
            let mut exec = ApiExecutor::new(endpoint).with_method(parse_method(api.method.as_deref())?);
            for (header, value) in &api.headers {
                exec = exec.with_header(header.clone(), value.clone());
            }
            if api.send_arguments {
                exec = exec.with_body(RequestBody::Arguments);
            }
            if let Some(pointer) = &api.results_pointer {
                exec = exec.with_transform(ResponseTransform::Listing {
                    pointer: pointer.clone(),
                });
            } else if let Some(pointer) = &api.result_pointer {
                exec = exec.with_transform(ResponseTransform::Pointer(pointer.clone()));
            }
            FunctionDefinition::api(name, exec)
        }
        FunctionSpec::Command(cmd) => {
            let mut exec = CommandExecutor::template(cmd.command.clone())
                .with_allowed_prefixes(cmd.allowed_commands.clone());
            if let Some(secs) = cmd.timeout_secs {
                exec = exec.with_timeout(Duration::from_secs(secs));
            }
            if let Some(max) = cmd.max_output_bytes {
                exec = exec.with_max_output_bytes(max);
            }
            FunctionDefinition::command(name, exec)
        }
        FunctionSpec::Script(script) => {
            let script_name = script.script.as_deref().unwrap_or(name);
            let exec = ScriptExecutor::from_library(script_name, scripts);
            if !exec.is_bound() {
                warn!("Script '{script_name}' for function {name} is not in the script library");
            }
            FunctionDefinition::script(name, exec)
        }
        FunctionSpec::Workflow(wf) => {
            let webhook_id = wf.webhook_id.as_deref().unwrap_or(name);
            let mut exec = WorkflowExecutor::new(wf.endpoint.clone(), webhook_id);
            if let Some(token) = &wf.token {
                exec = exec.with_token(token.clone());
            }
            FunctionDefinition::workflow(name, exec)
        }
        FunctionSpec::Retrieval(r) => {
            let store = stores.get(&r.store);
            if store.is_none() {
                warn!("Store '{}' for function {name} is not configured", r.store);
            }
            let mut exec = RetrievalExecutor::new(r.store.clone(), store);
            if let Some(template) = &r.query {
                exec = exec.with_query(QueryBuilder::Template(template.clone()));
            } else if let Some(field) = &r.query_field {
                exec = exec.with_query(QueryBuilder::Field(field.clone()));
            }
            if let Some(limit) = r.limit {
                exec = exec.with_limit(limit);
            }
            FunctionDefinition::retrieval(name, exec)
        }
    };

    let common = spec.common();
    let mut def = def.with_description(common.description.clone().unwrap_or_default());
    if let Some(parser) = &common.arguments {
        def = def.with_parser(parser.clone());
    }
    if let Some(schema) = &common.parameters {
        def = def.with_parameters(schema.clone());
    }
    Ok(def)
}
