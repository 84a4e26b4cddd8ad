//! Per-kind executors and the context they share.
//!
//! Each executor exposes `execute(&args, ..) -> DispatchResult` and converts
//! every failure (security gate, transport, status, parse, timeout) into
//! [`DispatchResult::Failure`](crate::functions::result::DispatchResult).

pub mod api;
pub mod command;
pub mod retrieval;
pub mod script;
pub mod workflow;

use command::{CommandRunner, ShellRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for executor HTTP calls (API and workflow).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide switches for the dangerous executor kinds. Both default off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    pub allow_commands: bool,
    pub allow_scripts: bool,
}

/// Shared resources every executor may use.
#[derive(Clone)]
pub struct ExecutionContext {
    pub http: reqwest::Client,
    pub security: SecurityPolicy,
    pub runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(security: SecurityPolicy) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            security,
            runner: Arc::new(ShellRunner),
        })
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Replace the process spawner (tests count spawns through this).
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_defaults_off() {
        let policy = SecurityPolicy::default();
        assert!(!policy.allow_commands);
        assert!(!policy.allow_scripts);
    }

    #[test]
    fn security_reads_camel_case() {
        let policy: SecurityPolicy =
            serde_json::from_str(r#"{"allowCommands": true}"#).unwrap();
        assert!(policy.allow_commands);
        assert!(!policy.allow_scripts);
    }
}
