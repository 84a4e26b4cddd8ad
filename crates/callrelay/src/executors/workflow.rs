//! Workflow webhook executor.

use super::ExecutionContext;
use crate::functions::result::DispatchResult;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Source tag placed in every webhook envelope.
pub const WORKFLOW_SOURCE: &str = "callrelay";

/// POSTs arguments to `{base_url}/webhook/{webhook_id}`.
#[derive(Debug, Clone)]
pub struct WorkflowExecutor {
    base_url: String,
    webhook_id: String,
    token: Option<String>,
}

impl WorkflowExecutor {
    pub fn new(base_url: impl Into<String>, webhook_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            webhook_id: webhook_id.into(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn webhook_url(&self) -> String {
        format!(
            "{}/webhook/{}",
            self.base_url.trim_end_matches('/'),
            self.webhook_id
        )
    }

    pub async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> DispatchResult {
        let url = self.webhook_url();
        let envelope = json!({
            "source": WORKFLOW_SOURCE,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "data": args,
        });
        debug!("Triggering workflow {} at {url}", self.webhook_id);

        let mut req = ctx
            .http
            .post(&url)
            .header("User-Agent", crate::USER_AGENT)
            .json(&envelope);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Workflow {} request failed: {e}", self.webhook_id);
                return DispatchResult::failure(format!("Workflow request failed: {e}"));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!("Workflow {} returned HTTP {status}", self.webhook_id);
            return DispatchResult::failure(format!("Workflow returned HTTP {status}"));
        }

        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                return DispatchResult::failure(format!("failed to read workflow response: {e}"));
            }
        };
        let response = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => v,
                Err(_) => return DispatchResult::failure("Invalid response format"),
            }
        };

        DispatchResult::data(json!({
            "workflow": self.webhook_id,
            "response": response,
        }))
    }
}
