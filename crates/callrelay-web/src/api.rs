//! REST endpoints: function listing, direct invocation, health.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use callrelay::dispatch::InvokeError;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;

/// GET /api/functions
pub async fn list_functions(State(app): State<AppState>) -> Json<Value> {
    let functions = app.relay.dispatcher().registry().list();
    Json(json!({"total": functions.len(), "functions": functions}))
}

/// Request body for POST /api/functions/{name}/invoke.
#[derive(Debug, Default, Deserialize)]
pub struct InvokeRequest {
    /// Raw argument text, as it would follow `FUNCTION:<name>:`. A JSON
    /// object is accepted too and passed on as its JSON text.
    #[serde(default)]
    pub arguments: Value,
}

impl InvokeRequest {
    fn raw_arguments(&self) -> String {
        match &self.arguments {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// POST /api/functions/{name}/invoke
///
/// The dispatch result JSON, including failures from the executor (200). 404
/// for an unknown name, 400 when the arguments do not parse.
pub async fn invoke_function(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<InvokeRequest>,
) -> Response {
    info!("Direct invocation of {name}");
    match app.relay.dispatcher().invoke(&name, &body.raw_arguments()).await {
        Ok(result) => Json(result.to_json()).into_response(),
        Err(e) => {
            let status = match e {
                InvokeError::NotFound(_) => StatusCode::NOT_FOUND,
                InvokeError::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
            };
            (status, Json(json!({"success": false, "error": e.to_string()}))).into_response()
        }
    }
}

/// GET /api/health
pub async fn health(State(app): State<AppState>) -> Json<Value> {
    let dispatcher = app.relay.dispatcher();
    let security = dispatcher.context().security;
    Json(json!({
        "status": "ok",
        "functions": dispatcher.registry().len(),
        "features": {
            "allowCommands": security.allow_commands,
            "allowScripts": security.allow_scripts,
            "auth": app.auth.enabled,
            "mode": app.relay.options().mode,
        },
    }))
}
