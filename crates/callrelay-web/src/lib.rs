//! HTTP, SSE and WebSocket front end for the `callrelay` pipeline.
//!
//! # Quick start
//!
//! ```ignore
//! use callrelay::prelude::*;
//! use callrelay_web::{WebConfig, spawn_web};
//! use std::sync::Arc;
//!
//! let config = RelayConfig::load("relay.json")?;
//! let relay = Arc::new(config.build_relay(&ScriptLibrary::with_standard_scripts())?);
//! let addr = spawn_web(relay, WebConfig::from_relay_config(&config)?).await?;
//! println!("Listening on http://{addr}");
//! ```
//!
//! # Endpoints
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /api/chat` | `{message}` in, `text/event-stream` of relay events out |
//! | `GET /ws` | WebSocket; `{"type":"chat","message":...}` frames, one relay run each |
//! | `GET /api/functions` | Registered functions and their count |
//! | `POST /api/functions/{name}/invoke` | Run one function directly |
//! | `GET /api/health` | Function count and feature flags |
//!
//! With auth enabled, chat, WebSocket and invoke routes require
//! `Authorization: Bearer <token>` (or `?token=` on the WebSocket URL).

mod api;
pub mod auth;
mod server;
mod sse;
mod ws;

pub use auth::Identity;
pub use server::{build_router, start_server};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT_LANGUAGE, USER_AGENT};
use callrelay::config::{AuthConfig, RelayConfig};
use callrelay::context::RequestContext;
use callrelay::relay::Relay;

/// Header carrying the client's IANA time zone.
pub const TIME_ZONE_HEADER: &str = "x-time-zone";

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3000`.
    pub bind_addr: SocketAddr,
    /// Directory served for every path the API does not claim.
    pub static_dir: Option<PathBuf>,
    /// Allow cross-origin requests from anywhere. Default: `false`.
    pub cors: bool,
    pub auth: AuthConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            static_dir: None,
            cors: false,
            auth: AuthConfig::default(),
        }
    }
}

impl WebConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Result<Self, String> {
        let addr = config.server.bind_addr();
        let bind_addr = addr
            .parse()
            .map_err(|e| format!("invalid bind address '{addr}': {e}"))?;
        Ok(Self {
            bind_addr,
            static_dir: config.server.static_dir.clone(),
            cors: config.server.cors,
            auth: config.auth.clone(),
        })
    }
}

/// Shared state for every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub auth: Arc<AuthConfig>,
}

/// Build the router and serve it on a Tokio task.
///
/// Returns the bound address; the server runs until the runtime shuts down.
pub async fn spawn_web(relay: Arc<Relay>, config: WebConfig) -> Result<SocketAddr, String> {
    let state = AppState {
        relay,
        auth: Arc::new(config.auth),
    };
    let router = build_router(state, config.static_dir, config.cors);
    start_server(router, config.bind_addr).await
}

/// What the request headers say about the caller.
pub(crate) fn request_context(headers: &HeaderMap, identity: Identity) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    // First tag only: "fr-CH, fr;q=0.9" -> "fr-CH".
    let language = header(ACCEPT_LANGUAGE.as_str()).and_then(|v| {
        v.split([',', ';'])
            .next()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(String::from)
    });

    RequestContext::default()
        .with_identity(identity.0)
        .with_user_agent(header(USER_AGENT.as_str()))
        .with_language(language)
        .with_time_zone(header(TIME_ZONE_HEADER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_context_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-CH, fr;q=0.9"));
        headers.insert(TIME_ZONE_HEADER, HeaderValue::from_static("Europe/Zurich"));

        let ctx = request_context(&headers, Identity(Some("ada".into())));
        assert_eq!(ctx.identity.as_deref(), Some("ada"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(ctx.language.as_deref(), Some("fr-CH"));
        assert_eq!(ctx.time_zone.as_deref(), Some("Europe/Zurich"));
    }

    #[test]
    fn missing_headers_stay_unknown() {
        let ctx = request_context(&HeaderMap::new(), Identity::default());
        assert_eq!(ctx, RequestContext::default());
    }

    #[test]
    fn web_config_from_relay_config() {
        let relay_config = RelayConfig::from_json(
            r#"{"server": {"host": "0.0.0.0", "port": 8080, "cors": true}}"#,
        )
        .unwrap();
        let config = WebConfig::from_relay_config(&relay_config).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert!(config.cors);
    }
}
