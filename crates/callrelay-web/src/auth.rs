//! Optional bearer-token authentication.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use callrelay::config::AuthConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Identity resolved from the request's token, `None` when auth is off.
///
/// Inserted as a request extension on every route behind [`require_token`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity(pub Option<String>);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer token from the `Authorization` header, or a `token` query
/// parameter (browsers cannot set headers on WebSocket upgrades).
fn token_from(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }
    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token)
}

/// Middleware: reject requests without a known token when auth is enabled.
pub async fn require_token(
    State(auth): State<Arc<AuthConfig>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        req.extensions_mut().insert(Identity(None));
        return next.run(req).await;
    }

    let identity = token_from(&req).and_then(|t| auth.identity_for(&t).map(String::from));
    match identity {
        Some(identity) => {
            debug!("Authenticated request from {identity}");
            req.extensions_mut().insert(Identity(Some(identity)));
            next.run(req).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn token_from_header() {
        let req = Request::builder()
            .uri("/api/chat")
            .header(AUTHORIZATION, "Bearer  s3cret ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from(&req).as_deref(), Some("s3cret"));
    }

    #[test]
    fn token_from_query() {
        let req = Request::builder()
            .uri("/ws?lang=en&token=abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from(&req).as_deref(), Some("abc"));
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let req = Request::builder()
            .uri("/ws?token=a%2Bb%2Fc%3D&lang=en")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from(&req).as_deref(), Some("a+b/c="));
    }

    #[test]
    fn no_token() {
        let req = Request::builder()
            .uri("/ws")
            .header(AUTHORIZATION, "Basic Zm9v")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from(&req), None);
    }
}
