//! Axum server setup and router construction.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::{AppState, api, auth, sse, ws};

/// Build the full axum router.
///
/// Chat, WebSocket and invoke routes sit behind the auth middleware; the
/// listing and health routes are open.
pub fn build_router(state: AppState, static_dir: Option<PathBuf>, cors: bool) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(sse::post_chat))
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/functions/{name}/invoke", post(api::invoke_function))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_token,
        ));

    let open = Router::new()
        .route("/api/functions", get(api::list_functions))
        .route("/api/health", get(api::health));

    let mut router = Router::new().merge(protected).merge(open).with_state(state);

    if cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
}

/// Bind, serve on a background task, and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> Result<SocketAddr, String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Server stopped: {e}");
        }
    });

    info!("Serving on {addr}");
    Ok(addr)
}
