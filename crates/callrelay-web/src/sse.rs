//! `POST /api/chat`: one relay run streamed back as server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use callrelay::relay::StreamEvent;
use callrelay::relay::sink::ChannelSink;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{AppState, Identity, request_context};

/// Request body for POST /api/chat.
#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Each relay event as one `data:` line of JSON.
fn event_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let data = serde_json::to_string(&event).unwrap_or_default();
        Some((Ok(Event::default().data(data)), rx))
    })
}

/// POST /api/chat
///
/// 400 for an empty message. Otherwise the relay runs on its own task and
/// its events are written as they are produced; the stream ends after
/// `done`. Dropping the connection closes the relay's sink.
pub async fn post_chat(
    State(app): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Message is required"})),
        )
            .into_response();
    }

    let ctx = request_context(&headers, identity);
    let (mut sink, rx) = ChannelSink::channel();
    let relay = app.relay.clone();
    tokio::spawn(async move {
        relay.run(&message, &ctx, &mut sink).await;
        debug!("SSE relay finished");
    });

    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}
