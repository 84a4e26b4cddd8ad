//! WebSocket chat channel.
//!
//! Each `{"type":"chat","message":...}` frame runs the relay once; its events
//! are written back as JSON text frames. Messages on one socket are handled
//! in the order they arrive, and the next one starts only after the previous
//! run's `done`.

use std::sync::Arc;

use axum::Extension;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use callrelay::context::RequestContext;
use callrelay::relay::sink::ChannelSink;
use callrelay::relay::{Relay, StreamEvent};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tracing::debug;

use crate::{AppState, Identity, request_context};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Chat { message: String },
}

/// GET /ws
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ctx = request_context(&headers, identity);
    ws.on_upgrade(move |socket| handle_socket(socket, app.relay, ctx))
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>, ctx: RequestContext) {
    let (mut sink, mut stream) = socket.split();
    debug!("WebSocket client connected");

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(ClientMessage::Chat { message }) = serde_json::from_str::<ClientMessage>(&text) else {
                    debug!("Ignoring malformed WebSocket message");
                    continue;
                };
                if relay_to_socket(&relay, message, &ctx, &mut sink).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!("WebSocket client disconnected");
}

/// Run the relay for one message and forward its events.
async fn relay_to_socket(
    relay: &Arc<Relay>,
    message: String,
    ctx: &RequestContext,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let message = message.trim().to_string();
    if message.is_empty() {
        ws_send(
            sink,
            &StreamEvent::Error {
                error: "Message is required".into(),
            },
        )
        .await?;
        return ws_send(sink, &StreamEvent::Done).await;
    }

    let (mut events, mut rx) = ChannelSink::channel();
    let relay = relay.clone();
    let ctx = ctx.clone();
    let task = tokio::spawn(async move {
        relay.run(&message, &ctx, &mut events).await;
    });

    while let Some(event) = rx.recv().await {
        if ws_send(sink, &event).await.is_err() {
            task.abort();
            return Err(());
        }
    }
    Ok(())
}

async fn ws_send(sink: &mut SplitSink<WebSocket, Message>, event: &StreamEvent) -> Result<(), ()> {
    let json = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
