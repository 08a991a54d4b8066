//! Live log stream for observers.
//!
//! # Data Flow
//! ```text
//! GET /ws/logs (upgrade)
//!     → EventHub::subscribe()
//!     → {"type":"history","data":[...]}
//!     → {"type":"log","data":{...}} per append, in order
//! ```
//!
//! Client frames are ignored apart from close. The subscription is removed
//! when either side goes away.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::admin::ApiError;
use crate::events::{EventHub, Subscription};
use crate::http::server::AppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    /// Browsers cannot set headers on upgrade requests, so the token may be
    /// passed here instead.
    pub token: Option<String>,
}

pub async fn logs_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        if query.token.as_deref() != Some(expected) {
            return ApiError::Unauthorized.into_response();
        }
    }

    let hub = state.control.hub().clone();
    ws.on_upgrade(move |socket| observe(socket, hub))
}

async fn observe(socket: WebSocket, hub: Arc<EventHub>) {
    let Subscription { id, mut rx } = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(observer = id, "Log observer connected");

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode log message");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unsubscribe(id);
    tracing::debug!(observer = id, "Log observer disconnected");
}
