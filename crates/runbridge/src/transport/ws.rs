// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket gateway: one session per connection.
//!
//! The gateway decodes inbound text frames into commands, forwards them to
//! the connection's [`Session`], and writes the session's outbound frames
//! back to the socket. Closing or failing the socket closes the session,
//! which reaps its process before unregistering.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::registry::SessionEntry;
use crate::session::{Session, SessionInput};
use crate::transport::auth;
use crate::transport::frame::{self, ProtocolError, ServerFrame};
use crate::transport::state::AppState;

/// Outbound frames buffered between the session and the socket writer.
const FRAME_QUEUE: usize = 256;
/// Decoded commands buffered between the socket reader and the session.
const INBOUND_QUEUE: usize = 32;

/// Query parameters on the WebSocket upgrade URL.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler, mounted at `/ws` and `/`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(code) = auth::validate_ws_token(query.token.as_deref(), state.auth_token.as_deref())
    {
        return code.to_http_response("unauthorized").into_response();
    }
    if state.shutdown.is_cancelled() {
        return ErrorCode::TooManySessions.to_http_response("server is shutting down").into_response();
    }
    let Ok(slot) = Arc::clone(&state.session_slots).try_acquire_owned() else {
        warn!(max = state.limits.max_sessions, "rejecting connection");
        return ErrorCode::TooManySessions
            .to_http_response(format!("session limit of {} reached", state.limits.max_sessions))
            .into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let entry = state.sessions.register(&state.shutdown).await;
        handle_connection(state, entry, slot, socket).await;
    })
    .into_response()
}

/// Per-connection event loop.
async fn handle_connection(
    state: Arc<AppState>,
    entry: Arc<SessionEntry>,
    slot: OwnedSemaphorePermit,
    socket: WebSocket,
) {
    info!(session = %entry.id, "client connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::channel::<ServerFrame>(FRAME_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<SessionInput>(INBOUND_QUEUE);

    let session = Session::new(
        Arc::clone(&entry),
        state.sessions.clone(),
        Arc::clone(&state.session_settings),
        frames_tx,
    );
    let mut session_task = tokio::spawn(async move {
        session.run(inbound_rx).await;
        drop(slot);
    });

    // Holds one decoded message until the session has room, so a slow
    // session never stops the outbound side from draining.
    let mut pending: Option<SessionInput> = None;

    loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                let Some(frame) = frame else {
                    // Session closed itself (force-close or shutdown).
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                if send_json(&mut ws_tx, &frame).await.is_err() {
                    debug!(session = %entry.id, "send failed");
                    break;
                }
            }
            permit = inbound_tx.reserve(), if pending.is_some() => {
                let (Ok(permit), Some(input)) = (permit, pending.take()) else {
                    break;
                };
                permit.send(input);
            }
            msg = ws_rx.next(), if pending.is_none() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        debug!(session = %entry.id, err = %e, "socket error");
                        let _ = inbound_tx.try_send(SessionInput::ChannelError(e.to_string()));
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        pending = Some(match frame::decode(text.as_str()) {
                            Ok(command) => SessionInput::Command(command),
                            Err(err) => SessionInput::Protocol(err),
                        });
                    }
                    Message::Binary(_) => pending = Some(SessionInput::Protocol(ProtocolError::Binary)),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    // Closing the inbound channel starts the session's close path. Any
    // frame it had queued is dropped with the receiver.
    drop(inbound_tx);
    drop(frames_rx);
    entry.cancel.cancel();
    match tokio::time::timeout(state.limits.close_timeout, &mut session_task).await {
        Ok(_) => info!(session = %entry.id, "client disconnected"),
        Err(_) => warn!(session = %entry.id, "session did not close in time; reaping in background"),
    }
}

/// Serialize a frame and send it as one text message.
async fn send_json<S>(tx: &mut S, frame: &ServerFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match frame::encode(frame) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
