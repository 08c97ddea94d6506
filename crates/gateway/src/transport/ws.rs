// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence WebSocket gateway.
//!
//! Each upgraded socket runs one task that owns both halves of the socket,
//! drains the connection's outbound queue, and refreshes liveness on every
//! inbound frame. Close, transport error, send failure and forced
//! termination all leave the loop through the same exit path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, FromRequestParts, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, StreamExt};
use presence_wire::{ClientMessage, ServerMessage, CLOSE_GOING_AWAY};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth;
use crate::registry::{ConnId, Identity, Outbound, Registry};
use crate::state::GatewayState;

/// Query parameters for the presence WS upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceWsQuery {
    pub token: Option<String>,
}

/// Best-effort peer address. Empty when the server was not started with
/// connect info (e.g. in-memory test servers).
pub struct RemoteAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0)))
    }
}

/// `GET /ws`: WebSocket upgrade for presence tracking.
///
/// Never rejects on credentials: an unusable token just makes the connection
/// anonymous.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<PresenceWsQuery>,
    RemoteAddr(remote): RemoteAddr,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = auth::classify(state.verifier.as_ref(), query.token.as_deref());
    ws.on_upgrade(move |socket| handle_connection(state, identity, remote, socket))
}

/// Why a connection's event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Peer,
    TransportError,
    SendFailed,
    Terminated,
    Shutdown,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "closed by peer",
            Self::TransportError => "transport error",
            Self::SendFailed => "send failed",
            Self::Terminated => "heartbeat timeout",
            Self::Shutdown => "server shutting down",
        }
    }
}

/// Per-connection event loop.
async fn handle_connection(
    state: Arc<GatewayState>,
    identity: Identity,
    remote: Option<SocketAddr>,
    socket: WebSocket,
) {
    let registry = Arc::clone(&state.registry);
    let (tx, mut rx) = mpsc::channel(state.config.outbound_buffer.max(1));
    let cancel = state.shutdown.child_token();
    let id = registry.register(identity.clone(), remote, tx.clone(), cancel.clone());
    tracing::info!(conn_id = %id, %identity, remote = ?remote, "presence connection opened");

    // Everyone, including the newcomer, sees the change right away.
    registry.broadcast_counts();

    let (mut ws_tx, mut ws_rx) = socket.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let reason = if state.shutdown.is_cancelled() {
                    CloseReason::Shutdown
                } else {
                    CloseReason::Terminated
                };
                let frame = CloseFrame { code: CLOSE_GOING_AWAY, reason: reason.as_str().into() };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break reason;
            }

            out = rx.recv() => {
                // The loop holds a sender, so the queue never closes under us.
                let Some(out) = out else { break CloseReason::SendFailed };
                if let Err(e) = send_outbound(&mut ws_tx, out).await {
                    tracing::debug!(conn_id = %id, err = %e, "presence send failed");
                    break CloseReason::SendFailed;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        registry.mark_alive(id);
                        handle_client_text(id, text.as_str(), &tx);
                    }
                    Some(Ok(Message::Close(_))) | None => break CloseReason::Peer,
                    // Pong answers to our probes, client pings, binary frames.
                    Some(Ok(_)) => {
                        registry.mark_alive(id);
                    }
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %id, err = %e, "presence socket error");
                        break CloseReason::TransportError;
                    }
                }
            }
        }
    };

    finish_connection(&registry, id, reason);
}

/// Shared exit path for every way a connection can end.
fn finish_connection(registry: &Registry, id: ConnId, reason: CloseReason) {
    if let Some(identity) = registry.remove_connection(id) {
        tracing::info!(conn_id = %id, %identity, reason = reason.as_str(), "presence connection closed");
    } else {
        tracing::debug!(conn_id = %id, reason = reason.as_str(), "presence connection already removed");
    }
    registry.broadcast_counts();
}

async fn send_outbound<S>(ws_tx: &mut S, out: Outbound) -> anyhow::Result<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let msg = match out {
        Outbound::Frame(frame) => Message::Text(serde_json::to_string(&frame)?.into()),
        Outbound::Probe => Message::Ping(Default::default()),
    };
    ws_tx.send(msg).await?;
    Ok(())
}

/// Dispatch one text frame from a client.
fn handle_client_text(id: ConnId, text: &str, tx: &mpsc::Sender<Outbound>) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping { .. }) => {
            if let Err(e) = tx.try_send(Outbound::Frame(ServerMessage::Pong {})) {
                tracing::debug!(conn_id = %id, err = %e, "pong not queued");
            }
        }
        Ok(ClientMessage::Unknown) => {
            tracing::debug!(conn_id = %id, "ignoring unknown message type");
        }
        Err(e) => {
            tracing::debug!(conn_id = %id, err = %e, "ignoring malformed message");
        }
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
