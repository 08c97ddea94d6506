// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence wire protocol shared by the gateway and its clients.
//!
//! Every frame is a JSON text message with a `type` discriminator. Both
//! directions carry a catch-all `Unknown` variant so that a peer speaking a
//! newer dialect never tears down the connection.

pub mod message;

pub use message::{ClientMessage, OnlineCounts, ServerMessage};

/// Query parameter carrying the credential on the WebSocket upgrade.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Close code used for a deliberate, clean shutdown. Clients never reconnect
/// after a close carrying this code.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent by the gateway when it terminates a connection itself
/// (missed heartbeat or server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
