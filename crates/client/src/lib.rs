// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting presence client.

pub mod backoff;
pub mod client;
pub mod connector;
pub mod machine;

pub use backoff::ReconnectPolicy;
pub use client::{presence_url, ClientOptions, ClientSnapshot, PresenceClient};
pub use connector::{Connector, Link, LinkCommand, LinkEvent, LinkPeer, WsConnector};
pub use machine::{ClientState, Effect, Machine};
