// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Liveness probe. `timestamp` is the client-local send time in epoch ms.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Pong {},
    #[serde(rename_all = "camelCase")]
    OnlineUsersCount {
        authenticated_count: u64,
        anonymous_count: u64,
        total_count: u64,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Return the presence snapshot carried by this message, if any.
    pub fn counts(&self) -> Option<OnlineCounts> {
        match self {
            Self::OnlineUsersCount { authenticated_count, anonymous_count, .. } => {
                Some(OnlineCounts {
                    authenticated: *authenticated_count,
                    anonymous: *anonymous_count,
                })
            }
            Self::Pong {} | Self::Unknown => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate snapshot
// ---------------------------------------------------------------------------

/// Point-in-time presence snapshot.
///
/// `authenticated` counts distinct users, not connections. `anonymous` is
/// every connection not accounted for by a distinct user, so `total()` equals
/// the number of open connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineCounts {
    pub authenticated: u64,
    pub anonymous: u64,
}

impl OnlineCounts {
    pub fn new(authenticated: u64, anonymous: u64) -> Self {
        Self { authenticated, anonymous }
    }

    pub fn total(&self) -> u64 {
        self.authenticated + self.anonymous
    }
}

impl From<OnlineCounts> for ServerMessage {
    fn from(c: OnlineCounts) -> Self {
        ServerMessage::OnlineUsersCount {
            authenticated_count: c.authenticated,
            anonymous_count: c.anonymous,
            total_count: c.total(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
