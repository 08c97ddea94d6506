// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: the single source of truth for presence counts.
//!
//! Every live WebSocket owns exactly one entry. Authenticated users are
//! counted once regardless of how many tabs or devices they have open;
//! anonymous visitors are counted per connection. The published snapshot
//! reports connections as the total and attributes everything beyond one
//! connection per user to the anonymous bucket. All mutation goes through
//! [`Registry::register`] and [`Registry::remove_connection`], so the counters
//! can only move in lock-step with the connection map.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use parking_lot::Mutex;
use presence_wire::{OnlineCounts, ServerMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::epoch_ms;

/// Opaque handle for one registered connection.
pub type ConnId = Uuid;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Authenticated(String),
    Anonymous,
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated(id) => Some(id),
            Self::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated(id) => write!(f, "user:{id}"),
            Self::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(ServerMessage),
    /// Transport-level liveness probe (WebSocket ping frame).
    Probe,
}

struct Connection {
    identity: Identity,
    alive: bool,
    remote_addr: Option<SocketAddr>,
    established_at_ms: u64,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

/// Diagnostic view of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnId,
    pub identity: Identity,
    pub alive: bool,
    pub remote_addr: Option<SocketAddr>,
    pub established_at_ms: u64,
}

/// Outcome of a fan-out send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub terminated: Vec<ConnId>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnId, Connection>,
    authenticated_users: HashSet<String>,
    anonymous: u64,
}

/// Process-wide connection registry.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly accepted connection. It starts out alive.
    pub fn register(
        &self,
        identity: Identity,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> ConnId {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        match &identity {
            Identity::Authenticated(user) => {
                inner.authenticated_users.insert(user.clone());
            }
            Identity::Anonymous => inner.anonymous += 1,
        }
        inner.connections.insert(
            id,
            Connection {
                identity,
                alive: true,
                remote_addr,
                established_at_ms: epoch_ms(),
                tx,
                cancel,
            },
        );
        id
    }

    /// Remove a connection and adjust the counters.
    ///
    /// Idempotent: close, error and heartbeat timeout may all race to remove
    /// the same connection; only the first call has any effect and returns the
    /// removed identity. The connection's cancel token is fired so its socket
    /// task shuts down if it is still running.
    pub fn remove_connection(&self, id: ConnId) -> Option<Identity> {
        let removed = {
            let mut inner = self.inner.lock();
            let conn = inner.connections.remove(&id)?;
            match &conn.identity {
                Identity::Anonymous => inner.anonymous = inner.anonymous.saturating_sub(1),
                Identity::Authenticated(user) => {
                    let still_connected = inner
                        .connections
                        .values()
                        .any(|c| c.identity.user_id() == Some(user.as_str()));
                    if !still_connected {
                        inner.authenticated_users.remove(user);
                    }
                }
            }
            conn
        };
        removed.cancel.cancel();
        Some(removed.identity)
    }

    /// Record proof of life for a connection. Returns `false` if it is no
    /// longer registered.
    pub fn mark_alive(&self, id: ConnId) -> bool {
        match self.inner.lock().connections.get_mut(&id) {
            Some(conn) => {
                conn.alive = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.inner.lock().connections.contains_key(&id)
    }

    /// Current aggregate counts: distinct users, and the remaining
    /// connections so that the total is the connection count.
    pub fn counts(&self) -> OnlineCounts {
        let inner = self.inner.lock();
        let total = inner.connections.len() as u64;
        let users = inner.authenticated_users.len() as u64;
        OnlineCounts::new(users, total.saturating_sub(users))
    }

    /// Open connections classified as anonymous.
    pub fn anonymous_connections(&self) -> u64 {
        self.inner.lock().anonymous
    }

    /// Number of registered connections (not users).
    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .lock()
            .connections
            .iter()
            .map(|(id, c)| ConnectionInfo {
                id: *id,
                identity: c.identity.clone(),
                alive: c.alive,
                remote_addr: c.remote_addr,
                established_at_ms: c.established_at_ms,
            })
            .collect()
    }

    /// Push the current counts to every registered connection.
    pub fn broadcast_counts(&self) -> DeliveryReport {
        let msg = ServerMessage::from(self.counts());
        self.broadcast(&msg)
    }

    /// Fan a message out to every registered connection.
    ///
    /// Sends are non-blocking and never abort the loop; a connection whose
    /// queue is closed or full is skipped and left for the sweep to reap.
    pub fn broadcast(&self, msg: &ServerMessage) -> DeliveryReport {
        let targets: Vec<(ConnId, mpsc::Sender<Outbound>)> = {
            let inner = self.inner.lock();
            inner.connections.iter().map(|(id, c)| (*id, c.tx.clone())).collect()
        };

        let mut report = DeliveryReport { attempted: targets.len(), ..Default::default() };
        for (id, tx) in targets {
            match tx.try_send(Outbound::Frame(msg.clone())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.failed += 1;
                    tracing::debug!(conn_id = %id, "outbound queue full, dropping broadcast");
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    tracing::debug!(conn_id = %id, "outbound queue closed, dropping broadcast");
                }
            }
        }
        report
    }

    /// One heartbeat cycle.
    ///
    /// Connections that did not prove liveness since the previous sweep are
    /// terminated. Everyone else has their flag cleared and receives a probe.
    pub fn sweep(&self) -> SweepReport {
        let ids: Vec<ConnId> = self.inner.lock().connections.keys().copied().collect();
        let mut report = SweepReport::default();

        for id in ids {
            let probe_tx = {
                let mut inner = self.inner.lock();
                // Removed since the snapshot was taken.
                let Some(conn) = inner.connections.get_mut(&id) else {
                    continue;
                };
                if conn.alive {
                    conn.alive = false;
                    Some(conn.tx.clone())
                } else {
                    None
                }
            };

            match probe_tx {
                Some(tx) => {
                    report.probed += 1;
                    if let Err(e) = tx.try_send(Outbound::Probe) {
                        tracing::debug!(conn_id = %id, err = %e, "heartbeat probe not queued");
                    }
                }
                None => {
                    if let Some(identity) = self.remove_connection(id) {
                        tracing::warn!(conn_id = %id, %identity, "terminating unresponsive connection");
                        report.terminated.push(id);
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
