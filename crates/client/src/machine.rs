// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting client state machine.
//!
//! Pure bookkeeping: every transition takes an input event and returns the
//! side effects the runtime must perform. No sockets, no timers, no clocks
//! beyond the `Instant` handed in by the caller.

use std::time::{Duration, Instant};

use presence_wire::{OnlineCounts, ServerMessage, CLOSE_NORMAL};

use crate::backoff::ReconnectPolicy;

/// Connection lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientState {
    /// Never connected.
    #[default]
    Idle,
    /// Transport open in progress.
    Connecting,
    Open,
    /// Waiting for a scheduled reconnect.
    Reconnecting,
    /// Deliberately disconnected, or gave up reconnecting.
    Closed,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Best-effort close of the current transport handle.
    CloseTransport { code: u16 },
    OpenTransport,
    StartHeartbeat,
    StopHeartbeat,
    SendProbe,
    ScheduleReconnect(Duration),
    CancelReconnect,
    Publish(OnlineCounts),
}

/// Client bookkeeping.
#[derive(Debug, Clone)]
pub struct Machine {
    policy: ReconnectPolicy,
    max_ping_failures: u32,
    state: ClientState,
    has_transport: bool,
    reconnect_attempts: u32,
    ping_failures: u32,
    last_ping_sent_at: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl Machine {
    pub fn new(policy: ReconnectPolicy, max_ping_failures: u32) -> Self {
        Self {
            policy,
            max_ping_failures,
            state: ClientState::Idle,
            has_transport: false,
            reconnect_attempts: 0,
            ping_failures: 0,
            last_ping_sent_at: None,
            last_rtt: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn ping_failures(&self) -> u32 {
        self.ping_failures
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Intentional connect. No-op when already open; otherwise replaces any
    /// existing handle and starts over with fresh counters.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.state == ClientState::Open {
            return Vec::new();
        }

        let mut effects = vec![Effect::StopHeartbeat, Effect::CancelReconnect];
        if self.has_transport {
            effects.push(Effect::CloseTransport { code: CLOSE_NORMAL });
        }
        self.reconnect_attempts = 0;
        self.ping_failures = 0;
        effects.extend(self.open());
        effects
    }

    /// Deliberate disconnect. Nothing is rescheduled.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::StopHeartbeat, Effect::CancelReconnect];
        if self.has_transport {
            effects.push(Effect::CloseTransport { code: CLOSE_NORMAL });
        }
        self.has_transport = false;
        self.state = ClientState::Closed;
        effects
    }

    /// The transport finished its handshake.
    pub fn on_open(&mut self) -> Vec<Effect> {
        if self.state != ClientState::Connecting {
            return Vec::new();
        }
        self.state = ClientState::Open;
        self.reconnect_attempts = 0;
        self.ping_failures = 0;
        vec![Effect::StartHeartbeat, Effect::SendProbe]
    }

    /// A text frame arrived.
    pub fn on_text(&mut self, text: &str, now: Instant) -> Vec<Effect> {
        let msg = match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(err = %e, "ignoring unparseable presence frame");
                return Vec::new();
            }
        };

        self.ping_failures = 0;
        match &msg {
            ServerMessage::OnlineUsersCount { .. } => {
                msg.counts().map(Effect::Publish).into_iter().collect()
            }
            ServerMessage::Pong {} => {
                if let Some(sent) = self.last_ping_sent_at {
                    self.last_rtt = Some(now.saturating_duration_since(sent));
                }
                Vec::new()
            }
            ServerMessage::Unknown => {
                tracing::debug!("ignoring unknown presence message type");
                Vec::new()
            }
        }
    }

    /// Outcome of one probe send attempt.
    ///
    /// Too many consecutive failures tear the connection down and start a
    /// fresh one without waiting for the server to notice.
    pub fn on_probe_sent(&mut self, delivered: bool, now: Instant) -> Vec<Effect> {
        self.last_ping_sent_at = Some(now);
        if delivered {
            return Vec::new();
        }

        self.ping_failures += 1;
        tracing::debug!(failures = self.ping_failures, "presence probe send failed");
        if self.ping_failures < self.max_ping_failures {
            return Vec::new();
        }

        tracing::info!(failures = self.ping_failures, "too many probe failures, reconnecting");
        // Force the replace path even if we still believe we are open.
        self.state = ClientState::Reconnecting;
        self.connect()
    }

    /// The transport closed. `code` is `None` when no close frame was seen.
    pub fn on_closed(&mut self, code: Option<u16>) -> Vec<Effect> {
        self.has_transport = false;
        let mut effects = vec![Effect::StopHeartbeat];

        if self.state == ClientState::Closed || code == Some(CLOSE_NORMAL) {
            self.state = ClientState::Closed;
            return effects;
        }

        if !self.policy.allows(self.reconnect_attempts) {
            tracing::warn!(
                attempts = self.reconnect_attempts,
                "presence reconnect attempts exhausted, giving up"
            );
            self.state = ClientState::Closed;
            return effects;
        }

        self.reconnect_attempts += 1;
        let delay = self.policy.delay(self.reconnect_attempts);
        tracing::info!(
            attempt = self.reconnect_attempts,
            max = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            code = ?code,
            "presence connection lost, scheduling reconnect"
        );
        self.state = ClientState::Reconnecting;
        effects.push(Effect::ScheduleReconnect(delay));
        effects
    }

    /// Transport-level error. The close that follows drives recovery.
    pub fn on_error(&self, err: &str) {
        tracing::debug!(err, "presence transport error");
    }

    /// A scheduled reconnect came due. Keeps the attempt counter.
    pub fn on_reconnect_due(&mut self) -> Vec<Effect> {
        if self.state != ClientState::Reconnecting {
            return Vec::new();
        }
        self.open()
    }

    fn open(&mut self) -> Vec<Effect> {
        self.state = ClientState::Connecting;
        self.has_transport = true;
        vec![Effect::OpenTransport]
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
