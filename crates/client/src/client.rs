// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence client runtime.
//!
//! [`PresenceClient`] owns a background task that drives a [`Machine`] and
//! performs the effects it asks for: opening transports, heartbeat probes,
//! reconnect timers. Callers observe progress through a `watch` channel of
//! [`ClientSnapshot`]s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use presence_wire::{ClientMessage, OnlineCounts, TOKEN_QUERY_PARAM};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::error::Elapsed;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::ReconnectPolicy;
use crate::connector::{Connector, Link, LinkEvent};
use crate::machine::{ClientState, Effect, Machine};

/// Tuning for a [`PresenceClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Gateway WebSocket endpoint, e.g. `ws://127.0.0.1:9810/ws`.
    pub url: String,
    pub probe_interval: Duration,
    /// Consecutive failed probe sends before forcing a fresh connection.
    pub max_ping_failures: u32,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            probe_interval: Duration::from_secs(15),
            max_ping_failures: 3,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Observable client state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSnapshot {
    pub state: ClientState,
    /// Most recent count broadcast, if any arrived yet.
    pub counts: Option<OnlineCounts>,
    /// Round-trip time of the last answered probe.
    pub rtt: Option<Duration>,
    pub reconnect_attempts: u32,
}

enum Command {
    Connect(Option<String>),
    Disconnect,
}

/// Handle to a running presence client. Dropping it stops the client.
pub struct PresenceClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ClientSnapshot>,
    cancel: CancellationToken,
}

impl PresenceClient {
    /// Start the client task. Nothing is dialed until [`connect`](Self::connect).
    pub fn spawn<C: Connector>(connector: C, options: ClientOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(ClientSnapshot::default());
        let cancel = CancellationToken::new();

        let runner = Runner {
            machine: Machine::new(options.reconnect, options.max_ping_failures),
            url: options.url.clone(),
            connector: Arc::new(connector),
            options,
            dial: None,
            link: None,
            heartbeat: None,
            reconnect_at: None,
            counts: None,
            snapshot: snap_tx,
        };
        tokio::spawn(runner.run(cmd_rx, cancel.clone()));

        Self { commands: cmd_tx, snapshot: snap_rx, cancel }
    }

    /// Connect, optionally presenting a bearer token. Replaces any pending
    /// connection attempt and resets the reconnect budget.
    pub fn connect(&self, token: Option<String>) {
        let _ = self.commands.send(Command::Connect(token));
    }

    /// Close with a normal close code. No reconnect follows.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.borrow().clone()
    }
}

impl Drop for PresenceClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Append the token query parameter to a gateway URL.
pub fn presence_url(base: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{base}{sep}{TOKEN_QUERY_PARAM}={token}")
        }
        _ => base.to_owned(),
    }
}

/// Outcome of one dial task, including its connect timeout.
type DialResult = Result<anyhow::Result<Link>, Elapsed>;

struct Runner<C> {
    connector: Arc<C>,
    options: ClientOptions,
    machine: Machine,
    /// Endpoint including the token of the last effective `connect`.
    url: String,
    /// In-flight dial. Aborted when the machine closes or replaces it.
    dial: Option<JoinHandle<DialResult>>,
    link: Option<Link>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    counts: Option<OnlineCounts>,
    snapshot: watch::Sender<ClientSnapshot>,
}

impl<C: Connector> Runner<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let effects = self.machine.disconnect();
                    self.apply(effects);
                    break;
                }

                cmd = commands.recv() => {
                    let effects = match cmd {
                        Some(Command::Connect(token)) => {
                            let effects = self.machine.connect();
                            // Already open: keep presenting the live credential.
                            if effects.contains(&Effect::OpenTransport) {
                                self.url = presence_url(&self.options.url, token.as_deref());
                            }
                            effects
                        }
                        Some(Command::Disconnect) => self.machine.disconnect(),
                        None => {
                            let effects = self.machine.disconnect();
                            self.apply(effects);
                            break;
                        }
                    };
                    self.apply(effects);
                }

                done = dial_finished(&mut self.dial) => {
                    self.dial = None;
                    let effects = self.on_dial(done);
                    self.apply(effects);
                }

                event = next_event(&mut self.link) => {
                    let effects = match event {
                        LinkEvent::Text(text) => self.machine.on_text(&text, std::time::Instant::now()),
                        LinkEvent::Closed(code) => {
                            self.link = None;
                            self.machine.on_closed(code)
                        }
                        LinkEvent::Error(err) => {
                            self.machine.on_error(&err);
                            Vec::new()
                        }
                    };
                    self.apply(effects);
                }

                _ = tick(&mut self.heartbeat) => {
                    self.apply(vec![Effect::SendProbe]);
                }

                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let effects = self.machine.on_reconnect_due();
                    self.apply(effects);
                }
            }
            self.publish();
        }
        self.abort_dial();
        self.publish();
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::CloseTransport { code } => {
                    self.abort_dial();
                    if let Some(link) = self.link.take() {
                        link.close(code);
                    }
                }
                Effect::OpenTransport => self.start_dial(),
                Effect::StartHeartbeat => {
                    let period = self.options.probe_interval.max(Duration::from_millis(1));
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(interval);
                }
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::SendProbe => {
                    let delivered = self.send_probe();
                    queue.extend(self.machine.on_probe_sent(delivered, std::time::Instant::now()));
                }
                Effect::ScheduleReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::Publish(counts) => self.counts = Some(counts),
            }
        }
    }

    /// Dial in the background so commands and cancellation stay responsive.
    fn start_dial(&mut self) {
        self.abort_dial();
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let timeout = self.options.connect_timeout;
        self.dial = Some(tokio::spawn(async move {
            tokio::time::timeout(timeout, connector.connect(&url)).await
        }));
    }

    fn abort_dial(&mut self) {
        if let Some(dial) = self.dial.take() {
            tracing::debug!("abandoning in-flight presence dial");
            dial.abort();
        }
    }

    fn on_dial(&mut self, done: Result<DialResult, JoinError>) -> Vec<Effect> {
        match done {
            Ok(Ok(Ok(link))) => {
                tracing::info!(url = %self.options.url, "presence connected");
                self.link = Some(link);
                self.machine.on_open()
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(url = %self.options.url, err = %e, "presence connect failed");
                self.machine.on_closed(None)
            }
            Ok(Err(_)) => {
                tracing::warn!(url = %self.options.url, "presence connect timed out");
                self.machine.on_closed(None)
            }
            Err(e) => {
                tracing::warn!(err = %e, "presence dial task failed");
                self.machine.on_closed(None)
            }
        }
    }

    fn send_probe(&self) -> bool {
        let Some(ref link) = self.link else {
            return false;
        };
        let ping = ClientMessage::Ping { timestamp: Some(epoch_ms()) };
        match serde_json::to_string(&ping) {
            Ok(text) => link.send_text(text),
            Err(_) => false,
        }
    }

    fn publish(&self) {
        let next = ClientSnapshot {
            state: self.machine.state(),
            counts: self.counts,
            rtt: self.machine.last_rtt(),
            reconnect_attempts: self.machine.reconnect_attempts(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn next_event(link: &mut Option<Link>) -> LinkEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn dial_finished(dial: &mut Option<JoinHandle<DialResult>>) -> Result<DialResult, JoinError> {
    match dial {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn epoch_ms() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as f64).unwrap_or(0.0)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
