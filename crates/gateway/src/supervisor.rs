// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat supervisor: the sweep loop and the count broadcast loop.
//!
//! The two loops run on independent timers and share nothing but the
//! registry. Both stop when the gateway's shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;
use crate::state::GatewayState;

/// Spawn both supervisor loops for a gateway.
pub fn spawn_supervisor(state: &GatewayState) -> [JoinHandle<()>; 2] {
    [
        spawn_sweeper(
            Arc::clone(&state.registry),
            state.config.sweep_interval(),
            state.shutdown.clone(),
        ),
        spawn_broadcaster(
            Arc::clone(&state.registry),
            state.config.broadcast_interval(),
            state.shutdown.clone(),
        ),
    ]
}

/// Periodically terminate connections that missed the previous probe and
/// probe the rest. One missed probe is fatal.
pub fn spawn_sweeper(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await; // Consume the immediate first tick.

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let report = registry.sweep();
            if !report.terminated.is_empty() {
                tracing::info!(
                    terminated = report.terminated.len(),
                    probed = report.probed,
                    "heartbeat sweep removed stale connections"
                );
                registry.broadcast_counts();
            } else {
                tracing::trace!(probed = report.probed, "heartbeat sweep");
            }
        }
        tracing::debug!("sweeper stopped");
    })
}

/// Periodically push the aggregate counts to every connection.
pub fn spawn_broadcaster(
    registry: Arc<Registry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let report = registry.broadcast_counts();
            if report.failed > 0 {
                tracing::debug!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "count broadcast partially delivered"
                );
            }
        }
        tracing::debug!("broadcaster stopped");
    })
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
