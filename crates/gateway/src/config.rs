// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the presence gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "presence-gateway", version, about = "Real-time presence gateway")]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PRESENCE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9810, env = "PRESENCE_PORT")]
    pub port: u16,

    /// HS256 secret used to verify connection tokens. If unset, every
    /// connection is classified as anonymous.
    #[arg(long, env = "PRESENCE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Heartbeat sweep interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "PRESENCE_SWEEP_MS")]
    pub sweep_ms: u64,

    /// Count broadcast interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "PRESENCE_BROADCAST_MS")]
    pub broadcast_ms: u64,

    /// Per-connection outbound frame queue capacity.
    #[arg(long, default_value_t = 32, env = "PRESENCE_OUTBOUND_BUFFER")]
    pub outbound_buffer: usize,
}

impl GatewayConfig {
    // Timers reject a zero period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_ms.max(1))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_ms.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 9810,
            jwt_secret: None,
            sweep_ms: 30_000,
            broadcast_ms: 10_000,
            outbound_buffer: 32,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
