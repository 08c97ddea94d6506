// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end gateway scenarios.
//!
//! Runs a real gateway on an ephemeral port inside the test process and
//! talks to it over plain HTTP and WebSocket, the same way a browser would.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use presence_gateway::config::GatewayConfig;
use presence_gateway::state::GatewayState;
use presence_wire::{ClientMessage, OnlineCounts, ServerMessage};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Secret the harness configures and signs test tokens with.
pub const TEST_SECRET: &str = "presence-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running gateway that shuts down on drop.
pub struct Gateway {
    port: u16,
    state: Arc<GatewayState>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

/// Builder for a [`Gateway`] with non-default timers.
pub struct GatewayBuilder {
    config: GatewayConfig,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        let config = GatewayConfig {
            port: 0,
            jwt_secret: Some(TEST_SECRET.to_owned()),
            ..GatewayConfig::default()
        };
        Self { config }
    }
}

impl GatewayBuilder {
    pub fn sweep_ms(mut self, ms: u64) -> Self {
        self.config.sweep_ms = ms;
        self
    }

    pub fn broadcast_ms(mut self, ms: u64) -> Self {
        self.config.broadcast_ms = ms;
        self
    }

    /// Run without a verification secret.
    pub fn no_secret(mut self) -> Self {
        self.config.jwt_secret = None;
        self
    }

    pub async fn start(self) -> anyhow::Result<Gateway> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(GatewayState::new(self.config, CancellationToken::new()));
        let task = tokio::spawn(presence_gateway::serve(listener, Arc::clone(&state)));
        let gateway = Gateway { port, state, task: Some(task) };
        gateway.wait_healthy(TIMEOUT).await?;
        Ok(gateway)
    }
}

impl Gateway {
    pub fn build() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Start with default timers and the test secret.
    pub async fn start() -> anyhow::Result<Self> {
        Self::build().start().await
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// WebSocket URL carrying `token` as the credential.
    pub fn ws_url_with_token(&self, token: &str) -> String {
        format!("{}?token={token}", self.ws_url())
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("gateway did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Fetch `/api/v1/presence`.
    pub async fn presence(&self) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/api/v1/presence", self.base_url());
        Ok(reqwest::get(url).await?.json().await?)
    }

    /// Cancel the gateway and wait for it to finish.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.state.shutdown.cancel();
        if let Some(task) = self.task.take() {
            tokio::time::timeout(TIMEOUT, task).await???;
        }
        Ok(())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
    }
}

/// Sign an HS256 token for `sub` with the harness secret.
pub fn sign_token(sub: &str, expires_in_secs: i64) -> anyhow::Result<String> {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_secs() as i64;
    let claims = serde_json::json!({ "sub": sub, "exp": now + expires_in_secs });
    let key = jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes());
    Ok(jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &key)?)
}

/// Open a raw WebSocket to the gateway.
pub async fn open_ws(url: &str) -> anyhow::Result<WsStream> {
    let (ws, _) = tokio::time::timeout(TIMEOUT, tokio_tungstenite::connect_async(url)).await??;
    Ok(ws)
}

/// Read text frames until a count broadcast arrives.
pub async fn next_counts(ws: &mut WsStream) -> anyhow::Result<OnlineCounts> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        if let Message::Text(text) = msg {
            if let Some(counts) = serde_json::from_str::<ServerMessage>(&text)?.counts() {
                return Ok(counts);
            }
        }
    }
}

/// Read broadcasts until one equals `expected`.
pub async fn wait_counts(ws: &mut WsStream, expected: OnlineCounts) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("never saw {expected:?}");
        }
        if next_counts(ws).await? == expected {
            return Ok(());
        }
    }
}

/// Send an application-level ping.
pub async fn send_ping(ws: &mut WsStream) -> anyhow::Result<()> {
    let text = serde_json::to_string(&ClientMessage::Ping { timestamp: Some(1.0) })?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}
