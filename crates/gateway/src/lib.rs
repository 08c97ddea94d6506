// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence gateway: tracks who is connected and tells everyone.

pub mod auth;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::supervisor::spawn_supervisor;
use crate::transport::build_router;

/// Run the gateway until Ctrl-C.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let shutdown = CancellationToken::new();

    if config.jwt_secret.is_none() {
        tracing::warn!("no JWT secret configured, all connections will be anonymous");
    }
    let state = Arc::new(GatewayState::new(config, shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(err = %e, "failed to listen for ctrl-c");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("presence gateway listening on {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Serve the gateway on an already-bound listener until `state.shutdown`
/// is cancelled. Starts the heartbeat supervisor for the lifetime of the
/// server.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let supervisor = spawn_supervisor(&state);
    let router = build_router(state);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Stop the timers even if the server exited on its own.
    shutdown.cancel();
    for handle in supervisor {
        let _ = handle.await;
    }
    Ok(())
}
