// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use presence_client::{ClientOptions, ClientState, PresenceClient, WsConnector};

/// Watch the live presence counts of a gateway.
#[derive(Debug, Parser)]
#[command(name = "presence-watch", version)]
struct Args {
    /// Gateway WebSocket endpoint.
    #[arg(long, env = "PRESENCE_URL", default_value = "ws://127.0.0.1:9810/ws")]
    url: String,

    /// Bearer token presented on connect. Omit to watch anonymously.
    #[arg(long, env = "PRESENCE_TOKEN")]
    token: Option<String>,

    /// Seconds between liveness probes.
    #[arg(long, env = "PRESENCE_PROBE_SECS", default_value = "15")]
    probe_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = watch(args).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn watch(args: Args) -> anyhow::Result<()> {
    let mut options = ClientOptions::new(args.url);
    options.probe_interval = std::time::Duration::from_secs(args.probe_secs.max(1));

    let client = PresenceClient::spawn(WsConnector, options);
    let mut updates = client.subscribe();
    client.connect(args.token);

    let mut last_counts = None;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("disconnecting");
                client.disconnect();
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = updates.borrow_and_update().clone();
                if snap.counts != last_counts {
                    if let Some(c) = snap.counts {
                        tracing::info!(
                            authenticated = c.authenticated,
                            anonymous = c.anonymous,
                            total = c.total(),
                            "online"
                        );
                    }
                    last_counts = snap.counts;
                }
                if snap.state == ClientState::Closed {
                    tracing::warn!(attempts = snap.reconnect_attempts, "connection closed for good");
                    break;
                }
            }
        }
    }

    // Give the close frame a moment to leave.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}
