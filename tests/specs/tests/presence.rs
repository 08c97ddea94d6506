// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against a live gateway over real sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use presence_client::{ClientOptions, ClientState, PresenceClient, WsConnector};
use presence_specs::{
    next_counts, open_ws, send_ping, sign_token, wait_counts, Gateway, WsStream, TIMEOUT,
};
use presence_wire::{OnlineCounts, ServerMessage, CLOSE_GOING_AWAY};
use tokio_tungstenite::tungstenite::Message;

/// Poll until the gateway holds exactly `n` connections.
async fn wait_connections(gateway: &Gateway, n: usize) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while gateway.state().registry.len() != n {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!(
                "expected {n} connections, still have {}",
                gateway.state().registry.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Read frames until a close frame arrives and return its code.
async fn next_close_code(ws: &mut WsStream) -> anyhow::Result<Option<u16>> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next()).await?;
        match msg {
            Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => {}
            Some(Err(e)) => anyhow::bail!("socket error before close: {e}"),
            None => return Ok(None),
        }
    }
}

// -- counting -----------------------------------------------------------------

#[tokio::test]
async fn users_are_counted_once_across_tabs() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let u1 = sign_token("u1", 3600)?;

    let mut a = open_ws(&gateway.ws_url()).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 1)).await?;

    let mut b = open_ws(&gateway.ws_url_with_token(&u1)).await?;
    wait_counts(&mut a, OnlineCounts::new(1, 1)).await?;
    wait_counts(&mut b, OnlineCounts::new(1, 1)).await?;

    // Second tab for the same user: the total grows, the user count does not.
    let mut c = open_ws(&gateway.ws_url_with_token(&u1)).await?;
    wait_counts(&mut a, OnlineCounts::new(1, 2)).await?;
    wait_counts(&mut c, OnlineCounts::new(1, 2)).await?;
    let body = gateway.presence().await?;
    assert_eq!(
        (&body["authenticated"], &body["anonymous"], &body["total"]),
        (&serde_json::json!(1), &serde_json::json!(2), &serde_json::json!(3))
    );

    c.close(None).await?;
    wait_counts(&mut a, OnlineCounts::new(1, 1)).await?;

    b.close(None).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 1)).await?;
    Ok(())
}

#[tokio::test]
async fn unusable_tokens_connect_as_anonymous() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let expired = sign_token("u2", -3600)?;

    let mut a = open_ws(&gateway.ws_url_with_token("not-a-jwt")).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 1)).await?;

    let _b = open_ws(&gateway.ws_url_with_token(&expired)).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 2)).await?;
    Ok(())
}

#[tokio::test]
async fn valid_token_is_anonymous_without_secret() -> anyhow::Result<()> {
    let gateway = Gateway::build().no_secret().start().await?;
    let mut a = open_ws(&gateway.ws_url_with_token(&sign_token("u1", 3600)?)).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 1)).await?;
    Ok(())
}

#[tokio::test]
async fn presence_endpoint_reports_snapshot() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let mut a = open_ws(&gateway.ws_url_with_token(&sign_token("u1", 3600)?)).await?;
    let _b = open_ws(&gateway.ws_url()).await?;
    wait_counts(&mut a, OnlineCounts::new(1, 1)).await?;

    let body = gateway.presence().await?;
    assert_eq!(body["authenticated"], 1);
    assert_eq!(body["anonymous"], 1);
    assert_eq!(body["total"], 2);
    Ok(())
}

#[tokio::test]
async fn counts_are_rebroadcast_periodically() -> anyhow::Result<()> {
    let gateway = Gateway::build().broadcast_ms(50).start().await?;
    let mut a = open_ws(&gateway.ws_url()).await?;

    // Connect-time broadcast, then at least two timer broadcasts.
    for _ in 0..3 {
        assert_eq!(next_counts(&mut a).await?, OnlineCounts::new(0, 1));
    }
    Ok(())
}

// -- messages -----------------------------------------------------------------

#[tokio::test]
async fn ping_is_answered_with_pong() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let mut a = open_ws(&gateway.ws_url()).await?;

    // Unknown types are ignored and do not end the connection.
    a.send(Message::Text(r#"{"type":"SOMETHING_ELSE"}"#.into())).await?;
    a.send(Message::Text("not json".into())).await?;
    send_ping(&mut a).await?;

    loop {
        let msg = tokio::time::timeout(TIMEOUT, a.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        if let Message::Text(text) = msg {
            if serde_json::from_str::<ServerMessage>(&text)? == (ServerMessage::Pong {}) {
                break;
            }
        }
    }
    assert_eq!(gateway.state().registry.len(), 1);
    Ok(())
}

// -- heartbeat ----------------------------------------------------------------

#[tokio::test]
async fn silent_client_is_swept() -> anyhow::Result<()> {
    let gateway = Gateway::build().sweep_ms(100).start().await?;

    // Never polled, so the protocol-level probe goes unanswered.
    let mut silent = open_ws(&gateway.ws_url()).await?;
    wait_connections(&gateway, 1).await?;
    wait_connections(&gateway, 0).await?;

    assert_eq!(next_close_code(&mut silent).await?, Some(CLOSE_GOING_AWAY));
    assert_eq!(gateway.state().registry.counts(), OnlineCounts::default());
    Ok(())
}

#[tokio::test]
async fn responsive_client_survives_sweeps() -> anyhow::Result<()> {
    let gateway = Gateway::build().sweep_ms(50).start().await?;
    let mut a = open_ws(&gateway.ws_url()).await?;

    // Reading keeps tungstenite answering probes.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, a.next()).await {
            Err(_) => break,
            Ok(Some(Ok(Message::Close(frame)))) => anyhow::bail!("closed by sweep: {frame:?}"),
            Ok(None) => anyhow::bail!("stream ended"),
            Ok(Some(Err(e))) => anyhow::bail!("socket error: {e}"),
            Ok(Some(Ok(_))) => {}
        }
    }
    assert_eq!(gateway.state().registry.len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_with_going_away() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let mut a = open_ws(&gateway.ws_url()).await?;
    wait_counts(&mut a, OnlineCounts::new(0, 1)).await?;

    gateway.state().shutdown.cancel();
    assert_eq!(next_close_code(&mut a).await?, Some(CLOSE_GOING_AWAY));
    gateway.shutdown().await?;
    Ok(())
}

// -- client -------------------------------------------------------------------

#[tokio::test]
async fn client_tracks_counts_and_disconnects_cleanly() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let client = PresenceClient::spawn(WsConnector, ClientOptions::new(gateway.ws_url()));
    client.connect(Some(sign_token("u7", 3600)?));

    let mut updates = client.subscribe();
    let snap = tokio::time::timeout(
        TIMEOUT,
        updates.wait_for(|s| s.counts == Some(OnlineCounts::new(1, 0))),
    )
    .await??
    .clone();
    assert_eq!(snap.state, ClientState::Open);

    client.disconnect();
    tokio::time::timeout(TIMEOUT, updates.wait_for(|s| s.state == ClientState::Closed)).await??;
    wait_connections(&gateway, 0).await?;

    // Clean close: no reconnect comes back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.state().registry.len(), 0);
    Ok(())
}

#[tokio::test]
async fn client_reconnects_after_going_away() -> anyhow::Result<()> {
    let gateway = Gateway::start().await?;
    let mut options = ClientOptions::new(gateway.ws_url());
    options.reconnect.base = Duration::from_millis(20);
    let client = PresenceClient::spawn(WsConnector, options);
    client.connect(None);
    wait_connections(&gateway, 1).await?;

    // Server-side termination closes with 1001, which is retried.
    let old: Vec<_> = gateway.state().registry.connections().into_iter().map(|c| c.id).collect();
    for id in &old {
        gateway.state().registry.remove_connection(*id);
    }

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let current = gateway.state().registry.connections();
        if current.len() == 1 && !old.contains(&current[0].id) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("client never came back");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut updates = client.subscribe();
    tokio::time::timeout(TIMEOUT, updates.wait_for(|s| s.state == ClientState::Open)).await??;
    Ok(())
}
