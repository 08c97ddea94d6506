// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam for the presence client.
//!
//! The runtime only ever talks to a [`Link`]: a pair of channels carrying
//! outgoing text/close commands and incoming text/close/error events. The
//! real connector pumps a `tokio-tungstenite` socket into those channels;
//! tests substitute their own connector and drive the peer side directly.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Command sent from the client to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Text(String),
    Close(u16),
}

/// Event reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    /// Connection closed, with the peer's close code if a close frame arrived.
    Closed(Option<u16>),
    Error(String),
}

/// Client side of an open transport.
pub struct Link {
    commands: mpsc::Sender<LinkCommand>,
    events: mpsc::Receiver<LinkEvent>,
}

/// Transport side of a [`Link`].
pub struct LinkPeer {
    pub commands: mpsc::Receiver<LinkCommand>,
    pub events: mpsc::Sender<LinkEvent>,
}

impl Link {
    /// Create a connected link/peer pair.
    pub fn pair(buffer: usize) -> (Link, LinkPeer) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        let (evt_tx, evt_rx) = mpsc::channel(buffer);
        (Link { commands: cmd_tx, events: evt_rx }, LinkPeer { commands: cmd_rx, events: evt_tx })
    }

    /// Queue a text frame. Returns `false` if the transport is gone or
    /// backed up.
    pub fn send_text(&self, text: String) -> bool {
        self.commands.try_send(LinkCommand::Text(text)).is_ok()
    }

    /// Best-effort close; errors are swallowed.
    pub fn close(self, code: u16) {
        let _ = self.commands.try_send(LinkCommand::Close(code));
    }

    /// Next transport event. A vanished transport reads as an abnormal close.
    pub async fn next_event(&mut self) -> LinkEvent {
        self.events.recv().await.unwrap_or(LinkEvent::Closed(None))
    }
}

/// Opens transports for the client runtime.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = anyhow::Result<Link>> + Send;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Link> {
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
        let (link, peer) = Link::pair(64);
        tokio::spawn(pump(ws, peer));
        Ok(link)
    }
}

/// Shuttle frames between a socket and a [`LinkPeer`] until either side ends.
async fn pump<S>(ws: S, mut peer: LinkPeer)
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = peer.commands.recv() => {
                match cmd {
                    Some(LinkCommand::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            let _ = peer.events.send(LinkEvent::Error(e.to_string())).await;
                            let _ = peer.events.send(LinkEvent::Closed(None)).await;
                            break;
                        }
                    }
                    Some(LinkCommand::Close(code)) => {
                        let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        let _ = ws_tx.close().await;
                        break;
                    }
                    // Client dropped the link.
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if peer.events.send(LinkEvent::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        let _ = peer.events.send(LinkEvent::Closed(code)).await;
                        break;
                    }
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = peer.events.send(LinkEvent::Error(e.to_string())).await;
                        let _ = peer.events.send(LinkEvent::Closed(None)).await;
                        break;
                    }
                    None => {
                        let _ = peer.events.send(LinkEvent::Closed(None)).await;
                        break;
                    }
                }
            }
        }
    }
}
