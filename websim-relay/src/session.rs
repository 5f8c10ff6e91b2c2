//! Per-connection protocol handling.
//!
//! Every accepted socket goes through the same lifecycle:
//!
//! ```text
//! Connected ──register──▶ RoleAssigned ──first frame──▶ Reading ──EOF/error──▶ Closed
//! ```
//!
//! A read error is an ordinary disconnect. There is no resume; a reconnect is
//! a new session with a new peer id.

use crate::error::Result;
use crate::hub::SharedHub;
use crate::peer::{Outbound, PeerHandle, PeerId};
use crate::protocol::{Frame, PeerRole};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    RoleAssigned(PeerRole),
    Reading(PeerRole),
    Closed,
}

/// Protocol handler for one connection.
pub struct UploadSession {
    hub: SharedHub,
    peer: PeerHandle,
    state: SessionState,
}

impl UploadSession {
    pub fn new(hub: SharedHub, peer: PeerHandle) -> Self {
        Self {
            hub,
            peer,
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Registers the peer with the hub using the role from the upgrade request.
    pub async fn start(&mut self, requested: PeerRole) -> PeerRole {
        let role = self.hub.register(self.peer.clone(), requested).await;
        self.state = SessionState::RoleAssigned(role);
        role
    }

    /// Dispatches one inbound frame to the hub.
    pub async fn handle_frame(&mut self, frame: Frame) {
        let role = match self.state {
            SessionState::RoleAssigned(role) | SessionState::Reading(role) => role,
            SessionState::Connected | SessionState::Closed => {
                debug!("Dropping frame for inactive session {}", self.peer.addr());
                return;
            }
        };
        self.state = SessionState::Reading(role);
        debug!("{} frame of {} bytes from {}", role, frame.len(), self.peer.addr());

        match frame {
            Frame::Text(text) => self.hub.route_text(&self.peer, &text).await,
            Frame::Binary(data) => {
                let outcome = self.hub.route_binary(&self.peer, data).await;
                debug!("Binary transfer from {}: {:?}", self.peer.addr(), outcome);
            }
        }

        // A browser announcement may have changed this peer's role.
        if let Some(current) = self.hub.role_of(self.peer.id()).await {
            self.state = SessionState::Reading(current);
        }
    }

    /// Unregisters the peer. Idempotent.
    pub async fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.hub.unregister(self.peer.id()).await;
        self.state = SessionState::Closed;
    }
}

/// Accepts the WebSocket upgrade and runs the session until the peer leaves.
pub async fn serve_connection(stream: TcpStream, addr: SocketAddr, hub: SharedHub) -> Result<()> {
    let mut request_uri = String::new();
    let ws_stream = accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            request_uri = req.uri().to_string();
            Ok(resp)
        },
    )
    .await?;
    debug!("WebSocket handshake complete with {} ({})", addr, request_uri);

    let (peer, outbound_rx) = PeerHandle::channel(addr);
    let (write, mut read) = ws_stream.split();
    let writer = tokio::spawn(write_outbound(write, outbound_rx, hub.clone(), peer.id(), addr));

    let mut session = UploadSession::new(hub, peer);
    session.start(PeerRole::from_request_uri(&request_uri)).await;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("Client {} closed the connection", addr);
                break;
            }
            Ok(msg) => {
                if let Some(frame) = Frame::from_message(msg) {
                    session.handle_frame(frame).await;
                }
            }
            Err(e) => {
                debug!("Error reading message from {}: {}", addr, e);
                break;
            }
        }
    }

    session.finish().await;
    drop(session);
    let _ = writer.await;

    info!("Connection closed: {}", addr);
    Ok(())
}

/// Drains a peer's outbound queue into its socket.
///
/// A failed write unregisters the peer and stops the task. Acked frames
/// still queued at that point see their ack dropped.
async fn write_outbound<S>(
    mut write: S,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    hub: SharedHub,
    peer: PeerId,
    addr: SocketAddr,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(out) = outbound_rx.recv().await {
        let (frame, ack) = match out {
            Outbound::Frame(frame) => (frame, None),
            Outbound::Acked(frame, ack) => (frame, Some(ack)),
            Outbound::Close => {
                let _ = write.close().await;
                break;
            }
        };

        let written = write
            .send(frame.into_message())
            .await
            .map_err(|e| e.to_string());
        let failed = written.is_err();
        if let Err(e) = &written {
            warn!("Write to {} failed: {}", addr, e);
        }
        if let Some(ack) = ack {
            let _ = ack.send(written);
        }

        if failed {
            hub.unregister(peer).await;
            break;
        }
    }
}
