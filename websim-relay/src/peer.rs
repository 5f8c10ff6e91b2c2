//! Connected peers as seen by the hub.
//!
//! The hub never touches a socket. Each connection owns its WebSocket sink in
//! a writer task and hands the hub a [`PeerHandle`], the sending half of a
//! channel feeding that task. A send fails once the writer task has exited,
//! which is how the hub learns that a peer is gone. Frames that must not be
//! lost silently go out as [`Outbound::Acked`], and the writer task reports
//! the socket write result back.

use crate::error::{RelayError, Result};
use crate::protocol::Frame;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Stable identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a socket write, as reported by the writer task.
pub type WriteResult = std::result::Result<(), String>;

/// Instructions for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    /// Write the frame and report the result on the sender.
    Acked(Frame, oneshot::Sender<WriteResult>),
    /// Send a close frame and stop writing.
    Close,
}

// Acked frames never compare equal; their ack channel has no identity.
impl PartialEq for Outbound {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Frame(a), Self::Frame(b)) => a == b,
            (Self::Close, Self::Close) => true,
            _ => false,
        }
    }
}

/// Cloneable sending side of a connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    /// Creates a handle plus the receiver its writer task drains.
    pub fn channel(addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: PeerId::new(),
            addr,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| RelayError::PeerGone(self.id))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Frame::Text(text.into()))
    }

    /// Queues a frame and returns where the write result will arrive.
    ///
    /// The receiver yields an error if the socket write fails, and is
    /// cancelled if the writer task exits before reaching the frame.
    pub fn send_acked(&self, frame: Frame) -> Result<oneshot::Receiver<WriteResult>> {
        let (ack, written) = oneshot::channel();
        self.tx
            .send(Outbound::Acked(frame, ack))
            .map_err(|_| RelayError::PeerGone(self.id))?;
        Ok(written)
    }

    /// Asks the writer task to close the connection.
    pub fn close(&self) -> Result<()> {
        self.tx
            .send(Outbound::Close)
            .map_err(|_| RelayError::PeerGone(self.id))
    }

    /// True once the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    #[test]
    fn test_send_reaches_receiver() {
        let (peer, mut rx) = PeerHandle::channel(addr());
        peer.send_text("hi").unwrap();
        peer.send(Frame::Binary(vec![7, 8])).unwrap();
        peer.close().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(Frame::Text("hi".into()))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(Frame::Binary(vec![7, 8]))
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (peer, rx) = PeerHandle::channel(addr());
        drop(rx);

        assert!(peer.is_closed());
        let err = peer.send_text("late").unwrap_err();
        assert!(matches!(err, RelayError::PeerGone(id) if id == peer.id()));
    }

    #[tokio::test]
    async fn test_send_acked_reports_write_result() {
        let (peer, mut rx) = PeerHandle::channel(addr());
        let written = peer.send_acked(Frame::Binary(vec![1, 2])).unwrap();

        match rx.try_recv().unwrap() {
            Outbound::Acked(frame, ack) => {
                assert_eq!(frame, Frame::Binary(vec![1, 2]));
                ack.send(Err("broken pipe".into())).unwrap();
            }
            other => panic!("expected an acked frame, got {:?}", other),
        }
        assert_eq!(written.await.unwrap(), Err("broken pipe".to_string()));
    }

    #[test]
    fn test_send_acked_after_receiver_dropped_fails() {
        let (peer, rx) = PeerHandle::channel(addr());
        drop(rx);

        assert!(peer.send_acked(Frame::Binary(vec![1])).is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = PeerHandle::channel(addr());
        let (b, _rb) = PeerHandle::channel(addr());
        assert_ne!(a.id(), b.id());
    }
}
