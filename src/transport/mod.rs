//! Transport layer abstraction
//!
//! This module provides a pluggable transport layer supporting:
//! - WebSocket connections (endpoint to relay, and the relay's accepted side)
//! - In-memory channels (for testing)
//!
//! # Design
//!
//! The transport only moves ordered frames between two ends. The relay's
//! modulus travels as a binary frame; every other message is a JSON text
//! frame. Encryption and routing happen above this layer.

use async_trait::async_trait;
use thiserror::Error;

pub mod websocket;
pub use websocket::WebSocketTransport;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed without a reason
    #[error("Connection closed")]
    Disconnected,

    /// The other end closed the connection and said why
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON
    Text(String),
    /// Raw bytes; only the relay's modulus uses this
    Binary(Vec<u8>),
}

/// Abstract transport trait
///
/// All transports must implement this trait. Frames arrive in the order they
/// were sent and are never dropped while the connection is open.
#[async_trait]
pub trait Transport: Send {
    /// Send a frame to the other end
    async fn send(&mut self, frame: Frame) -> TransportResult<()>;

    /// Receive the next frame
    ///
    /// Blocks until a frame is available or the connection is closed.
    async fn receive(&mut self) -> TransportResult<Frame>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport, optionally telling the other end why
    async fn close(&mut self, reason: Option<String>) -> TransportResult<()>;
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    enum Envelope {
        Frame(Frame),
        Close(Option<String>),
    }

    /// Create a pair of connected in-memory transports
    pub fn create_pair() -> (MemoryTransport, MemoryTransport) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        let transport1 = MemoryTransport {
            tx: Some(tx1),
            rx: rx2,
            connected: true,
        };

        let transport2 = MemoryTransport {
            tx: Some(tx2),
            rx: rx1,
            connected: true,
        };

        (transport1, transport2)
    }

    /// In-memory transport endpoint
    pub struct MemoryTransport {
        tx: Option<mpsc::UnboundedSender<Envelope>>,
        rx: mpsc::UnboundedReceiver<Envelope>,
        connected: bool,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, frame: Frame) -> TransportResult<()> {
            let tx = match (&self.tx, self.connected) {
                (Some(tx), true) => tx,
                _ => return Err(TransportError::Disconnected),
            };

            tx.send(Envelope::Frame(frame))
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }

        async fn receive(&mut self) -> TransportResult<Frame> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }

            match self.rx.recv().await {
                Some(Envelope::Frame(frame)) => Ok(frame),
                Some(Envelope::Close(Some(reason))) => {
                    self.connected = false;
                    Err(TransportError::Closed(reason))
                }
                Some(Envelope::Close(None)) | None => {
                    self.connected = false;
                    Err(TransportError::Disconnected)
                }
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self, reason: Option<String>) -> TransportResult<()> {
            self.connected = false;
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(Envelope::Close(reason));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::create_pair;
    use super::*;

    #[tokio::test]
    async fn test_memory_transport() {
        let (mut a, mut b) = create_pair();

        a.send(Frame::Text("Hello from A".to_string())).await.unwrap();
        b.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(b.receive().await.unwrap(), Frame::Text("Hello from A".to_string()));
        assert_eq!(a.receive().await.unwrap(), Frame::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_transport_preserves_order() {
        let (mut a, mut b) = create_pair();

        for i in 0..5 {
            a.send(Frame::Text(i.to_string())).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.receive().await.unwrap(), Frame::Text(i.to_string()));
        }
    }

    #[tokio::test]
    async fn test_close_with_reason() {
        let (mut a, mut b) = create_pair();

        a.close(Some("name alice already in use".to_string())).await.unwrap();
        assert!(!a.is_connected());
        assert!(a.send(Frame::Text("late".to_string())).await.is_err());

        match b.receive().await {
            Err(TransportError::Closed(reason)) => assert_eq!(reason, "name alice already in use"),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn test_drop_disconnects_peer() {
        let (a, mut b) = create_pair();
        drop(a);
        assert!(matches!(b.receive().await, Err(TransportError::Disconnected)));
    }
}
