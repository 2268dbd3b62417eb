//! WebSocket transport
//!
//! Wraps a tungstenite stream for either side of the connection: endpoints
//! dial the relay with [`WebSocketTransport::connect`], the relay wraps each
//! accepted socket with [`WebSocketTransport::accept`].

use std::borrow::Cow;

use super::{Frame, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    accept_async, connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

/// Longest reason a close frame may carry
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket transport over any async byte stream
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    ws: WebSocketStream<S>,
    connected: bool,
}

impl WebSocketTransport {
    /// Connect to a relay
    pub async fn connect(relay_url: &str) -> TransportResult<Self> {
        let (ws, _) = connect_async(relay_url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self::new(ws))
    }
}

impl WebSocketTransport<TcpStream> {
    /// Complete the server side of the WebSocket handshake
    pub async fn accept(stream: TcpStream) -> TransportResult<Self> {
        let ws = accept_async(stream)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self::new(ws))
    }
}

impl<S> WebSocketTransport<S> {
    /// Wrap an established WebSocket stream
    pub fn new(ws: WebSocketStream<S>) -> Self {
        WebSocketTransport { ws, connected: true }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        self.ws
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&mut self) -> TransportResult<Frame> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes)),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    self.connected = false;
                    return Err(match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            TransportError::Closed(frame.reason.into_owned())
                        }
                        _ => TransportError::Disconnected,
                    });
                }
                None => {
                    self.connected = false;
                    return Err(TransportError::Disconnected);
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                _ => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self, reason: Option<String>) -> TransportResult<()> {
        self.connected = false;
        let frame = match reason {
            Some(reason) => CloseFrame {
                code: CloseCode::Policy,
                reason: Cow::Owned(truncate_reason(&reason)),
            },
            None => CloseFrame {
                code: CloseCode::Normal,
                reason: Cow::Borrowed(""),
            },
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Cut a close reason to the frame limit without splitting a character
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_reason_untouched() {
        assert_eq!(truncate_reason("name alice already in use"), "name alice already in use");
    }

    #[test]
    fn test_long_reason_truncated() {
        let reason = "x".repeat(500);
        assert_eq!(truncate_reason(&reason).len(), MAX_CLOSE_REASON);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes, so byte 123 falls inside a character
        let reason = "é".repeat(100);
        let truncated = truncate_reason(&reason);
        assert_eq!(truncated.len(), 122);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_websocket_pair_over_localhost() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = WebSocketTransport::accept(stream).await.unwrap();
            transport.send(Frame::Binary(vec![0xFF, 0x01])).await.unwrap();
            let frame = transport.receive().await.unwrap();
            transport.close(Some("bye".to_string())).await.unwrap();
            frame
        });

        let mut client = WebSocketTransport::connect(&format!("ws://{addr}")).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), Frame::Binary(vec![0xFF, 0x01]));
        client.send(Frame::Text("{}".to_string())).await.unwrap();

        match client.receive().await {
            Err(TransportError::Closed(reason)) => assert_eq!(reason, "bye"),
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(server.await.unwrap(), Frame::Text("{}".to_string()));
    }
}
