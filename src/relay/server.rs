//! Relay hub and connection tasks
//!
//! Every connection runs in its own task, but all registry access goes
//! through one mutex in [`Hub`]: admission, routing and teardown are
//! check-then-act sequences and must not interleave. Outbound messages are
//! pushed into per-connection queues while the lock is held, so each
//! connection sees replies in the order the hub produced them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::crypto::Modulus;
use crate::protocol::{HandshakeError, RelayMessage};
use crate::transport::{Frame, Transport, TransportError, WebSocketTransport};

use super::connection::Connection;
use super::registry::{ConnectionId, Outbound, Registry};

type Outbox = mpsc::UnboundedSender<RelayMessage>;

/// Shared relay state
pub struct Hub {
    modulus: Modulus,
    next_id: AtomicU64,
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    registry: Registry,
    outboxes: HashMap<ConnectionId, Outbox>,
}

impl Hub {
    /// Create a hub serving one modulus to every connection
    pub fn new(modulus: Modulus) -> Self {
        Hub {
            modulus,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// The modulus sent to every connection
    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    /// Names currently admitted, sorted
    pub async fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner
            .outboxes
            .keys()
            .filter_map(|id| inner.registry.name_of(*id).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    async fn open(&self) -> (Connection, mpsc::UnboundedReceiver<RelayMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.outboxes.insert(id, tx);
        (Connection::new(id), rx)
    }

    async fn dispatch(&self, connection: &mut Connection, raw: &str) -> Result<(), HandshakeError> {
        let now = chrono::Utc::now().timestamp_millis();
        let was_admitted = connection.name().is_some();

        let mut inner = self.inner.lock().await;
        let HubInner { registry, outboxes } = &mut *inner;
        let outbound = connection.handle(registry, raw, now)?;

        if let (false, Some(name)) = (was_admitted, connection.name()) {
            info!(id = %connection.id(), %name, "Client admitted");
        }

        for Outbound { to, message } in outbound {
            match outboxes.get(&to) {
                Some(outbox) => {
                    let _ = outbox.send(message);
                }
                None => debug!(%to, "Dropping message for closed connection"),
            }
        }
        Ok(())
    }

    async fn close(&self, connection: &mut Connection) {
        let mut inner = self.inner.lock().await;
        let HubInner { registry, outboxes } = &mut *inner;
        outboxes.remove(&connection.id());
        if let Some(name) = connection.close(registry) {
            info!(id = %connection.id(), %name, "Client released");
        }
    }
}

/// Drive one connection until either side closes it
pub async fn serve_connection<T: Transport>(mut transport: T, hub: Arc<Hub>) {
    let (mut connection, mut outbox) = hub.open().await;
    let id = connection.id();

    let modulus = hub.modulus().as_bytes().to_vec();
    if let Err(e) = transport.send(Frame::Binary(modulus)).await {
        warn!(%id, "Failed to send modulus: {}", e);
        hub.close(&mut connection).await;
        return;
    }
    connection.greet();

    loop {
        tokio::select! {
            frame = transport.receive() => {
                let text = match frame {
                    Ok(Frame::Text(text)) => text,
                    Ok(Frame::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(TransportError::Disconnected) | Err(TransportError::Closed(_)) => {
                        debug!(%id, "Client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(%id, "Transport error: {}", e);
                        break;
                    }
                };

                if let Err(reason) = hub.dispatch(&mut connection, &text).await {
                    warn!(%id, %reason, "Handshake rejected");
                    let _ = transport.close(Some(reason.to_string())).await;
                    break;
                }
            }

            Some(message) = outbox.recv() => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(%id, "Failed to encode reply: {}", e);
                        continue;
                    }
                };
                if let Err(e) = transport.send(Frame::Text(json)).await {
                    warn!(%id, "Send failed: {}", e);
                    break;
                }
            }
        }
    }

    hub.close(&mut connection).await;
}

/// Accept WebSocket clients until the listener fails
pub async fn serve(listener: TcpListener, hub: Arc<Hub>) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(accept_websocket(stream, addr, hub));
    }
}

async fn accept_websocket(stream: tokio::net::TcpStream, addr: SocketAddr, hub: Arc<Hub>) {
    info!("New connection from: {}", addr);
    match WebSocketTransport::accept(stream).await {
        Ok(transport) => serve_connection(transport, hub).await,
        Err(e) => error!("WebSocket handshake failed for {}: {}", addr, e),
    }
    info!("Connection from {} closed", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Group;
    use crate::transport::memory::{create_pair, MemoryTransport};
    use serde_json::{json, Value};

    fn hub() -> Arc<Hub> {
        Arc::new(Hub::new(Group::Modp1024.modulus()))
    }

    async fn connect(hub: &Arc<Hub>) -> MemoryTransport {
        let (client, server) = create_pair();
        tokio::spawn(serve_connection(server, hub.clone()));
        client
    }

    async fn receive_json(transport: &mut MemoryTransport) -> Value {
        match transport.receive().await.unwrap() {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn hello(client: &mut MemoryTransport, name: &str) {
        assert!(matches!(client.receive().await.unwrap(), Frame::Binary(_)));
        let hello = json!({"clientId": name, "secret": format!("{name}-key")});
        client.send(Frame::Text(hello.to_string())).await.unwrap();
    }

    /// Connect and wait until the hub has admitted the name
    async fn join(hub: &Arc<Hub>, name: &str) -> MemoryTransport {
        let mut client = connect(hub).await;
        hello(&mut client, name).await;
        client
            .send(Frame::Text(json!({"action": "getAllKeys"}).to_string()))
            .await
            .unwrap();
        assert_eq!(receive_json(&mut client).await["action"], "getAllKeys");
        client
    }

    #[tokio::test]
    async fn test_modulus_is_first_frame() {
        let hub = hub();
        let mut client = connect(&hub).await;
        assert_eq!(
            client.receive().await.unwrap(),
            Frame::Binary(hub.modulus().as_bytes().to_vec())
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_hub() {
        let hub = hub();
        let mut alice = join(&hub, "alice").await;
        let mut bob = join(&hub, "bob").await;

        alice
            .send(Frame::Text(json!({"action": "getKey", "to": "bob"}).to_string()))
            .await
            .unwrap();
        assert_eq!(
            receive_json(&mut alice).await,
            json!({"action": "getKey", "to": "bob", "secret": "bob-key"})
        );

        let envelope = json!({"action": "message", "to": "bob", "message": "ct", "secret": "bob-key"});
        alice.send(Frame::Text(envelope.to_string())).await.unwrap();

        let forwarded = receive_json(&mut bob).await;
        assert_eq!(forwarded["action"], "message");
        assert_eq!(forwarded["from"], "alice");
        assert_eq!(forwarded["message"], "ct");
        assert_eq!(forwarded["fromSecret"], "alice-key");
        assert!(forwarded["time"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_closes_second_connection() {
        let hub = hub();
        let mut alice = join(&hub, "alice").await;
        let mut impostor = connect(&hub).await;
        hello(&mut impostor, "alice").await;

        match impostor.receive().await {
            Err(TransportError::Closed(reason)) => assert_eq!(reason, "name alice already in use"),
            other => panic!("expected close, got {other:?}"),
        }

        // The first registration still answers
        alice
            .send(Frame::Text(json!({"action": "getAllKeys"}).to_string()))
            .await
            .unwrap();
        assert_eq!(receive_json(&mut alice).await, json!({"action": "getAllKeys", "secrets": {}}));
        assert_eq!(hub.names().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_releases_name() {
        let hub = hub();
        let mut alice = join(&hub, "alice").await;
        let bob = join(&hub, "bob").await;
        assert_eq!(hub.names().await, vec!["alice".to_string(), "bob".to_string()]);

        drop(bob);
        let mut released = false;
        for _ in 0..50 {
            alice
                .send(Frame::Text(json!({"action": "getKey", "to": "bob"}).to_string()))
                .await
                .unwrap();
            if receive_json(&mut alice).await["action"] == "delKey" {
                released = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(released, "bob was never released");
        assert_eq!(hub.names().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_handshake_closes_with_reason() {
        let hub = hub();
        let mut client = connect(&hub).await;
        client.receive().await.unwrap();
        client.send(Frame::Text("hello?".to_string())).await.unwrap();

        match client.receive().await {
            Err(TransportError::Closed(reason)) => assert!(reason.starts_with("bad data hello?")),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_request_keeps_connection_open() {
        let hub = hub();
        let mut alice = join(&hub, "alice").await;

        alice.send(Frame::Text("[]".to_string())).await.unwrap();
        assert_eq!(receive_json(&mut alice).await["action"], "error");

        alice
            .send(Frame::Text(json!({"action": "getKey", "to": "ghost"}).to_string()))
            .await
            .unwrap();
        assert_eq!(
            receive_json(&mut alice).await,
            json!({"action": "delKey", "to": "ghost", "message": "can't find ghost, no such user"})
        );
    }
}
