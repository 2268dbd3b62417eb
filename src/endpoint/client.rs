//! Endpoint driver
//!
//! Wires a [`Session`] to a transport: waits for the relay's modulus, sends
//! the handshake, then multiplexes relay frames, local input and the key
//! discovery timer until the relay hangs up or the input closes.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::protocol::{Outgoing, RelayMessage};
use crate::transport::{Frame, Transport, TransportError};

use super::session::{Effect, Event, Session, SessionError};

/// Endpoint errors
#[derive(Error, Debug)]
pub enum EndpointError {
    /// The connection to the relay broke
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The relay's modulus was unusable
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The relay closed the connection and said why
    #[error("Relay closed the connection: {0}")]
    Rejected(String),

    /// The relay spoke before sending its modulus
    #[error("Expected the relay's modulus as the first frame")]
    UnexpectedFrame,

    /// A request could not be serialized
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for endpoint operations
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Run one endpoint against a relay.
///
/// Plaintext arrives on `input`; deliveries and notices leave on `output`.
/// Returns `Ok` when the input closes or the relay disconnects without a
/// reason. `key_timeout` bounds how long queued messages wait for a peer's
/// public value; `None` waits forever.
pub async fn run<T: Transport>(
    mut transport: T,
    client_id: String,
    mut input: mpsc::Receiver<Outgoing>,
    output: mpsc::Sender<Event>,
    key_timeout: Option<Duration>,
) -> EndpointResult<()> {
    let mut session = Session::new(client_id);

    let modulus = match transport.receive().await {
        Ok(Frame::Binary(bytes)) => bytes,
        Ok(Frame::Text(_)) => return Err(EndpointError::UnexpectedFrame),
        Err(TransportError::Closed(reason)) => return Err(EndpointError::Rejected(reason)),
        Err(e) => return Err(e.into()),
    };
    let hello = session.on_modulus(&modulus)?;
    transport.send(Frame::Text(serde_json::to_string(&hello)?)).await?;
    info!(name = %session.self_id(), key = ?session.public_value(), "Handshake sent");

    let period = key_timeout.map_or(Duration::from_secs(3600), |t| (t / 4).max(Duration::from_millis(100)));
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = transport.receive() => {
                let text = match frame {
                    Ok(Frame::Text(text)) => text,
                    Ok(Frame::Binary(_)) => {
                        warn!("Ignoring unexpected binary frame");
                        continue;
                    }
                    Err(TransportError::Closed(reason)) => return Err(EndpointError::Rejected(reason)),
                    Err(TransportError::Disconnected) => {
                        info!("Relay closed the connection");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };

                let effects = match serde_json::from_str::<RelayMessage>(&text) {
                    Ok(message) => session.handle(message)?,
                    Err(e) => {
                        warn!("Unrecognized relay message: {}", e);
                        vec![Effect::Emit(Event::Notice(format!("unrecognized relay message: {text}")))]
                    }
                };
                apply(&mut transport, &output, effects).await?;
            }

            outgoing = input.recv() => {
                let Some(outgoing) = outgoing else {
                    debug!("Input closed");
                    let _ = transport.close(None).await;
                    return Ok(());
                };
                let effects = session.send(outgoing, Instant::now().into_std())?;
                apply(&mut transport, &output, effects).await?;
            }

            _ = ticker.tick(), if key_timeout.is_some() => {
                if let Some(timeout) = key_timeout {
                    let effects = session.expire(Instant::now().into_std(), timeout);
                    apply(&mut transport, &output, effects).await?;
                }
            }
        }
    }
}

async fn apply<T: Transport>(
    transport: &mut T,
    output: &mpsc::Sender<Event>,
    effects: Vec<Effect>,
) -> EndpointResult<()> {
    for effect in effects {
        match effect {
            Effect::Transmit(request) => {
                let json = serde_json::to_string(&request)?;
                transport.send(Frame::Text(json)).await?;
            }
            Effect::Emit(event) => {
                if let Event::Notice(notice) = &event {
                    info!("{}", notice);
                }
                if output.send(event).await.is_err() {
                    debug!("Event consumer gone");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Group;
    use crate::transport::memory::{create_pair, MemoryTransport};
    use serde_json::{json, Value};
    use tokio::task::JoinHandle;

    struct Harness {
        relay: MemoryTransport,
        input: mpsc::Sender<Outgoing>,
        events: mpsc::Receiver<Event>,
        task: JoinHandle<EndpointResult<()>>,
    }

    fn spawn(name: &str, key_timeout: Option<Duration>) -> Harness {
        let (relay, endpoint) = create_pair();
        let (input, input_rx) = mpsc::channel(16);
        let (events_tx, events) = mpsc::channel(16);
        let task = tokio::spawn(run(endpoint, name.to_string(), input_rx, events_tx, key_timeout));
        Harness {
            relay,
            input,
            events,
            task,
        }
    }

    async fn receive_json(transport: &mut MemoryTransport) -> Value {
        match transport.receive().await.unwrap() {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn greet(harness: &mut Harness) -> Value {
        let modulus = Group::Modp1024.modulus();
        harness
            .relay
            .send(Frame::Binary(modulus.as_bytes().to_vec()))
            .await
            .unwrap();
        receive_json(&mut harness.relay).await
    }

    #[tokio::test]
    async fn test_handshake_after_modulus() {
        let mut harness = spawn("alice", None);
        let hello = greet(&mut harness).await;

        assert_eq!(hello["clientId"], "alice");
        assert!(!hello["secret"].as_str().unwrap().is_empty());
        assert_eq!(hello.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_text_before_modulus_is_an_error() {
        let mut harness = spawn("alice", None);
        harness.relay.send(Frame::Text("{}".to_string())).await.unwrap();

        let result = harness.task.await.unwrap();
        assert!(matches!(result, Err(EndpointError::UnexpectedFrame)));
    }

    #[tokio::test]
    async fn test_rejection_reason_surfaces() {
        let mut harness = spawn("alice", None);
        greet(&mut harness).await;
        harness
            .relay
            .close(Some("name alice already in use".to_string()))
            .await
            .unwrap();

        match harness.task.await.unwrap() {
            Err(EndpointError::Rejected(reason)) => assert_eq!(reason, "name alice already in use"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_peer_triggers_get_key() {
        let mut harness = spawn("alice", None);
        greet(&mut harness).await;

        harness.input.send(Outgoing::new("bob", "hi")).await.unwrap();
        assert_eq!(
            receive_json(&mut harness.relay).await,
            json!({"action": "getKey", "to": "bob"})
        );

        harness
            .relay
            .send(Frame::Text(
                json!({"action": "delKey", "to": "bob", "message": "can't find bob, no such user"}).to_string(),
            ))
            .await
            .unwrap();

        let mut discarded = None;
        while let Some(event) = harness.events.recv().await {
            if let Event::Discarded { peer, messages } = event {
                discarded = Some((peer, messages));
                break;
            }
        }
        assert_eq!(discarded, Some(("bob".to_string(), vec!["hi".to_string()])));
    }

    #[tokio::test]
    async fn test_relay_error_becomes_notice() {
        let mut harness = spawn("alice", None);
        greet(&mut harness).await;

        harness
            .relay
            .send(Frame::Text(json!({"action": "error", "message": "bad action x"}).to_string()))
            .await
            .unwrap();
        assert_eq!(
            harness.events.recv().await,
            Some(Event::Notice("relay error: bad action x".to_string()))
        );
    }

    #[tokio::test]
    async fn test_closing_input_ends_run() {
        let mut harness = spawn("alice", None);
        greet(&mut harness).await;

        drop(harness.input);
        assert!(harness.task.await.unwrap().is_ok());
        assert!(matches!(
            harness.relay.receive().await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_timeout_discards_queue() {
        let mut harness = spawn("alice", Some(Duration::from_secs(30)));
        greet(&mut harness).await;

        harness.input.send(Outgoing::new("slow", "hello?")).await.unwrap();
        assert_eq!(receive_json(&mut harness.relay).await["action"], "getKey");

        // The relay never answers; paused time auto-advances to the timeout
        let mut discarded = None;
        while let Some(event) = harness.events.recv().await {
            if let Event::Discarded { peer, messages } = event {
                discarded = Some((peer, messages));
                break;
            }
        }
        assert_eq!(discarded, Some(("slow".to_string(), vec!["hello?".to_string()])));
    }
}
