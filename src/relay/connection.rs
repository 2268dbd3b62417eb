//! Per-connection state machine
//!
//! ```text
//! Connected --greet--> AwaitingHandshake --valid hello--> Admitted
//!     |                       |                              |
//!     +------ bad frame ------+---- bad hello / name taken ---+--- close --> Closed
//! ```
//!
//! Only `Admitted` connections route. A handshake violation is the only
//! error that ends a connection; everything after admission is answered
//! with a non-fatal `error` reply.

use crate::protocol::{ClientRequest, HandshakeError, Hello, RelayMessage};

use super::registry::{ConnectionId, Outbound, Registry};

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, modulus not yet sent
    Connected,
    /// Modulus sent, waiting for `{clientId, secret}`
    AwaitingHandshake,
    /// Registered under a name
    Admitted {
        /// The name this connection holds
        name: String,
    },
    /// Terminal
    Closed,
}

/// One relay-side connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
}

impl Connection {
    /// A freshly accepted connection
    pub fn new(id: ConnectionId) -> Self {
        Connection {
            id,
            state: ConnectionState::Connected,
        }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Name held once admitted
    pub fn name(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Admitted { name } => Some(name),
            _ => None,
        }
    }

    /// Record that the modulus went out; the next frame must be the handshake
    pub fn greet(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::AwaitingHandshake;
        }
    }

    /// Process one inbound text frame.
    ///
    /// `Err` means the connection must be closed with the error as reason;
    /// the state is already `Closed` when this returns.
    pub fn handle(
        &mut self,
        registry: &mut Registry,
        raw: &str,
        now: i64,
    ) -> Result<Vec<Outbound>, HandshakeError> {
        match &self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Closed;
                Err(HandshakeError::NotStarted)
            }
            ConnectionState::AwaitingHandshake => {
                let admitted = Hello::parse(raw).and_then(|hello| {
                    let name = hello.client_id.clone();
                    registry.admit(self.id, hello).map(|()| name)
                });
                match admitted {
                    Ok(name) => {
                        self.state = ConnectionState::Admitted { name };
                        Ok(Vec::new())
                    }
                    Err(e) => {
                        self.state = ConnectionState::Closed;
                        Err(e)
                    }
                }
            }
            ConnectionState::Admitted { .. } => match ClientRequest::parse(raw) {
                Ok(request) => Ok(registry.route(self.id, request, now)),
                Err(e) => Ok(vec![Outbound {
                    to: self.id,
                    message: RelayMessage::error(e.to_string()),
                }]),
            },
            ConnectionState::Closed => Ok(Vec::new()),
        }
    }

    /// Tear down; returns the name that was released, if any
    pub fn close(&mut self, registry: &mut Registry) -> Option<String> {
        self.state = ConnectionState::Closed;
        registry.release(self.id)
    }
}
