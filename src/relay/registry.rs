//! Address book for admitted connections.
//!
//! The registry keeps three mappings in lockstep:
//! - `name → connection`: where to forward a `message`
//! - `connection → name`: who sent a request, and what to drop on close
//! - `name → public value`: the address book served by `getKey`/`getAllKeys`
//!
//! All three are written together in [`Registry::admit`] and
//! [`Registry::release`]; nothing else mutates them. The registry never
//! decrypts or validates public values. Comparing a `message`'s `secret`
//! against the target's registered value catches stale address-book reads,
//! but proves nothing about the sender since the value is public.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::protocol::{ClientRequest, HandshakeError, Hello, RelayMessage};

/// Identifier the server assigns to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A message the server must push to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination connection
    pub to: ConnectionId,
    /// Message to serialize and send
    pub message: RelayMessage,
}

impl Outbound {
    fn new(to: ConnectionId, message: RelayMessage) -> Self {
        Outbound { to, message }
    }
}

/// Registry of admitted connections and their public values
#[derive(Debug, Default)]
pub struct Registry {
    by_name: HashMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, String>,
    public_values: HashMap<String, String>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under the name it asked for.
    ///
    /// Fails with [`HandshakeError::NameInUse`] if another open connection
    /// holds the name; the existing registration is left untouched.
    pub fn admit(&mut self, connection: ConnectionId, hello: Hello) -> Result<(), HandshakeError> {
        if self.by_name.contains_key(&hello.client_id) {
            return Err(HandshakeError::NameInUse(hello.client_id));
        }
        if let Some(name) = self.by_connection.get(&connection) {
            return Err(HandshakeError::NameInUse(name.clone()));
        }

        self.by_name.insert(hello.client_id.clone(), connection);
        self.by_connection.insert(connection, hello.client_id.clone());
        self.public_values.insert(hello.client_id, hello.secret);
        debug_assert!(self.is_consistent());
        Ok(())
    }

    /// Drop everything registered for a connection.
    ///
    /// Returns the name it held. Calling this for a connection that never
    /// finished its handshake is a no-op.
    pub fn release(&mut self, connection: ConnectionId) -> Option<String> {
        let name = self.by_connection.remove(&connection)?;
        self.by_name.remove(&name);
        self.public_values.remove(&name);
        debug_assert!(self.is_consistent());
        Some(name)
    }

    /// Name held by a connection
    pub fn name_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    /// Connection holding a name
    pub fn connection_of(&self, name: &str) -> Option<ConnectionId> {
        self.by_name.get(name).copied()
    }

    /// Public value a name last announced
    pub fn public_value(&self, name: &str) -> Option<&str> {
        self.public_values.get(name).map(String::as_str)
    }

    /// Number of admitted connections
    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    /// Whether no connection is admitted
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    /// Check that the three mappings describe the same set of names
    pub fn is_consistent(&self) -> bool {
        self.by_name.len() == self.by_connection.len()
            && self.public_values.len() == self.by_name.len()
            && self.by_name.iter().all(|(name, conn)| {
                self.by_connection.get(conn) == Some(name) && self.public_values.contains_key(name)
            })
    }

    /// Answer one request from an admitted connection.
    ///
    /// `now` is the relay timestamp stamped on forwarded messages, in Unix
    /// milliseconds.
    pub fn route(&self, sender: ConnectionId, request: ClientRequest, now: i64) -> Vec<Outbound> {
        let Some(sender_name) = self.name_of(sender) else {
            return vec![Outbound::new(sender, RelayMessage::error("handshake not completed"))];
        };

        match request {
            ClientRequest::GetKey { to } => vec![Outbound::new(sender, self.lookup(sender_name, to))],
            ClientRequest::GetAllKeys => {
                let secrets: BTreeMap<String, String> = self
                    .public_values
                    .iter()
                    .filter(|(name, _)| name.as_str() != sender_name)
                    .map(|(name, secret)| (name.clone(), secret.clone()))
                    .collect();
                vec![Outbound::new(sender, RelayMessage::GetAllKeys { secrets })]
            }
            ClientRequest::Message { to, message, secret } => {
                self.forward(sender, sender_name, to, message, secret, now)
            }
        }
    }

    fn lookup(&self, sender_name: &str, to: String) -> RelayMessage {
        if to == sender_name {
            return RelayMessage::del_key(to, "can't send message to yourself");
        }
        match self.public_values.get(&to) {
            Some(secret) => RelayMessage::GetKey {
                secret: secret.clone(),
                to,
            },
            None => {
                let reason = format!("can't find {to}, no such user");
                RelayMessage::del_key(to, reason)
            }
        }
    }

    fn forward(
        &self,
        sender: ConnectionId,
        sender_name: &str,
        to: String,
        message: String,
        secret: String,
        now: i64,
    ) -> Vec<Outbound> {
        let (Some(target_secret), Some(target)) = (self.public_values.get(&to), self.by_name.get(&to))
        else {
            let reason = format!("can't send message to {to}: no such user");
            return vec![Outbound::new(sender, RelayMessage::del_key(to, reason))];
        };

        if &secret != target_secret {
            return vec![
                Outbound::new(
                    sender,
                    RelayMessage::error(format!("can't send message to {to}: stale secret")),
                ),
                Outbound::new(
                    sender,
                    RelayMessage::GetKey {
                        secret: target_secret.clone(),
                        to,
                    },
                ),
            ];
        }

        if *target == sender {
            return vec![Outbound::new(
                sender,
                RelayMessage::Error {
                    message: "can't send message to yourself".to_string(),
                    to: Some(to),
                },
            )];
        }

        let from_secret = self.public_values.get(sender_name).cloned().unwrap_or_default();
        vec![Outbound::new(
            *target,
            RelayMessage::Message {
                from: sender_name.to_string(),
                message,
                time: now,
                from_secret,
            },
        )]
    }
}
