//! Endpoint session: keypair, peer address book and outbound queues
//!
//! The session performs no I/O. The driver feeds it the relay's modulus,
//! relay messages and console input, and carries out the [`Effect`]s it
//! returns in order.
//!
//! Queue semantics:
//! - a message for a peer whose public value is unknown is queued and a
//!   `getKey` is issued; the queue is flushed oldest-first when the value
//!   arrives
//! - broadcast messages wait for the next `getAllKeys` reply, then every one
//!   of them goes to every known peer
//! - `delKey` forgets the peer and discards its queue; so does the discovery
//!   timeout in [`Session::expire`]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::crypto::{self, CryptoError, KeyPair, Modulus, PublicValue};
use crate::protocol::{ClientRequest, Delivery, Hello, Outgoing, Recipient, RelayMessage};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The relay has not sent its modulus yet
    #[error("Session not keyed yet")]
    NotReady,

    /// A second modulus arrived on the same connection
    #[error("Session already keyed for this connection")]
    AlreadyKeyed,

    /// The modulus was unusable
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Something the driver must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a request to the relay
    Transmit(ClientRequest),
    /// Report to the consumer
    Emit(Event),
}

/// What the consumer gets to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message from a peer; `message` is `None` if it failed to decrypt
    Delivered(Delivery),
    /// Diagnostic text: relay errors, bad key material, decrypt failures
    Notice(String),
    /// Queued plaintext that will never be sent
    Discarded {
        /// Peer the messages were for
        peer: String,
        /// The messages, oldest first
        messages: Vec<String>,
    },
}

struct PendingQueue {
    messages: VecDeque<String>,
    requested_at: Instant,
}

/// Per-peer state; kept apart from the keypair so both can be borrowed at once
#[derive(Default)]
struct Peers {
    public_values: HashMap<String, PublicValue>,
    pending: HashMap<String, PendingQueue>,
    broadcast: Vec<String>,
}

impl Peers {
    fn seal(&self, keypair: &KeyPair, to: &str, plaintext: &str) -> Result<ClientRequest, CryptoError> {
        let peer = self.public_values.get(to).ok_or(CryptoError::InvalidPublicKey)?;
        Ok(ClientRequest::Message {
            to: to.to_string(),
            message: crypto::encrypt(keypair, peer, plaintext)?,
            secret: peer.as_base64().to_string(),
        })
    }

    /// Forget a peer whose public value cannot be used
    fn reject(&mut self, to: &str, error: CryptoError, messages: Vec<String>, effects: &mut Vec<Effect>) {
        tracing::warn!(peer = %to, "Cannot encrypt: {}", error);
        self.public_values.remove(to);
        effects.push(Effect::Emit(Event::Notice(format!("can't encrypt for {to}: {error}"))));
        effects.push(Effect::Emit(Event::Discarded {
            peer: to.to_string(),
            messages,
        }));
    }

    fn flush(&mut self, keypair: &KeyPair, to: &str, effects: &mut Vec<Effect>) {
        let Some(queue) = self.pending.remove(to) else {
            return;
        };
        let mut messages = queue.messages;
        while let Some(plaintext) = messages.pop_front() {
            match self.seal(keypair, to, &plaintext) {
                Ok(request) => effects.push(Effect::Transmit(request)),
                Err(e) => {
                    messages.push_front(plaintext);
                    self.reject(to, e, messages.into(), effects);
                    return;
                }
            }
        }
    }

    fn learn(&mut self, name: String, secret: &str, effects: &mut Vec<Effect>) -> bool {
        match PublicValue::from_base64(secret) {
            Ok(value) => {
                self.public_values.insert(name, value);
                true
            }
            Err(e) => {
                effects.push(Effect::Emit(Event::Notice(format!(
                    "ignoring public value for {name}: {e}"
                ))));
                false
            }
        }
    }

    fn discard(&mut self, peer: &str, effects: &mut Vec<Effect>) {
        if let Some(queue) = self.pending.remove(peer) {
            effects.push(Effect::Emit(Event::Discarded {
                peer: peer.to_string(),
                messages: queue.messages.into(),
            }));
        }
    }
}

/// One endpoint's protocol state for one relay connection
pub struct Session {
    self_id: String,
    keypair: Option<KeyPair>,
    peers: Peers,
}

impl Session {
    /// Create a session for the given name
    pub fn new(self_id: impl Into<String>) -> Self {
        Session {
            self_id: self_id.into(),
            keypair: None,
            peers: Peers::default(),
        }
    }

    /// Our name
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Whether the keypair exists and routing may start
    pub fn is_ready(&self) -> bool {
        self.keypair.is_some()
    }

    /// Our public value, once keyed
    pub fn public_value(&self) -> Option<&PublicValue> {
        self.keypair.as_ref().map(KeyPair::public_value)
    }

    /// Whether a public value is cached for a peer
    pub fn knows(&self, peer: &str) -> bool {
        self.peers.public_values.contains_key(peer)
    }

    /// Number of messages waiting for a peer's public value
    pub fn pending_count(&self, peer: &str) -> usize {
        self.peers.pending.get(peer).map_or(0, |q| q.messages.len())
    }

    /// Number of broadcast messages waiting for the next address book
    pub fn broadcast_len(&self) -> usize {
        self.peers.broadcast.len()
    }

    /// Generate our keypair from the relay's modulus and build the handshake
    pub fn on_modulus(&mut self, modulus: &[u8]) -> SessionResult<Hello> {
        if self.keypair.is_some() {
            return Err(SessionError::AlreadyKeyed);
        }
        let modulus = Modulus::from_bytes(modulus)?;
        let keypair = KeyPair::generate(&modulus);
        let hello = Hello {
            client_id: self.self_id.clone(),
            secret: keypair.public_value().as_base64().to_string(),
        };
        tracing::debug!(bits = modulus.bits(), key = ?keypair.public_value(), "Keypair generated");
        self.keypair = Some(keypair);
        Ok(hello)
    }

    /// Send plaintext to a peer or to everyone
    pub fn send(&mut self, outgoing: Outgoing, now: Instant) -> SessionResult<Vec<Effect>> {
        let keypair = self.keypair.as_ref().ok_or(SessionError::NotReady)?;
        let mut effects = Vec::new();

        if outgoing.recipient() == Recipient::Broadcast {
            self.peers.broadcast.push(outgoing.message);
            effects.push(Effect::Transmit(ClientRequest::GetAllKeys));
            return Ok(effects);
        }

        // Anything already queued for the peer must go out first
        let Outgoing { to, message } = outgoing;
        if self.peers.public_values.contains_key(&to) && !self.peers.pending.contains_key(&to) {
            match self.peers.seal(keypair, &to, &message) {
                Ok(request) => effects.push(Effect::Transmit(request)),
                Err(e) => self.peers.reject(&to, e, vec![message], &mut effects),
            }
        } else {
            let queue = self.peers.pending.entry(to.clone()).or_insert_with(|| PendingQueue {
                messages: VecDeque::new(),
                requested_at: now,
            });
            queue.messages.push_back(message);
            queue.requested_at = now;
            effects.push(Effect::Transmit(ClientRequest::GetKey { to }));
        }
        Ok(effects)
    }

    /// React to one message from the relay
    pub fn handle(&mut self, message: RelayMessage) -> SessionResult<Vec<Effect>> {
        let keypair = self.keypair.as_ref().ok_or(SessionError::NotReady)?;
        let mut effects = Vec::new();

        match message {
            RelayMessage::Error { message, .. } => {
                effects.push(Effect::Emit(Event::Notice(format!("relay error: {message}"))));
            }
            RelayMessage::GetKey { to, secret } => {
                if self.peers.learn(to.clone(), &secret, &mut effects) {
                    self.peers.flush(keypair, &to, &mut effects);
                }
            }
            RelayMessage::DelKey { to, message } => {
                self.peers.public_values.remove(&to);
                effects.push(Effect::Emit(Event::Notice(format!("{to} unavailable: {message}"))));
                self.peers.discard(&to, &mut effects);
            }
            RelayMessage::GetAllKeys { secrets } => {
                self.on_address_book(secrets, &mut effects);
            }
            RelayMessage::Message {
                from,
                message,
                time,
                from_secret,
            } => {
                let plaintext = match PublicValue::from_base64(&from_secret) {
                    Ok(sender) => {
                        let plaintext = crypto::decrypt(keypair, &sender, &message);
                        self.peers.public_values.insert(from.clone(), sender);
                        self.peers.flush(keypair, &from, &mut effects);
                        plaintext
                    }
                    Err(e) => {
                        effects.push(Effect::Emit(Event::Notice(format!(
                            "ignoring public value for {from}: {e}"
                        ))));
                        None
                    }
                };
                if plaintext.is_none() {
                    effects.push(Effect::Emit(Event::Notice(format!(
                        "failed to decrypt message from {from}"
                    ))));
                }
                effects.push(Effect::Emit(Event::Delivered(Delivery {
                    message: plaintext,
                    time,
                    from,
                    to: self.self_id.clone(),
                })));
            }
        }
        Ok(effects)
    }

    fn on_address_book(&mut self, secrets: BTreeMap<String, String>, effects: &mut Vec<Effect>) {
        let Some(keypair) = self.keypair.as_ref() else {
            return;
        };

        self.peers.public_values.clear();
        let mut known = Vec::with_capacity(secrets.len());
        for (name, secret) in secrets {
            if self.peers.learn(name.clone(), &secret, effects) {
                known.push(name);
            }
        }
        for name in &known {
            self.peers.flush(keypair, name, effects);
        }

        let broadcast = std::mem::take(&mut self.peers.broadcast);
        if !broadcast.is_empty() && self.peers.public_values.is_empty() {
            effects.push(Effect::Emit(Event::Notice(format!(
                "no peers online, {} broadcast message(s) dropped",
                broadcast.len()
            ))));
        }
        for plaintext in &broadcast {
            for name in &known {
                if !self.peers.public_values.contains_key(name) {
                    continue;
                }
                match self.peers.seal(keypair, name, plaintext) {
                    Ok(request) => effects.push(Effect::Transmit(request)),
                    Err(e) => self.peers.reject(name, e, vec![plaintext.clone()], effects),
                }
            }
        }
    }

    /// Give up on peers whose latest `getKey` has gone unanswered for `timeout`
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Effect> {
        let mut expired: Vec<String> = self
            .peers
            .pending
            .iter()
            .filter(|(_, queue)| now.saturating_duration_since(queue.requested_at) >= timeout)
            .map(|(peer, _)| peer.clone())
            .collect();
        expired.sort();

        let mut effects = Vec::new();
        for peer in expired {
            effects.push(Effect::Emit(Event::Notice(format!(
                "no key for {peer} {}s after the last request",
                timeout.as_secs()
            ))));
            self.peers.discard(&peer, &mut effects);
        }
        effects
    }
}
