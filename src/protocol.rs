//! Wire protocol between endpoints and the relay
//!
//! The relay's first frame on every connection is the raw modulus (binary,
//! not JSON). Everything after that, in both directions, is a JSON object:
//!
//! ```text
//! endpoint -> relay   {clientId, secret}                      (handshake, once)
//!                     {action:"getKey", to}
//!                     {action:"getAllKeys"}
//!                     {action:"message", to, message, secret}
//! relay -> endpoint   {action:"error", message}
//!                     {action:"getKey", to, secret}
//!                     {action:"delKey", to, message}
//!                     {action:"getAllKeys", secrets}
//!                     {action:"message", from, message, time, fromSecret}
//! ```
//!
//! Inbound requests are checked field by field against a `serde_json::Value`
//! so that wrong field counts and wrong types produce the exact rejection the
//! peer expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Recipient name that addresses every known peer
pub const BROADCAST: &str = "-1";

/// Handshake violations; the `Display` text is the close reason
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Not a JSON object with exactly two fields
    #[error("bad data {0}. it must be object with keys [clientId, secret]")]
    Malformed(String),

    /// `clientId` missing or not a string
    #[error("clientId must be a string")]
    ClientIdType,

    /// `secret` missing or not a string
    #[error("secret must be a string")]
    SecretType,

    /// `clientId` is empty
    #[error("name can't be empty")]
    EmptyName,

    /// `secret` is empty
    #[error("secret can't be empty")]
    EmptySecret,

    /// Another open connection holds the name
    #[error("name {0} already in use")]
    NameInUse(String),

    /// Data arrived before the relay sent its modulus
    #[error("handshake not started")]
    NotStarted,
}

/// Post-admission shape errors; the `Display` text goes back in an `error` reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Not a JSON object, or wrong fields for the action
    #[error("bad message: {0}")]
    Malformed(String),

    /// `to` is not a string
    #[error("\"to\" must be a string")]
    TargetType,

    /// Missing or unknown `action`
    #[error("bad action {0}")]
    BadAction(String),
}

/// Handshake request, exactly `{clientId, secret}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hello {
    /// Name the endpoint wants to be reachable under
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// The endpoint's base64 public value
    pub secret: String,
}

impl Hello {
    /// Validate a handshake frame
    pub fn parse(raw: &str) -> Result<Self, HandshakeError> {
        let malformed = || HandshakeError::Malformed(raw.to_string());
        let value: Value = serde_json::from_str(raw).map_err(|_| malformed())?;
        let fields = value.as_object().ok_or_else(malformed)?;
        if fields.len() != 2 {
            return Err(malformed());
        }

        let client_id = string_field(fields, "clientId").ok_or(HandshakeError::ClientIdType)?;
        let secret = string_field(fields, "secret").ok_or(HandshakeError::SecretType)?;
        if client_id.is_empty() {
            return Err(HandshakeError::EmptyName);
        }
        if secret.is_empty() {
            return Err(HandshakeError::EmptySecret);
        }

        Ok(Hello {
            client_id: client_id.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// Requests an admitted endpoint sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Look up one peer's public value
    GetKey {
        /// Peer name
        to: String,
    },
    /// Fetch the whole address book
    GetAllKeys,
    /// Forward an envelope to a peer
    Message {
        /// Peer name
        to: String,
        /// Opaque envelope
        message: String,
        /// The peer public value the sender encrypted under
        secret: String,
    },
}

impl ClientRequest {
    /// Validate a request frame from an admitted connection
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let malformed = || RequestError::Malformed(raw.to_string());
        let value: Value = serde_json::from_str(raw).map_err(|_| malformed())?;
        let fields = value.as_object().ok_or_else(malformed)?;

        match fields.get("action").and_then(Value::as_str) {
            Some("getKey") => {
                if fields.len() != 2 {
                    return Err(malformed());
                }
                let to = string_field(fields, "to").ok_or(RequestError::TargetType)?;
                Ok(ClientRequest::GetKey { to: to.to_string() })
            }
            Some("getAllKeys") => Ok(ClientRequest::GetAllKeys),
            Some("message") => {
                let to = string_field(fields, "to");
                let message = string_field(fields, "message");
                let secret = string_field(fields, "secret");
                match (fields.len(), to, message, secret) {
                    (4, Some(to), Some(message), Some(secret)) => Ok(ClientRequest::Message {
                        to: to.to_string(),
                        message: message.to_string(),
                        secret: secret.to_string(),
                    }),
                    _ => Err(malformed()),
                }
            }
            _ => Err(RequestError::BadAction(raw.to_string())),
        }
    }
}

/// Messages the relay pushes to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RelayMessage {
    /// Non-fatal diagnostic
    Error {
        /// Human-readable reason
        message: String,
        /// Peer the failed request addressed, when there was one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    /// A peer's current public value
    GetKey {
        /// Peer name
        to: String,
        /// Peer's base64 public value
        secret: String,
    },
    /// The peer cannot be keyed with; forget it
    DelKey {
        /// Peer name
        to: String,
        /// Human-readable reason
        #[serde(default)]
        message: String,
    },
    /// Address book snapshot, excluding the recipient
    GetAllKeys {
        /// Peer name to base64 public value
        secrets: BTreeMap<String, String>,
    },
    /// Envelope forwarded from another endpoint
    Message {
        /// Sender name
        from: String,
        /// Opaque envelope
        message: String,
        /// Relay timestamp, Unix milliseconds
        time: i64,
        /// Sender's registered public value
        #[serde(rename = "fromSecret")]
        from_secret: String,
    },
}

impl RelayMessage {
    /// Build an `error` reply with no target
    pub fn error(message: impl Into<String>) -> Self {
        RelayMessage::Error {
            message: message.into(),
            to: None,
        }
    }

    /// Build a `delKey` reply
    pub fn del_key(to: impl Into<String>, message: impl Into<String>) -> Self {
        RelayMessage::DelKey {
            to: to.into(),
            message: message.into(),
        }
    }
}

/// One console line: `{to, message}`, where `to: "-1"` broadcasts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Outgoing {
    /// Peer name or [`BROADCAST`]
    pub to: String,
    /// Plaintext
    pub message: String,
}

/// Who an [`Outgoing`] message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    /// Every peer currently in the address book
    Broadcast,
    /// One named peer
    Peer(&'a str),
}

impl Outgoing {
    /// Create a message for one peer
    pub fn new(to: impl Into<String>, message: impl Into<String>) -> Self {
        Outgoing {
            to: to.into(),
            message: message.into(),
        }
    }

    /// Create a broadcast message
    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::new(BROADCAST, message)
    }

    /// Parse a console line
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Resolve the broadcast sentinel
    pub fn recipient(&self) -> Recipient<'_> {
        if self.to == BROADCAST {
            Recipient::Broadcast
        } else {
            Recipient::Peer(&self.to)
        }
    }
}

/// A decrypted message, printed as one JSON line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Plaintext, or `null` when decryption failed
    pub message: Option<String>,
    /// Relay timestamp, Unix milliseconds
    pub time: i64,
    /// Sender name
    pub from: String,
    /// Our own name
    pub to: String,
}

fn string_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}
