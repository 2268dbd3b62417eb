//! # Murmur
//!
//! End-to-end encrypted messaging through an untrusted relay.
//!
//! ## Features
//!
//! - **Brokered key exchange**: the relay hands out a shared modulus and an
//!   address book of public values; endpoints derive pairwise keys locally
//! - **Opaque routing**: the relay forwards envelopes it cannot read
//! - **Queued discovery**: messages to peers whose key is unknown wait for it
//! - **Pluggable transport** layer (WebSocket, in-memory)
//!
//! ## Quick Start
//!
//! ```rust
//! use murmur::crypto::{self, Group, KeyPair};
//!
//! // Both sides use the modulus the relay hands out
//! let modulus = Group::Modp1024.modulus();
//! let alice = KeyPair::generate(&modulus);
//! let bob = KeyPair::generate(&modulus);
//!
//! // Alice seals with Bob's public value, Bob opens with Alice's
//! let envelope = crypto::encrypt(&alice, bob.public_value(), "hi").unwrap();
//! let plaintext = crypto::decrypt(&bob, alice.public_value(), &envelope);
//! assert_eq!(plaintext.as_deref(), Some("hi"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐                   ┌──────────────────────┐
//! │       ENDPOINT       │                   │        RELAY         │
//! │  Session | client    │                   │ Registry | Connection│
//! │  (keys, queues)      │                   │ Hub | serve          │
//! └──────────┬───────────┘                   └──────────┬───────────┘
//!            │            PROTOCOL (JSON)               │
//!            │   hello | getKey | getAllKeys | message  │
//! ┌──────────▼──────────────────────────────────────────▼───────────┐
//! │                        TRANSPORT LAYER                          │
//! │                  WebSocket | in-memory pair                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The envelope cipher carries no MAC. Tampering is caught only when it
//! breaks padding or UTF-8, so integrity is probabilistic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod protocol;
pub mod relay;
pub mod transport;

// Re-export main types at crate root
pub use config::{EndpointConfig, RelayConfig};
pub use crypto::{CryptoError, CryptoResult, Group, KeyPair, Modulus, PublicValue};
pub use endpoint::{Event, Session};
pub use protocol::{Delivery, Outgoing, BROADCAST};
pub use relay::{Hub, Registry};
