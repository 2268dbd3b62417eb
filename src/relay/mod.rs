//! Relay side: name admission and message routing
//!
//! The relay sees only names, public values and opaque envelopes. It has no
//! notion of sessions or encryption.
//!
//! - [`registry`]: the address book and routing rules (pure, no I/O)
//! - [`connection`]: the per-connection handshake state machine
//! - [`server`]: the shared [`Hub`] and the task that drives each transport

pub mod connection;
pub mod registry;
pub mod server;

pub use connection::{Connection, ConnectionState};
pub use registry::{ConnectionId, Outbound, Registry};
pub use server::{serve, serve_connection, Hub};
