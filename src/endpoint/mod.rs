//! Endpoint side: keypair, peer discovery and end-to-end encryption
//!
//! [`Session`] holds the protocol state and does no I/O; [`run`] drives it
//! over any [`Transport`](crate::transport::Transport).

pub mod client;
pub mod session;

pub use client::{run, EndpointError, EndpointResult};
pub use session::{Effect, Event, Session, SessionError, SessionResult};
