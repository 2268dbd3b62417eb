//! Cryptographic primitives for the endpoint
//!
//! This module provides the building blocks the endpoint session uses:
//! - `exchange`: finite-field Diffie-Hellman over the relay's modulus
//! - `hash`: SHA-256, turning DH output into a cipher key
//! - `cipher`: AES-256-CBC envelopes
//!
//! The relay never touches any of this; it only forwards public values.

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod hash;

// Re-export commonly used types
pub use cipher::Cipher;
pub use error::{CryptoError, CryptoResult};
pub use exchange::{Group, KeyPair, Modulus, PublicValue, SharedSecret};
pub use hash::Hash;

/// Encrypt plaintext for a peer: derive `Hash(DH(ours, theirs))` then seal
pub fn encrypt(keypair: &KeyPair, peer: &PublicValue, plaintext: &str) -> CryptoResult<String> {
    let key = keypair.derive_key(peer)?;
    Ok(Cipher::seal(&key, plaintext))
}

/// Decrypt an envelope from a peer
///
/// Every failure collapses to `None`; the caller decides how to report it.
pub fn decrypt(keypair: &KeyPair, peer: &PublicValue, envelope: &str) -> Option<String> {
    let key = keypair.derive_key(peer).ok()?;
    Cipher::open(&key, envelope).ok()
}
