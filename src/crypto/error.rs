//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The modulus sent by the relay is unusable
    #[error("Invalid modulus: {0}")]
    InvalidModulus(String),

    /// The peer public value is outside the range `[2, p - 2]` or not encoded properly
    #[error("Invalid public value")]
    InvalidPublicKey,

    /// An envelope or public value is not valid base64, or has the wrong shape
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Decryption failed: bad padding, wrong key or non UTF-8 plaintext
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
