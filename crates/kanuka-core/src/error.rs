//! Error types for Kanuka Core.

use thiserror::Error;

/// Errors from key handling, wrapping and the content cipher.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("refusing to use a {0}-bit RSA key, at least 2048 bits are required")]
    UnsupportedKeySize(usize),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("key encoding error: {0}")]
    KeyEncoding(String),

    #[error("key wrapping failed: {0}")]
    Wrap(String),

    /// The record was not produced for this private key, or it is damaged.
    #[error("access record does not decrypt with this private key")]
    Unwrap,

    #[error("empty access record")]
    EmptyRecord,

    #[error("access record is {actual} bytes, expected {expected} for the recipient key")]
    RecordSize { expected: usize, actual: usize },

    #[error("invalid content key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
