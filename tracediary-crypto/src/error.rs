//! Crypto error types.
//!
//! Messages never include passwords, keys or ciphertext bytes.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("master password must not be empty")]
    EmptyPassword,

    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    #[error("invalid calibration options: {0}")]
    InvalidCalibration(String),

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("decryption failed (wrong key or corrupted data)")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl CryptoError {
    /// True when the payload authenticated badly, as opposed to being malformed.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::Decryption)
    }
}
