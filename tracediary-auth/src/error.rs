//! Auth error types.
//!
//! `Display` is for logs; [`AuthError::user_message`] is what reaches the UI.
//! Neither ever contains a password, token or key.

use thiserror::Error;
use tracediary_crypto::CryptoError;
use tracediary_remote::{FailureKind, StoreError};
use tracediary_storage::StorageError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("local configuration is missing")]
    NotConfigured,

    #[error("operation not allowed in stage {0}")]
    InvalidPhase(&'static str),

    #[error("master password is incorrect")]
    WrongPassword,

    #[error("master password is required")]
    PasswordRequired,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("remote error: {0}")]
    Remote(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cloud config error: {0}")]
    Mirror(String),

    #[error("background task failed")]
    Task,
}

impl AuthError {
    /// A message safe to show the user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(msg) => msg.clone(),
            AuthError::NotConfigured => "No local configuration found. Please run setup first.".into(),
            AuthError::InvalidPhase(_) => "This action is not available right now.".into(),
            AuthError::WrongPassword => "Incorrect master password.".into(),
            AuthError::PasswordRequired => {
                "Enter your master password to replace the stored token.".into()
            }
            AuthError::Crypto(e) if e.is_authentication_failure() => {
                "Stored data could not be decrypted with this password.".into()
            }
            AuthError::Crypto(_) => "Encryption parameters are invalid.".into(),
            AuthError::Remote(e) => remote_message(e),
            AuthError::Storage(_) => "Local storage is unavailable.".into(),
            AuthError::Mirror(_) => "Cloud configuration could not be synced.".into(),
            AuthError::Task => "Operation failed, please retry.".into(),
        }
    }
}

fn remote_message(e: &StoreError) -> String {
    match e {
        StoreError::NotFound => {
            "Repository not found, or this token cannot access it.".into()
        }
        _ => match e.kind() {
            FailureKind::Validation => e.to_string(),
            FailureKind::Auth => "Token is invalid or lacks permission for this repository.".into(),
            FailureKind::Network => "Cannot reach the remote API. Check the network and retry.".into(),
            FailureKind::Conflict | FailureKind::Api => match e.status() {
                Some(status) => format!("Repository access check failed ({status})."),
                None => "Repository access check failed.".into(),
            },
        },
    }
}
