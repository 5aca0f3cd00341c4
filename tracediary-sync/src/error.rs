//! Sync error types.

use thiserror::Error;
use tracediary_crypto::CryptoError;
use tracediary_remote::{FailureKind, StoreError};
use tracediary_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by uploads, pulls and local bookkeeping.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("remote metadata index is empty")]
    EmptyIndex,

    #[error("upload timed out")]
    Timeout,
}

impl SyncError {
    /// Failure class driving retry. Timeouts count as network failures.
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Remote(e) => e.kind(),
            SyncError::Timeout => FailureKind::Network,
            SyncError::InvalidEntry(_) => FailureKind::Validation,
            SyncError::Crypto(_)
            | SyncError::Storage(_)
            | SyncError::Serialization(_)
            | SyncError::EmptyIndex => FailureKind::Api,
        }
    }
}

/// Why a save did not complete. `Display` is safe to show the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error("An upload is already in progress, try again shortly.")]
    Busy,

    /// A debounced save arrived mid-upload and will run after it.
    #[error("A newer save is queued and will upload after the current one.")]
    Queued,

    /// The attempt was superseded; its result was ignored.
    #[error("This upload was superseded and its result ignored.")]
    Stale,

    #[error("Offline. Changes are kept and will upload when the network returns.")]
    Offline,

    #[error("Network error. Changes are kept and will retry when the network returns.")]
    Network,

    #[error("Authentication failed. Unlock again or update the access token.")]
    Auth,

    #[error("Sync conflict detected. Keep the local, remote or a merged version.")]
    Conflict,

    #[error("Sync failed, please retry later.")]
    Unknown,

    #[error("There is no conflict to resolve.")]
    NoConflict,

    #[error("The chosen conflict version is unavailable, refresh and retry.")]
    ResolutionUnavailable,
}

impl SaveError {
    /// Stable short code.
    pub fn code(&self) -> &'static str {
        match self {
            SaveError::Busy => "busy",
            SaveError::Queued => "queued",
            SaveError::Stale => "stale",
            SaveError::Offline => "offline",
            SaveError::Network => "network",
            SaveError::Auth => "auth",
            SaveError::Conflict => "conflict",
            SaveError::Unknown => "unknown",
            SaveError::NoConflict => "no-conflict",
            SaveError::ResolutionUnavailable => "resolution-unavailable",
        }
    }
}
