//! Content store error types and failure classification.
//!
//! Upstream retry and conflict handling keys off [`StoreError::kind`], so
//! every HTTP outcome lands in exactly one [`FailureKind`].

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse failure classes driving retry and conflict behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed input; retrying without changing it is pointless.
    Validation,
    /// Credentials rejected.
    Auth,
    /// Transport failure or timeout.
    Network,
    /// Compare-and-swap lost against the server state.
    Conflict,
    /// Any other API failure.
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The expected version no longer matches.
    VersionMismatch,
    /// A create hit an existing file.
    FileExists,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid repository: {0}")]
    InvalidRepo(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("token rejected or lacks permission ({status})")]
    Auth { status: u16, message: Option<String> },

    #[error("network error: {0}")]
    Network(String),

    #[error("write conflict ({status}): {message}")]
    Conflict {
        kind: ConflictKind,
        status: u16,
        message: String,
    },

    #[error("repository not found or not accessible with this token")]
    NotFound,

    #[error("remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Maps a non-success HTTP status plus the server's message.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        if status == 401 || status == 403 {
            return StoreError::Auth { status, message };
        }
        let text = message.unwrap_or_default();
        if looks_like_version_mismatch(status, &text) {
            return StoreError::Conflict {
                kind: ConflictKind::VersionMismatch,
                status,
                message: text,
            };
        }
        if looks_like_file_exists(status, &text) {
            return StoreError::Conflict {
                kind: ConflictKind::FileExists,
                status,
                message: text,
            };
        }
        StoreError::Api {
            status,
            message: text,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::InvalidRepo(_) | StoreError::InvalidInput(_) => FailureKind::Validation,
            StoreError::Auth { .. } => FailureKind::Auth,
            StoreError::Network(_) => FailureKind::Network,
            StoreError::Conflict { .. } => FailureKind::Conflict,
            StoreError::NotFound | StoreError::Api { .. } | StoreError::Decode(_) => {
                FailureKind::Api
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == FailureKind::Conflict
    }

    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict {
                kind: ConflictKind::VersionMismatch,
                ..
            }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Auth { status, .. }
            | StoreError::Conflict { status, .. }
            | StoreError::Api { status, .. } => Some(*status),
            StoreError::NotFound => Some(404),
            _ => None,
        }
    }

    /// The server said the target branch does not exist.
    pub fn is_branch_missing(&self) -> bool {
        match self {
            StoreError::Api { status, message } if matches!(status, 400 | 404 | 422) => {
                let text = squash(message);
                let mentions_branch = text.contains("branch") || text.contains("分支");
                let missing = ["not exist", "not found", "unknown", "invalid", "不存在", "未找到", "无效"]
                    .iter()
                    .any(|p| text.contains(p));
                mentions_branch && missing
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs can carry the access token as a query parameter.
        let e = e.without_url();
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            StoreError::from_status(status.as_u16(), None)
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Lowercases and collapses whitespace runs so phrase checks see single spaces.
fn squash(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn looks_like_version_mismatch(status: u16, message: &str) -> bool {
    if status == 409 {
        return true;
    }
    let text = squash(message);
    text.contains("sha")
        && ["mismatch", "not match", "冲突", "不一致"]
            .iter()
            .any(|p| text.contains(p))
}

fn looks_like_file_exists(status: u16, message: &str) -> bool {
    if !matches!(status, 400 | 409 | 422) {
        return false;
    }
    let text = squash(message);
    if text.contains("already exists") || text.contains("file exists") {
        return true;
    }
    if let Some(at) = text.find("path") {
        if text[at..].contains("exists") {
            return true;
        }
    }
    text.contains("已存在") || text.contains("同名文件")
}
