//! The versioned-file seam shared by the HTTP client and the in-memory store.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::RwLock;
use tracing::{debug, info};

/// Result of reading a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFile {
    Missing,
    Found { content: String, version: String },
}

impl RemoteFile {
    pub fn exists(&self) -> bool {
        matches!(self, RemoteFile::Found { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            RemoteFile::Found { version, .. } => Some(version),
            RemoteFile::Missing => None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            RemoteFile::Found { content, .. } => Some(content),
            RemoteFile::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Version token of the file after the write.
    pub version: String,
}

/// A single CAS write. `expected_version == None` means "create".
#[derive(Debug, Clone, Copy)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    pub expected_version: Option<&'a str>,
}

/// Remembers which branch works for this session.
///
/// Starts at the configured branch; the first candidate that does not report
/// "branch missing" is adopted for subsequent calls.
#[derive(Debug)]
pub struct BranchSelector {
    active: RwLock<String>,
    fallbacks: Vec<String>,
}

impl BranchSelector {
    pub fn new(preferred: impl Into<String>, fallbacks: &[String]) -> Self {
        Self {
            active: RwLock::new(preferred.into().trim().to_string()),
            fallbacks: fallbacks.to_vec(),
        }
    }

    pub fn active(&self) -> String {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Active branch then fallbacks, trimmed, blank-free and deduplicated.
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for branch in std::iter::once(self.active()).chain(self.fallbacks.iter().cloned()) {
            let branch = branch.trim().to_string();
            if !branch.is_empty() && !out.contains(&branch) {
                out.push(branch);
            }
        }
        out
    }

    pub fn adopt(&self, branch: &str) {
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.as_str() != branch {
            info!(from = %active, to = %branch, "adopting fallback branch");
            *active = branch.to_string();
        }
    }
}

/// A repository of versioned files with CAS writes.
///
/// Implementors provide branch-explicit access; `read` and `write` layer the
/// branch fallback chain on top.
#[async_trait]
pub trait VersionedFiles: Send + Sync {
    fn branches(&self) -> &BranchSelector;

    async fn read_file(&self, path: &str, branch: &str) -> StoreResult<RemoteFile>;

    async fn write_file(&self, write: &FileWrite<'_>, branch: &str) -> StoreResult<WriteReceipt>;

    /// Reads from the active branch, falling back when the branch is missing.
    async fn read(&self, path: &str) -> StoreResult<RemoteFile> {
        let candidates = self.branches().candidates();
        let mut last = None;
        for (i, branch) in candidates.iter().enumerate() {
            match self.read_file(path, branch).await {
                Ok(file) => {
                    self.branches().adopt(branch);
                    return Ok(file);
                }
                Err(e) if e.is_branch_missing() && i + 1 < candidates.len() => {
                    debug!(%branch, "branch missing on read, trying next");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| StoreError::InvalidInput("no branch configured".into())))
    }

    /// Writes to the active branch, falling back when the branch is missing.
    async fn write(&self, write: &FileWrite<'_>) -> StoreResult<WriteReceipt> {
        let candidates = self.branches().candidates();
        let mut last = None;
        for (i, branch) in candidates.iter().enumerate() {
            match self.write_file(write, branch).await {
                Ok(receipt) => {
                    self.branches().adopt(branch);
                    return Ok(receipt);
                }
                Err(e) if e.is_branch_missing() && i + 1 < candidates.len() => {
                    debug!(%branch, path = write.path, "branch missing on write, trying next");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| StoreError::InvalidInput("no branch configured".into())))
    }
}
