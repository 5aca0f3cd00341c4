//! In-memory versioned repository.
//!
//! Same CAS and branch semantics as the HTTP client, for offline use and
//! tests. Versions are sha256 digests of a write counter plus the content.

use crate::error::{StoreError, StoreResult};
use crate::files::{BranchSelector, FileWrite, RemoteFile, VersionedFiles, WriteReceipt};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Stored {
    content: String,
    version: String,
}

#[derive(Default)]
struct State {
    existing_branches: BTreeSet<String>,
    files: HashMap<(String, String), Stored>,
    counter: u64,
    reads: usize,
    writes: usize,
    read_failures: VecDeque<StoreError>,
    write_failures: VecDeque<StoreError>,
    write_delay: Option<Duration>,
}

pub struct MemoryFiles {
    branches: BranchSelector,
    state: Mutex<State>,
}

impl Default for MemoryFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFiles {
    /// A repository with a single `master` branch, selected.
    pub fn new() -> Self {
        Self::with_branches("master", &["master"], &["main".to_string(), "master".to_string()])
    }

    /// `preferred` is where the selector starts; `existing` are the branches
    /// the repository actually has.
    pub fn with_branches(preferred: &str, existing: &[&str], fallbacks: &[String]) -> Self {
        let state = State {
            existing_branches: existing.iter().map(|b| b.to_string()).collect(),
            ..State::default()
        };
        Self {
            branches: BranchSelector::new(preferred, fallbacks),
            state: Mutex::new(state),
        }
    }

    fn next_version(state: &mut State, content: &str) -> String {
        state.counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(state.counter.to_be_bytes());
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Writes directly on the active branch, bypassing CAS. Simulates another device.
    pub async fn put_remote(&self, path: &str, content: &str) -> String {
        let branch = self.branches.active();
        let mut state = self.state.lock().await;
        let version = Self::next_version(&mut state, content);
        state.existing_branches.insert(branch.clone());
        state.files.insert(
            (branch, path.to_string()),
            Stored {
                content: content.to_string(),
                version: version.clone(),
            },
        );
        version
    }

    /// Current stored content on the active branch.
    pub async fn get(&self, path: &str) -> Option<(String, String)> {
        let branch = self.branches.active();
        self.state
            .lock()
            .await
            .files
            .get(&(branch, path.to_string()))
            .map(|s| (s.content.clone(), s.version.clone()))
    }

    pub async fn paths(&self) -> Vec<String> {
        let branch = self.branches.active();
        let mut paths: Vec<String> = self
            .state
            .lock()
            .await
            .files
            .keys()
            .filter(|(b, _)| *b == branch)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    pub async fn read_count(&self) -> usize {
        self.state.lock().await.reads
    }

    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    /// The next read fails with `err` instead of touching state.
    pub async fn fail_next_read(&self, err: StoreError) {
        self.state.lock().await.read_failures.push_back(err);
    }

    /// The next write fails with `err` instead of touching state.
    pub async fn fail_next_write(&self, err: StoreError) {
        self.state.lock().await.write_failures.push_back(err);
    }

    /// Delays every write by `delay` before it applies.
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.write_delay = delay;
    }
}

fn branch_missing(branch: &str) -> StoreError {
    StoreError::Api {
        status: 404,
        message: format!("Branch '{branch}' does not exist"),
    }
}

#[async_trait]
impl VersionedFiles for MemoryFiles {
    fn branches(&self) -> &BranchSelector {
        &self.branches
    }

    async fn read_file(&self, path: &str, branch: &str) -> StoreResult<RemoteFile> {
        let mut state = self.state.lock().await;
        state.reads += 1;
        if let Some(err) = state.read_failures.pop_front() {
            return Err(err);
        }
        if !state.existing_branches.contains(branch) {
            return Err(branch_missing(branch));
        }
        Ok(match state.files.get(&(branch.to_string(), path.to_string())) {
            Some(stored) => RemoteFile::Found {
                content: stored.content.clone(),
                version: stored.version.clone(),
            },
            None => RemoteFile::Missing,
        })
    }

    async fn write_file(&self, write: &FileWrite<'_>, branch: &str) -> StoreResult<WriteReceipt> {
        let delay = {
            let mut state = self.state.lock().await;
            state.writes += 1;
            if let Some(err) = state.write_failures.pop_front() {
                return Err(err);
            }
            state.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if !state.existing_branches.contains(branch) {
            return Err(branch_missing(branch));
        }
        let key = (branch.to_string(), write.path.to_string());
        let current = state.files.get(&key).map(|s| s.version.clone());
        let expected = write.expected_version.map(str::trim).filter(|v| !v.is_empty());

        match (expected, current.as_deref()) {
            (None, Some(_)) => {
                return Err(StoreError::from_status(
                    400,
                    Some("A file with this name already exists".into()),
                ));
            }
            (Some(_), None) => {
                return Err(StoreError::from_status(409, Some("sha does not match".into())));
            }
            (Some(exp), Some(cur)) if exp != cur => {
                return Err(StoreError::from_status(409, Some("sha does not match".into())));
            }
            _ => {}
        }

        let version = Self::next_version(&mut state, write.content);
        state.files.insert(
            key,
            Stored {
                content: write.content.to_string(),
                version: version.clone(),
            },
        );
        Ok(WriteReceipt { version })
    }
}
