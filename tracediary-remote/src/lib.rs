//! Versioned content store client for TraceDiary.
//!
//! The canonical copy of the diary lives in a git-hosted repository reached
//! through a contents REST API (Gitee v5). Every file carries a version token
//! (the blob sha) and writes are compare-and-swap: an update names the version
//! it replaces and fails with a conflict if the server has moved on.
//!
//! - [`ContentStoreClient`] talks HTTP
//! - [`MemoryFiles`] is an in-process repository with the same semantics
//! - [`VersionedFiles`] is the seam both implement, including the
//!   configured → `main` → `master` branch fallback

pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod memory;
pub mod repo;

pub use client::ContentStoreClient;
pub use config::StoreConfig;
pub use error::{ConflictKind, FailureKind, StoreError, StoreResult};
pub use files::{BranchSelector, FileWrite, RemoteFile, VersionedFiles, WriteReceipt};
pub use memory::MemoryFiles;
pub use repo::{parse_repo_input, RepoRef};
