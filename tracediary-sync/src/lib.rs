//! Entry sync for TraceDiary.
//!
//! Diary entries are sealed with the session data key and pushed to the
//! versioned content store one file per entry, with compare-and-swap against
//! the version recorded in the entry's baseline. A lost race is surfaced as a
//! conflict for the user to resolve, never merged silently.
//!
//! - [`SyncEngine`] debounces edits, guards against overlapping uploads,
//!   defers while offline and retries once on reconnect
//! - [`DiaryUploader`] encrypts, writes and keeps the remote metadata index current
//! - [`pull_entry`] / [`pull_remote_entries`] bring remote content down
//! - [`push_local_entries`] uploads every local record in one pass
//! - [`pull_and_cache_metadata`] serves the metadata index from a local cache

pub mod baseline;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod indicator;
pub mod local;
pub mod metadata;
pub mod metadata_cache;
pub mod pull;
pub mod push;
pub mod uploader;

pub use baseline::{is_dirty, BaselineStore, KvBaselineStore, SyncBaselineRecord};
pub use config::SyncConfig;
pub use connectivity::Connectivity;
pub use engine::{ConflictChoice, ConflictState, SyncEngine, SyncState, SyncStatus};
pub use entry::{commit_timestamp, word_count, SyncEntryMetadata};
pub use error::{SaveError, SyncError, SyncResult};
pub use fingerprint::{contents_match, fingerprint, normalize_content};
pub use indicator::{SyncIndicator, SyncIndicatorInput, Tone};
pub use local::{DiaryRecord, EntryKind, EntryRepository, KvEntryRepository};
pub use metadata::{MetadataEntry, MetadataIndex};
pub use metadata_cache::{
    pull_and_cache_metadata, KvMetadataCache, MetadataCache, MetadataCacheRecord, MetadataPull,
    MetadataSource, PullOptions,
};
pub use pull::{pull_entry, pull_remote_entries, PullIssue, PullOutcome, PullReport};
pub use push::{push_local_entries, PushReport};
pub use uploader::{system_now, DiaryUploader, EntryUploader, NowFn, UploadOutcome, UploadRequest};
