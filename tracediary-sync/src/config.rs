//! Sync configuration.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_METADATA_PATH: &str = "metadata.json.enc";

/// Configuration for the sync engine and uploader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last edit before a debounced upload (ms).
    pub debounce_ms: u64,

    /// Client-side cap on one upload attempt (ms).
    pub upload_timeout_ms: u64,

    /// Remote path of the encrypted metadata index.
    pub metadata_path: String,

    /// Upsert the metadata index after each successful entry upload.
    pub sync_metadata_index: bool,

    /// UTC offset used for commit message timestamps (seconds east).
    pub commit_utc_offset_secs: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 30_000,
            upload_timeout_ms: 25_000,
            metadata_path: DEFAULT_METADATA_PATH.to_string(),
            sync_metadata_index: true,
            commit_utc_offset_secs: 8 * 3600, // +08:00
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms.max(1))
    }

    /// Falls back to the default path when blank.
    pub fn metadata_path(&self) -> &str {
        match self.metadata_path.trim() {
            "" => DEFAULT_METADATA_PATH,
            path => path,
        }
    }

    /// Falls back to UTC when the configured offset is out of range.
    pub fn commit_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.commit_utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}
