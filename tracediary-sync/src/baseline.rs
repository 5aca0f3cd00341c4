//! Last-synced state per entry.

use crate::entry::SyncEntryMetadata;
use crate::error::SyncResult;
use crate::fingerprint::fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracediary_storage::{get_json, put_json, KeyValueStore};

pub const BASELINE_KEY_PREFIX: &str = "trace-diary:sync-baseline:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBaselineRecord {
    pub entry_id: String,
    pub fingerprint: String,
    pub synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,
}

impl SyncBaselineRecord {
    pub fn for_entry(
        entry: &SyncEntryMetadata,
        synced_at: DateTime<Utc>,
        remote_version: Option<String>,
    ) -> Self {
        Self {
            entry_id: entry.entry_id(),
            fingerprint: fingerprint(entry),
            synced_at,
            remote_version,
        }
    }
}

/// Dirty unless a baseline exists and its fingerprint matches.
pub fn is_dirty(entry: &SyncEntryMetadata, baseline: Option<&SyncBaselineRecord>) -> bool {
    baseline.is_none_or(|b| b.fingerprint != fingerprint(entry))
}

#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn get(&self, entry_id: &str) -> SyncResult<Option<SyncBaselineRecord>>;

    async fn put(&self, record: &SyncBaselineRecord) -> SyncResult<()>;
}

/// [`BaselineStore`] over the local key-value store.
#[derive(Clone)]
pub struct KvBaselineStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvBaselineStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(entry_id: &str) -> String {
        format!("{BASELINE_KEY_PREFIX}{entry_id}")
    }
}

#[async_trait]
impl BaselineStore for KvBaselineStore {
    async fn get(&self, entry_id: &str) -> SyncResult<Option<SyncBaselineRecord>> {
        Ok(get_json(self.store.as_ref(), &Self::key(entry_id)).await?)
    }

    async fn put(&self, record: &SyncBaselineRecord) -> SyncResult<()> {
        put_json(self.store.as_ref(), &Self::key(&record.entry_id), record).await?;
        Ok(())
    }
}
