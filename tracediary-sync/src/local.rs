//! Local diary records and their repository.

use crate::entry::{word_count, SyncEntryMetadata};
use crate::error::SyncResult;
use crate::metadata::MetadataEntry;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracediary_storage::{get_json, put_json, KeyValueStore};

pub const DIARY_KEY_PREFIX: &str = "trace-diary:diary:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Daily,
    YearlySummary,
}

/// A diary entry as the device stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub filename: String,
    pub content: String,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl DiaryRecord {
    /// Builds the local record for a metadata index row and its decrypted body.
    pub fn from_index_entry(entry: &MetadataEntry, content: impl Into<String>) -> Self {
        let content = content.into();
        let (kind, date, year) = match entry {
            MetadataEntry::Daily { date, .. } => (EntryKind::Daily, *date, None),
            MetadataEntry::YearlySummary { year, date, .. } => {
                (EntryKind::YearlySummary, *date, Some(*year))
            }
        };
        Self {
            id: entry.entry_id(),
            kind,
            date,
            year,
            filename: entry.filename().to_string(),
            word_count: word_count(&content),
            content,
            created_at: entry.created_at(),
            modified_at: entry.modified_at(),
        }
    }

    /// Year of a summary record, from the field or else the `summary:YYYY` id.
    pub fn summary_year(&self) -> Option<i32> {
        self.year.or_else(|| {
            self.id
                .strip_prefix("summary:")
                .filter(|y| y.len() == 4)
                .and_then(|y| y.parse().ok())
        })
    }

    /// The sync view of this record. `None` for a summary with no resolvable year.
    pub fn to_sync_metadata(&self) -> Option<SyncEntryMetadata> {
        match self.kind {
            EntryKind::Daily => Some(SyncEntryMetadata::Daily {
                entry_id: self.id.clone(),
                date: self.date,
                content: self.content.clone(),
                modified_at: self.modified_at,
            }),
            EntryKind::YearlySummary => {
                self.summary_year()
                    .map(|year| SyncEntryMetadata::YearlySummary {
                        entry_id: self.id.clone(),
                        year,
                        content: self.content.clone(),
                        modified_at: self.modified_at,
                    })
            }
        }
    }
}

#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn get(&self, id: &str) -> SyncResult<Option<DiaryRecord>>;

    async fn put(&self, record: &DiaryRecord) -> SyncResult<()>;

    /// Every record, ordered by id.
    async fn list(&self) -> SyncResult<Vec<DiaryRecord>>;
}

/// [`EntryRepository`] over the local key-value store.
#[derive(Clone)]
pub struct KvEntryRepository {
    store: Arc<dyn KeyValueStore>,
}

impl KvEntryRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntryRepository for KvEntryRepository {
    async fn get(&self, id: &str) -> SyncResult<Option<DiaryRecord>> {
        Ok(get_json(self.store.as_ref(), &format!("{DIARY_KEY_PREFIX}{id}")).await?)
    }

    async fn put(&self, record: &DiaryRecord) -> SyncResult<()> {
        let key = format!("{DIARY_KEY_PREFIX}{}", record.id);
        put_json(self.store.as_ref(), &key, record).await?;
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<DiaryRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(DIARY_KEY_PREFIX).await? {
            if let Some(record) = get_json(self.store.as_ref(), &key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
