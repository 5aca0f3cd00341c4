//! The remote metadata index: one encrypted JSON file listing every entry.

use crate::entry::{daily_id, summary_id, word_count, SyncEntryMetadata};
use crate::error::SyncResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INDEX_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MetadataEntry {
    Daily {
        date: NaiveDate,
        filename: String,
        word_count: usize,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    },
    YearlySummary {
        year: i32,
        date: NaiveDate,
        filename: String,
        word_count: usize,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    },
}

impl MetadataEntry {
    pub fn entry_id(&self) -> String {
        match self {
            MetadataEntry::Daily { date, .. } => daily_id(*date),
            MetadataEntry::YearlySummary { year, .. } => summary_id(*year),
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            MetadataEntry::Daily { filename, .. } | MetadataEntry::YearlySummary { filename, .. } => {
                filename
            }
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            MetadataEntry::Daily { created_at, .. }
            | MetadataEntry::YearlySummary { created_at, .. } => *created_at,
        }
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        match self {
            MetadataEntry::Daily { modified_at, .. }
            | MetadataEntry::YearlySummary { modified_at, .. } => *modified_at,
        }
    }

    /// The sync view of this entry carrying `content`.
    pub fn to_sync_entry(&self, content: impl Into<String>) -> SyncEntryMetadata {
        match self {
            MetadataEntry::Daily {
                date, modified_at, ..
            } => SyncEntryMetadata::daily(*date, content, *modified_at),
            MetadataEntry::YearlySummary {
                year, modified_at, ..
            } => SyncEntryMetadata::yearly_summary(*year, content, *modified_at),
        }
    }

    fn same_slot(&self, entry: &SyncEntryMetadata) -> bool {
        match (self, entry) {
            (MetadataEntry::Daily { date: a, .. }, SyncEntryMetadata::Daily { date: b, .. }) => a == b,
            (
                MetadataEntry::YearlySummary { year: a, .. },
                SyncEntryMetadata::YearlySummary { year: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataIndex {
    pub version: String,
    pub last_sync: DateTime<Utc>,
    pub entries: Vec<MetadataEntry>,
}

impl MetadataIndex {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            last_sync: now,
            entries: Vec::new(),
        }
    }

    /// Lenient parse: unknown shapes become an empty index and malformed
    /// entries are dropped. Only invalid JSON is an error.
    pub fn parse(json: &str, now: DateTime<Utc>) -> SyncResult<Self> {
        let raw: Value = serde_json::from_str(json)?;
        let Value::Object(map) = raw else {
            return Ok(Self::empty(now));
        };

        let version = map
            .get("version")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(INDEX_VERSION)
            .to_string();
        let last_sync = map
            .get("lastSync")
            .and_then(Value::as_str)
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        let entries = match map.get("entries") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            version,
            last_sync,
            entries,
        })
    }

    /// Inserts or replaces the row for `entry`, keeping the first `createdAt`.
    pub fn upsert(&mut self, entry: &SyncEntryMetadata, now: DateTime<Utc>) {
        let existing = self.entries.iter().position(|e| e.same_slot(entry));
        let created_at = existing
            .map(|i| self.entries[i].created_at())
            .unwrap_or_else(|| entry.modified_at());
        let next = match entry {
            SyncEntryMetadata::Daily {
                date, modified_at, ..
            } => MetadataEntry::Daily {
                date: *date,
                filename: entry.remote_path(),
                word_count: word_count(entry.content()),
                created_at,
                modified_at: *modified_at,
            },
            SyncEntryMetadata::YearlySummary {
                year, modified_at, ..
            } => MetadataEntry::YearlySummary {
                year: *year,
                date: NaiveDate::from_ymd_opt(*year, 12, 31).unwrap_or_default(),
                filename: entry.remote_path(),
                word_count: word_count(entry.content()),
                created_at,
                modified_at: *modified_at,
            },
        };

        match existing {
            Some(i) => self.entries[i] = next,
            None => self.entries.push(next),
        }
        if self.version.trim().is_empty() {
            self.version = INDEX_VERSION.to_string();
        }
        self.last_sync = now;
    }
}
