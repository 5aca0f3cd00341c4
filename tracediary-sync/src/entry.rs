//! Diary entries as they travel through sync.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One logical diary entry. Plaintext in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncEntryMetadata {
    Daily {
        entry_id: String,
        date: NaiveDate,
        content: String,
        modified_at: DateTime<Utc>,
    },
    YearlySummary {
        entry_id: String,
        year: i32,
        content: String,
        modified_at: DateTime<Utc>,
    },
}

impl SyncEntryMetadata {
    pub fn daily(date: NaiveDate, content: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        SyncEntryMetadata::Daily {
            entry_id: daily_id(date),
            date,
            content: content.into(),
            modified_at,
        }
    }

    pub fn yearly_summary(year: i32, content: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        SyncEntryMetadata::YearlySummary {
            entry_id: summary_id(year),
            year,
            content: content.into(),
            modified_at,
        }
    }

    /// The explicit id when set, else `daily:{date}` / `summary:{year}`.
    pub fn entry_id(&self) -> String {
        let explicit = match self {
            SyncEntryMetadata::Daily { entry_id, .. }
            | SyncEntryMetadata::YearlySummary { entry_id, .. } => entry_id.trim(),
        };
        if !explicit.is_empty() {
            return explicit.to_string();
        }
        match self {
            SyncEntryMetadata::Daily { date, .. } => daily_id(*date),
            SyncEntryMetadata::YearlySummary { year, .. } => summary_id(*year),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            SyncEntryMetadata::Daily { content, .. }
            | SyncEntryMetadata::YearlySummary { content, .. } => content,
        }
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        match self {
            SyncEntryMetadata::Daily { modified_at, .. }
            | SyncEntryMetadata::YearlySummary { modified_at, .. } => *modified_at,
        }
    }

    /// Remote file path of the encrypted entry.
    pub fn remote_path(&self) -> String {
        match self {
            SyncEntryMetadata::Daily { date, .. } => format!("{date}.md.enc"),
            SyncEntryMetadata::YearlySummary { year, .. } => format!("{year}-summary.md.enc"),
        }
    }

    /// Fingerprint scope: the slot this entry occupies regardless of id.
    pub fn scope(&self) -> String {
        match self {
            SyncEntryMetadata::Daily { date, .. } => format!("daily:{date}"),
            SyncEntryMetadata::YearlySummary { year, .. } => format!("yearly:{year}"),
        }
    }

    pub fn commit_message(&self, timestamp: &str) -> String {
        match self {
            SyncEntryMetadata::Daily { date, .. } => format!("chore: diary {date} @ {timestamp}"),
            SyncEntryMetadata::YearlySummary { year, .. } => {
                format!("chore: yearly summary {year} @ {timestamp}")
            }
        }
    }

    /// Same entry slot with different content.
    pub fn with_content(&self, content: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match &mut next {
            SyncEntryMetadata::Daily {
                content: c,
                modified_at: m,
                ..
            }
            | SyncEntryMetadata::YearlySummary {
                content: c,
                modified_at: m,
                ..
            } => {
                *c = content.into();
                *m = modified_at;
            }
        }
        next
    }
}

pub(crate) fn daily_id(date: NaiveDate) -> String {
    format!("daily:{date}")
}

pub(crate) fn summary_id(year: i32) -> String {
    format!("summary:{year}")
}

/// Second-precision timestamp at `offset`, e.g. `2026-03-01T16:00:00+08:00`.
pub fn commit_timestamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format("%Y-%m-%dT%H:%M:%S%:z")
        .to_string()
}

/// Visible character count: everything except whitespace.
pub fn word_count(content: &str) -> usize {
    content.chars().filter(|c| !c.is_whitespace()).count()
}
