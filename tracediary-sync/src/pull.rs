//! Remote to local pulls: one entry on demand, or every entry the remote
//! metadata index lists.

use crate::baseline::{BaselineStore, SyncBaselineRecord};
use crate::config::SyncConfig;
use crate::entry::SyncEntryMetadata;
use crate::error::SyncResult;
use crate::fingerprint::{fingerprint, normalize_content};
use crate::local::{DiaryRecord, EntryRepository};
use crate::metadata::{MetadataEntry, MetadataIndex};
use chrono::{DateTime, Utc};
use tracediary_crypto::{decrypt_with_aes_gcm, DataKey};
use tracediary_remote::{RemoteFile, StoreError, VersionedFiles};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled {
        entry: SyncEntryMetadata,
        version: String,
        synced_at: DateTime<Utc>,
    },
    /// No remote file, or an empty one.
    NotFound,
    /// Local has non-empty content that differs from the remote copy.
    Conflict {
        local: SyncEntryMetadata,
        remote: SyncEntryMetadata,
        remote_version: String,
    },
}

/// Fetches the remote copy of `local`'s slot. Auth and network failures are
/// returned as errors; classify them with [`crate::SyncError::kind`].
pub async fn pull_entry(
    files: &dyn VersionedFiles,
    key: &DataKey,
    local: &SyncEntryMetadata,
    now: DateTime<Utc>,
) -> SyncResult<PullOutcome> {
    let path = local.remote_path();
    let (content, version) = match files.read(&path).await {
        Ok(RemoteFile::Found { content, version }) if !content.trim().is_empty() => {
            (content, version)
        }
        Ok(_) | Err(StoreError::NotFound) => {
            debug!(%path, "nothing to pull");
            return Ok(PullOutcome::NotFound);
        }
        Err(e) => return Err(e.into()),
    };

    let plain = decrypt_with_aes_gcm(&content, key)?;
    let remote = local.with_content(plain, now);
    let local_text = normalize_content(local.content());
    if !local_text.trim().is_empty() && local_text != normalize_content(remote.content()) {
        warn!(entry = %local.entry_id(), "pull found diverging local content");
        return Ok(PullOutcome::Conflict {
            local: local.clone(),
            remote,
            remote_version: version,
        });
    }

    Ok(PullOutcome::Pulled {
        entry: remote,
        version,
        synced_at: now,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullIssue {
    pub entry_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicted: usize,
    pub failed: usize,
    pub downloaded: usize,
    pub conflicts: Vec<PullIssue>,
    pub failed_items: Vec<PullIssue>,
    pub metadata_missing: bool,
}

impl PullReport {
    fn conflict(&mut self, entry_id: String, reason: &str) {
        self.conflicted += 1;
        self.conflicts.push(PullIssue {
            entry_id,
            reason: reason.to_string(),
        });
    }

    fn failure(&mut self, entry_id: String, reason: impl Into<String>) {
        self.failed += 1;
        self.failed_items.push(PullIssue {
            entry_id,
            reason: reason.into(),
        });
    }
}

enum Applied {
    Inserted,
    Updated,
    Skipped,
    Conflicted,
    Failed(&'static str),
}

/// Pulls every entry listed in the remote metadata index into `repo`.
///
/// An entry is skipped when the local copy is at least as new, reported as a
/// conflict when the local copy has unsynced edits, and otherwise downloaded,
/// stored and baselined at the index's modification time. Per-entry failures
/// are counted; only failures reading the index itself are returned as errors.
pub async fn pull_remote_entries(
    files: &dyn VersionedFiles,
    key: &DataKey,
    repo: &dyn EntryRepository,
    baselines: &dyn BaselineStore,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> SyncResult<PullReport> {
    let mut report = PullReport::default();

    let content = match files.read(config.metadata_path()).await? {
        RemoteFile::Found { content, .. } if !content.trim().is_empty() => content,
        _ => {
            info!("remote metadata index missing, nothing to pull");
            report.metadata_missing = true;
            return Ok(report);
        }
    };
    let index = MetadataIndex::parse(&decrypt_with_aes_gcm(&content, key)?, now)?;
    report.total = index.entries.len();

    for entry in &index.entries {
        let entry_id = entry.entry_id();
        match pull_one(files, key, repo, baselines, entry, &mut report).await {
            Ok(Applied::Inserted) => report.inserted += 1,
            Ok(Applied::Updated) => report.updated += 1,
            Ok(Applied::Skipped) => report.skipped += 1,
            Ok(Applied::Conflicted) => {
                report.conflict(entry_id, "local changes not yet synced, overwrite skipped")
            }
            Ok(Applied::Failed(reason)) => report.failure(entry_id, reason),
            Err(e) => {
                warn!(entry = %entry_id, error = %e, "failed to pull entry");
                report.failure(entry_id, e.to_string());
            }
        }
    }

    info!(
        total = report.total,
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        conflicted = report.conflicted,
        failed = report.failed,
        "remote pull finished"
    );
    Ok(report)
}

async fn pull_one(
    files: &dyn VersionedFiles,
    key: &DataKey,
    repo: &dyn EntryRepository,
    baselines: &dyn BaselineStore,
    entry: &MetadataEntry,
    report: &mut PullReport,
) -> SyncResult<Applied> {
    let entry_id = entry.entry_id();
    let local = repo.get(&entry_id).await?;

    if let Some(local) = &local {
        if local.modified_at >= entry.modified_at() {
            return Ok(Applied::Skipped);
        }
        let baseline = match baselines.get(&entry_id).await {
            Ok(baseline) => baseline,
            Err(e) => {
                warn!(entry = %entry_id, error = %e, "failed to load baseline");
                None
            }
        };
        if has_unsynced_changes(local, baseline.as_ref()) {
            return Ok(Applied::Conflicted);
        }
    }

    let (content, version) = match files.read(entry.filename()).await? {
        RemoteFile::Found { content, version } if !content.trim().is_empty() => (content, version),
        _ => return Ok(Applied::Failed("remote file missing or empty")),
    };
    let plain = decrypt_with_aes_gcm(&content, key)?;
    report.downloaded += 1;

    let record = DiaryRecord::from_index_entry(entry, plain);
    repo.put(&record).await?;

    let baseline = SyncBaselineRecord {
        entry_id: entry_id.clone(),
        fingerprint: fingerprint(&entry.to_sync_entry(record.content.as_str())),
        synced_at: entry.modified_at(),
        remote_version: Some(version),
    };
    if let Err(e) = baselines.put(&baseline).await {
        warn!(entry = %entry_id, error = %e, "failed to persist baseline after pull");
    }

    Ok(if local.is_some() {
        Applied::Updated
    } else {
        Applied::Inserted
    })
}

/// Edited after the last sync and different from what was synced. Without a
/// baseline nothing is known to be unsynced.
fn has_unsynced_changes(local: &DiaryRecord, baseline: Option<&SyncBaselineRecord>) -> bool {
    let Some(baseline) = baseline else {
        return false;
    };
    if local.modified_at <= baseline.synced_at {
        return false;
    }
    local
        .to_sync_metadata()
        .is_some_and(|meta| fingerprint(&meta) != baseline.fingerprint)
}
