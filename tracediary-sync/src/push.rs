//! Local to remote bulk push.

use crate::baseline::{BaselineStore, SyncBaselineRecord};
use crate::error::SyncResult;
use crate::local::EntryRepository;
use crate::pull::PullIssue;
use crate::uploader::{EntryUploader, UploadOutcome, UploadRequest};
use tracediary_remote::FailureKind;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub conflicted: usize,
    pub failed: usize,
    pub skipped_items: Vec<PullIssue>,
    pub conflict_items: Vec<PullIssue>,
    pub failed_items: Vec<PullIssue>,
}

impl PushReport {
    fn skip(&mut self, entry_id: String, reason: &str) {
        self.skipped += 1;
        self.skipped_items.push(PullIssue {
            entry_id,
            reason: reason.to_string(),
        });
    }

    fn conflict(&mut self, entry_id: String) {
        self.conflicted += 1;
        self.conflict_items.push(PullIssue {
            entry_id,
            reason: "remote version changed, resolve before pushing".to_string(),
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

enum Pushed {
    Uploaded,
    Conflicted,
}

/// Uploads every local record, oldest modification first.
///
/// Each upload is made against the version in the entry's baseline, and the
/// baseline is rewritten after every success. Empty entries are skipped. A
/// lost CAS race is counted as a conflict and left for the user; nothing is
/// overwritten. Only a failure listing the local records is returned as an
/// error.
pub async fn push_local_entries(
    repo: &dyn EntryRepository,
    uploader: &dyn EntryUploader,
    baselines: &dyn BaselineStore,
) -> SyncResult<PushReport> {
    let mut records = repo.list().await?;
    records.sort_by_key(|record| record.modified_at);

    let mut report = PushReport {
        total: records.len(),
        ..PushReport::default()
    };

    for record in &records {
        let Some(entry) = record.to_sync_metadata() else {
            report.failure(record.id.clone(), "summary entry has no year");
            continue;
        };
        let entry_id = entry.entry_id();
        if entry.content().trim().is_empty() {
            report.skip(entry_id, "empty content");
            continue;
        }

        let expected_version = match baselines.get(&entry_id).await {
            Ok(baseline) => baseline
                .and_then(|b| b.remote_version)
                .filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!(entry = %entry_id, error = %e, "failed to load baseline");
                None
            }
        };
        let request = UploadRequest {
            entry,
            expected_version,
        };

        match push_one(uploader, baselines, &request).await {
            Ok(Pushed::Uploaded) => report.success += 1,
            Ok(Pushed::Conflicted) => report.conflict(entry_id),
            Err(e) if e.kind() == FailureKind::Conflict => report.conflict(entry_id),
            Err(e) => {
                warn!(entry = %entry_id, error = %e, "failed to push entry");
                report.failure(entry_id, e.to_string());
            }
        }
    }

    info!(
        total = report.total,
        success = report.success,
        skipped = report.skipped,
        conflicted = report.conflicted,
        failed = report.failed,
        "local push finished"
    );
    Ok(report)
}

async fn push_one(
    uploader: &dyn EntryUploader,
    baselines: &dyn BaselineStore,
    request: &UploadRequest,
) -> SyncResult<Pushed> {
    match uploader.upload(request).await? {
        UploadOutcome::Uploaded { version, synced_at } => {
            let record = SyncBaselineRecord::for_entry(&request.entry, synced_at, Some(version));
            if let Err(e) = baselines.put(&record).await {
                warn!(entry = %record.entry_id, error = %e, "failed to persist baseline after push");
            }
            Ok(Pushed::Uploaded)
        }
        UploadOutcome::Conflict { .. } => Ok(Pushed::Conflicted),
    }
}
