//! Per-entry sync engine.
//!
//! Coordinates:
//! - Debounced uploads armed by edits
//! - Manual saves, rejected as busy while an upload is in flight
//! - Deferral while offline and a single resubmission on reconnect
//! - Conflict surfacing and resolution
//!
//! All mutable bookkeeping sits behind one lock ([`RunState`]); observers read
//! [`SyncState`] snapshots from a watch channel. Every attempt is tagged with a
//! task id and results from superseded attempts are dropped.

use crate::baseline::{is_dirty, BaselineStore, SyncBaselineRecord};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::entry::SyncEntryMetadata;
use crate::error::{SaveError, SyncError, SyncResult};
use crate::uploader::{EntryUploader, UploadOutcome, UploadRequest};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracediary_remote::FailureKind;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// An unresolved CAS conflict. `remote` is absent when the remote copy could
/// not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictState {
    pub local: SyncEntryMetadata,
    pub remote: Option<SyncEntryMetadata>,
    pub remote_version: Option<String>,
}

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// User-safe text for the last failure.
    pub error_message: Option<String>,
    pub is_offline: bool,
    pub has_pending_retry: bool,
    pub is_dirty: bool,
    pub conflict: Option<ConflictState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Local,
    Remote,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Debounced,
    Retry,
}

impl Trigger {
    fn label(self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Debounced => "debounced",
            Trigger::Retry => "retry",
        }
    }
}

/// Where the CAS expectation comes from.
enum Expect {
    Baseline,
    Version(Option<String>),
}

#[derive(Default)]
struct RunState {
    task_id: u64,
    in_flight: bool,
    /// Debounced payload that arrived mid-upload; latest wins.
    queued: Option<SyncEntryMetadata>,
    pending_retry: bool,
    latest: Option<SyncEntryMetadata>,
    /// Remote version a conflict resolution was made against, keyed by entry
    /// id. Overrides the baseline version until an upload lands or a new
    /// conflict replaces it.
    resolved: Option<(String, Option<String>)>,
    /// Last baseline read per entry; used only when the store read fails.
    baselines: HashMap<String, Option<SyncBaselineRecord>>,
    debounce_gen: u64,
    debounce: Option<JoinHandle<()>>,
}

impl RunState {
    fn cancel_debounce(&mut self) {
        self.debounce_gen += 1;
        if let Some(timer) = self.debounce.take() {
            timer.abort();
        }
    }

    fn resolved_version(&self, entry_id: &str) -> Option<Option<String>> {
        self.resolved
            .as_ref()
            .filter(|(id, _)| id == entry_id)
            .map(|(_, version)| version.clone())
    }

    /// The snapshot dirty state should be judged on.
    fn current<'a>(&'a self, fallback: &'a SyncEntryMetadata) -> &'a SyncEntryMetadata {
        self.latest
            .as_ref()
            .filter(|latest| latest.entry_id() == fallback.entry_id())
            .unwrap_or(fallback)
    }
}

struct Inner {
    uploader: Arc<dyn EntryUploader>,
    baselines: Arc<dyn BaselineStore>,
    connectivity: Connectivity,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    run: Mutex<RunState>,
}

/// Sync engine for one editor session.
///
/// Must be created inside a Tokio runtime; it spawns a connectivity watcher
/// that lives until the engine is dropped.
pub struct SyncEngine {
    inner: Arc<Inner>,
    watcher: JoinHandle<()>,
}

impl SyncEngine {
    pub fn new(
        uploader: Arc<dyn EntryUploader>,
        baselines: Arc<dyn BaselineStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(SyncState {
            is_offline: !connectivity.is_online(),
            ..SyncState::default()
        });
        let rx = connectivity.subscribe();
        let inner = Arc::new(Inner {
            uploader,
            baselines,
            connectivity,
            config,
            state,
            run: Mutex::new(RunState::default()),
        });
        let watcher = tokio::spawn(watch_connectivity(Arc::downgrade(&inner), rx));
        Self { inner, watcher }
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Records the latest snapshot, recomputes dirty and re-arms the debounce
    /// timer. No network I/O happens here.
    pub async fn on_input_change(&self, entry: SyncEntryMetadata) {
        let baseline = self.inner.baseline_for(&entry).await;
        let dirty = is_dirty(&entry, baseline.as_ref());
        {
            let mut run = self.inner.lock_run();
            run.latest = Some(entry);
            if dirty {
                self.inner.arm_debounce(&mut run);
            } else {
                run.cancel_debounce();
            }
        }
        self.inner.state.send_modify(|s| s.is_dirty = dirty);
    }

    /// Uploads `entry` now, cancelling any pending debounce.
    pub async fn save_now(&self, entry: SyncEntryMetadata) -> Result<(), SaveError> {
        {
            let mut run = self.inner.lock_run();
            if run.in_flight {
                debug!(entry = %entry.entry_id(), "manual save rejected, upload in flight");
                return Err(SaveError::Busy);
            }
            run.cancel_debounce();
            run.latest = Some(entry.clone());
        }
        self.inner
            .run_upload(entry, Trigger::Manual, Expect::Baseline)
            .await
    }

    /// Resubmits the chosen side of the current conflict against the remote
    /// version observed when the conflict was detected.
    pub async fn resolve_conflict(
        &self,
        choice: ConflictChoice,
        merged: Option<SyncEntryMetadata>,
    ) -> Result<(), SaveError> {
        let conflict = self.inner.state.borrow().conflict.clone();
        let Some(conflict) = conflict else {
            return Err(SaveError::NoConflict);
        };
        let payload = match choice {
            ConflictChoice::Local => conflict.local.clone(),
            ConflictChoice::Remote => conflict
                .remote
                .clone()
                .ok_or(SaveError::ResolutionUnavailable)?,
            ConflictChoice::Merged => merged
                .filter(|m| m.entry_id() == conflict.local.entry_id())
                .ok_or(SaveError::ResolutionUnavailable)?,
        };
        info!(entry = %payload.entry_id(), ?choice, "resolving sync conflict");

        self.inner.state.send_modify(|s| {
            s.conflict = None;
            s.error_message = None;
        });
        {
            let mut run = self.inner.lock_run();
            run.cancel_debounce();
            run.latest = Some(payload.clone());
        }
        self.inner
            .run_upload(
                payload,
                Trigger::Manual,
                Expect::Version(conflict.remote_version),
            )
            .await
    }

    pub fn dismiss_conflict(&self) {
        self.inner.state.send_if_modified(|s| {
            if s.conflict.is_none() {
                return false;
            }
            s.conflict = None;
            s.error_message = None;
            if s.status == SyncStatus::Error {
                s.status = SyncStatus::Idle;
            }
            true
        });
    }

    /// Abandons the in-flight attempt. The remote call is left to finish; its
    /// result is ignored. Returns whether anything was in flight.
    pub fn cancel_in_flight(&self) -> bool {
        {
            let mut run = self.inner.lock_run();
            if !run.in_flight {
                return false;
            }
            run.task_id += 1;
            run.in_flight = false;
            run.queued = None;
        }
        info!("in-flight upload abandoned");
        self.inner.state.send_modify(|s| {
            if s.status == SyncStatus::Syncing {
                s.status = SyncStatus::Idle;
            }
        });
        true
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.watcher.abort();
        self.inner.lock_run().cancel_debounce();
    }
}

impl Inner {
    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads the stored baseline on every call so records written by pulls
    /// are picked up. Falls back to the last one seen if the store fails.
    async fn baseline_for(&self, entry: &SyncEntryMetadata) -> Option<SyncBaselineRecord> {
        let id = entry.entry_id();
        match self.baselines.get(&id).await {
            Ok(record) => {
                self.lock_run().baselines.insert(id, record.clone());
                record
            }
            Err(e) => {
                warn!(entry = %id, error = %e, "failed to load sync baseline");
                self.lock_run().baselines.get(&id).cloned().flatten()
            }
        }
    }

    fn arm_debounce(self: &Arc<Self>, run: &mut RunState) {
        run.cancel_debounce();
        let generation = run.debounce_gen;
        let delay = self.config.debounce();
        let inner = Arc::clone(self);
        run.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let entry = {
                let mut run = inner.lock_run();
                if run.debounce_gen != generation {
                    return;
                }
                // Detach so a later edit cannot abort the upload itself.
                run.debounce = None;
                run.latest.clone()
            };
            let Some(entry) = entry else {
                return;
            };
            let baseline = inner.baseline_for(&entry).await;
            if is_dirty(&entry, baseline.as_ref()) {
                inner.finish_background(entry, Trigger::Debounced).await;
            }
        }));
    }

    fn spawn_upload(self: &Arc<Self>, entry: SyncEntryMetadata, trigger: Trigger) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.finish_background(entry, trigger).await;
        });
    }

    async fn finish_background(self: &Arc<Self>, entry: SyncEntryMetadata, trigger: Trigger) {
        if let Err(e) = self.run_upload(entry, trigger, Expect::Baseline).await {
            debug!(code = e.code(), trigger = trigger.label(), "background upload did not complete");
        }
    }

    async fn retry_pending(self: &Arc<Self>) {
        let entry = {
            let run = self.lock_run();
            if !run.pending_retry {
                return;
            }
            run.latest.clone()
        };
        let Some(entry) = entry else {
            return;
        };
        info!(entry = %entry.entry_id(), "back online, retrying pending upload");
        self.finish_background(entry, Trigger::Retry).await;
    }

    async fn run_upload(
        self: &Arc<Self>,
        entry: SyncEntryMetadata,
        trigger: Trigger,
        expect: Expect,
    ) -> Result<(), SaveError> {
        let entry_id = entry.entry_id();
        if let Expect::Version(version) = &expect {
            self.lock_run().resolved = Some((entry_id.clone(), version.clone()));
        }

        if !self.connectivity.is_online() {
            {
                let mut run = self.lock_run();
                run.pending_retry = true;
                run.latest = Some(entry);
            }
            warn!(entry = %entry_id, "offline, upload deferred");
            self.state.send_modify(|s| {
                s.status = SyncStatus::Error;
                s.is_offline = true;
                s.has_pending_retry = true;
                s.error_message = Some(SaveError::Offline.to_string());
            });
            return Err(SaveError::Offline);
        }

        let task_id = {
            let mut run = self.lock_run();
            if run.in_flight {
                return match trigger {
                    Trigger::Debounced => {
                        debug!(entry = %entry_id, "upload in flight, queueing debounced save");
                        run.queued = Some(entry);
                        Err(SaveError::Queued)
                    }
                    Trigger::Manual | Trigger::Retry => Err(SaveError::Busy),
                };
            }
            run.task_id += 1;
            run.in_flight = true;
            run.task_id
        };
        self.state.send_modify(|s| {
            s.status = SyncStatus::Syncing;
            s.error_message = None;
            s.is_offline = false;
        });

        let resolved = self.lock_run().resolved_version(&entry_id);
        let expected_version = match (expect, resolved) {
            (Expect::Version(version), _) => version,
            (Expect::Baseline, Some(version)) => version,
            (Expect::Baseline, None) => self
                .baseline_for(&entry)
                .await
                .and_then(|b| b.remote_version),
        };
        let request = UploadRequest {
            entry,
            expected_version,
        };
        debug!(entry = %entry_id, task_id, trigger = trigger.label(), "uploading entry");

        let result = match tokio::time::timeout(
            self.config.upload_timeout(),
            self.uploader.upload(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };

        if self.lock_run().task_id != task_id {
            debug!(entry = %entry_id, task_id, "discarding superseded upload result");
            return Err(SaveError::Stale);
        }
        let outcome = self.apply(request.entry, result).await;

        let queued = {
            let mut run = self.lock_run();
            if run.task_id != task_id {
                return outcome;
            }
            run.in_flight = false;
            run.queued.take()
        };
        if let Some(next) = queued {
            self.spawn_upload(next, Trigger::Debounced);
        }
        outcome
    }

    async fn apply(
        &self,
        entry: SyncEntryMetadata,
        result: SyncResult<UploadOutcome>,
    ) -> Result<(), SaveError> {
        match result {
            Ok(UploadOutcome::Uploaded { version, synced_at }) => {
                let record = SyncBaselineRecord::for_entry(&entry, synced_at, Some(version));
                if let Err(e) = self.baselines.put(&record).await {
                    warn!(entry = %record.entry_id, error = %e, "failed to persist sync baseline");
                }
                let dirty = {
                    let mut run = self.lock_run();
                    run.pending_retry = false;
                    if run.resolved_version(&record.entry_id).is_some() {
                        run.resolved = None;
                    }
                    run.baselines
                        .insert(record.entry_id.clone(), Some(record.clone()));
                    is_dirty(run.current(&entry), Some(&record))
                };
                info!(entry = %record.entry_id, "entry synced");
                self.state.send_modify(|s| {
                    s.status = SyncStatus::Success;
                    s.last_synced_at = Some(synced_at);
                    s.error_message = None;
                    s.is_offline = false;
                    s.has_pending_retry = false;
                    s.is_dirty = dirty;
                    s.conflict = None;
                });
                Ok(())
            }
            Ok(UploadOutcome::Conflict {
                local,
                remote,
                remote_version,
            }) => {
                self.surface_conflict(ConflictState {
                    local,
                    remote,
                    remote_version,
                });
                Err(SaveError::Conflict)
            }
            Err(e) => self.fail(&entry, e).await,
        }
    }

    fn surface_conflict(&self, conflict: ConflictState) {
        warn!(
            entry = %conflict.local.entry_id(),
            remote_readable = conflict.remote.is_some(),
            "sync conflict"
        );
        self.lock_run().resolved = None;
        self.state.send_modify(|s| {
            s.status = SyncStatus::Error;
            s.error_message = Some(SaveError::Conflict.to_string());
            s.is_dirty = true;
            s.conflict = Some(conflict);
        });
    }

    async fn fail(&self, entry: &SyncEntryMetadata, error: SyncError) -> Result<(), SaveError> {
        let code = match error.kind() {
            FailureKind::Network => SaveError::Network,
            FailureKind::Auth => SaveError::Auth,
            FailureKind::Conflict => SaveError::Conflict,
            FailureKind::Validation | FailureKind::Api => SaveError::Unknown,
        };
        warn!(entry = %entry.entry_id(), error = %error, code = code.code(), "upload failed");

        if code == SaveError::Conflict {
            self.surface_conflict(ConflictState {
                local: entry.clone(),
                remote: None,
                remote_version: None,
            });
            return Err(code);
        }

        let pending = code == SaveError::Network;
        let baseline = self.baseline_for(entry).await;
        let dirty = {
            let mut run = self.lock_run();
            run.pending_retry = pending;
            is_dirty(run.current(entry), baseline.as_ref())
        };
        self.state.send_modify(|s| {
            s.status = SyncStatus::Error;
            s.error_message = Some(code.to_string());
            s.has_pending_retry = pending;
            s.is_dirty = dirty;
        });
        Err(code)
    }
}

async fn watch_connectivity(inner: Weak<Inner>, mut rx: watch::Receiver<bool>) {
    let mut was_online = *rx.borrow_and_update();
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.state.send_modify(|s| s.is_offline = !online);
        if online && !was_online {
            inner.retry_pending().await;
        }
        was_online = online;
    }
}
