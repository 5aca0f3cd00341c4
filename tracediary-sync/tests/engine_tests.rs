use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracediary_crypto::{encrypt_with_aes_gcm, DataKey};
use tracediary_remote::{MemoryFiles, StoreError};
use tracediary_storage::MemoryStore;
use tracediary_sync::{
    fingerprint, pull_remote_entries, BaselineStore, ConflictChoice, Connectivity, DiaryUploader,
    EntryUploader, KvBaselineStore, KvEntryRepository, MetadataIndex, SaveError, SyncConfig,
    SyncEngine, SyncEntryMetadata, SyncResult, SyncState, SyncStatus, UploadOutcome,
    UploadRequest,
};

// ── Test doubles ────────────────────────────────────────────────────

enum Step {
    Upload,
    Conflict { remote: &'static str },
    Fail(StoreError),
}

#[derive(Default)]
struct ScriptedUploader {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<UploadRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedUploader {
    fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn contents(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.entry.content().to_string())
            .collect()
    }
}

#[async_trait]
impl EntryUploader for ScriptedUploader {
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadOutcome> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Upload);
        match step {
            Step::Upload => Ok(UploadOutcome::Uploaded {
                version: format!("v{n}"),
                synced_at: at(9),
            }),
            Step::Conflict { remote } => Ok(UploadOutcome::Conflict {
                local: request.entry.clone(),
                remote: Some(request.entry.with_content(remote, at(9))),
                remote_version: Some("remote-v".into()),
            }),
            Step::Fail(e) => Err(e.into()),
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
}

fn entry(content: &str) -> SyncEntryMetadata {
    SyncEntryMetadata::daily(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), content, at(8))
}

fn network_error() -> StoreError {
    StoreError::Network("connection reset".into())
}

struct Harness {
    uploader: Arc<ScriptedUploader>,
    baselines: Arc<KvBaselineStore>,
    net: Connectivity,
    engine: Arc<SyncEngine>,
}

fn harness(online: bool) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let uploader = Arc::new(ScriptedUploader::default());
    let baselines = Arc::new(KvBaselineStore::new(Arc::new(MemoryStore::new())));
    let net = Connectivity::new(online);
    let engine = Arc::new(SyncEngine::new(
        uploader.clone(),
        baselines.clone(),
        net.clone(),
        SyncConfig::default(),
    ));
    Harness {
        uploader,
        baselines,
        net,
        engine,
    }
}

async fn wait_until(engine: &SyncEngine, pred: impl Fn(&SyncState) -> bool) -> SyncState {
    let mut rx = engine.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|s| pred(s)))
        .await
        .expect("state never reached")
        .expect("engine dropped")
        .clone();
    state
}

fn spawn_save(engine: &Arc<SyncEngine>, content: &str) -> tokio::task::JoinHandle<Result<(), SaveError>> {
    let engine = engine.clone();
    let entry = entry(content);
    tokio::spawn(async move { engine.save_now(entry).await })
}

// ── Debounce ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn edits_within_window_upload_once_with_last_content() {
    let h = harness(true);
    let started = tokio::time::Instant::now();

    for content in ["h", "he", "hel", "hello"] {
        h.engine.on_input_change(entry(content)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert!(h.uploader.requests().is_empty());

    let state = wait_until(&h.engine, |s| s.status == SyncStatus::Success).await;
    assert!(started.elapsed() >= Duration::from_secs(45));
    assert_eq!(h.uploader.contents(), vec!["hello"]);
    assert!(!state.is_dirty);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.uploader.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reverting_to_synced_content_cancels_the_timer() {
    let h = harness(true);
    h.engine.save_now(entry("hello")).await.unwrap();

    h.engine.on_input_change(entry("hello!")).await;
    assert!(h.engine.state().is_dirty);
    h.engine.on_input_change(entry("hello  \n")).await;
    assert!(!h.engine.state().is_dirty);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.uploader.requests().len(), 1);
}

// ── Busy guard and staleness ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn manual_save_during_upload_is_busy_without_network() {
    let h = harness(true);
    h.uploader.set_delay(Duration::from_secs(10));

    let first = spawn_save(&h.engine, "a");
    wait_until(&h.engine, |s| s.status == SyncStatus::Syncing).await;

    assert_eq!(h.engine.save_now(entry("b")).await, Err(SaveError::Busy));
    assert_eq!(h.uploader.requests().len(), 1);

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(h.uploader.contents(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn debounced_save_during_upload_runs_after_it() {
    let h = harness(true);
    let engine = SyncEngine::new(
        h.uploader.clone(),
        h.baselines.clone(),
        h.net.clone(),
        SyncConfig {
            debounce_ms: 1_000,
            ..SyncConfig::default()
        },
    );
    let engine = Arc::new(engine);
    h.uploader.set_delay(Duration::from_secs(10));

    let first = spawn_save(&engine, "a");
    wait_until(&engine, |s| s.status == SyncStatus::Syncing).await;
    engine.on_input_change(entry("ab")).await;

    assert_eq!(first.await.unwrap(), Ok(()));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.uploader.contents(), vec!["a", "ab"]);
    let state = engine.state();
    assert_eq!(state.status, SyncStatus::Success);
    assert!(!state.is_dirty);
}

#[tokio::test(start_paused = true)]
async fn cancelled_upload_result_is_discarded() {
    let h = harness(true);
    h.uploader.set_delay(Duration::from_secs(10));

    let first = spawn_save(&h.engine, "a");
    wait_until(&h.engine, |s| s.status == SyncStatus::Syncing).await;

    assert!(h.engine.cancel_in_flight());
    assert!(!h.engine.cancel_in_flight());
    assert_eq!(h.engine.state().status, SyncStatus::Idle);

    assert_eq!(first.await.unwrap(), Err(SaveError::Stale));
    assert!(h.baselines.get("daily:2026-03-01").await.unwrap().is_none());
    assert_eq!(h.engine.state().status, SyncStatus::Idle);
    assert!(h.engine.state().last_synced_at.is_none());
}

// ── Offline queue ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn offline_save_retries_once_on_reconnect() {
    let h = harness(false);

    assert_eq!(h.engine.save_now(entry("draft")).await, Err(SaveError::Offline));
    assert!(h.uploader.requests().is_empty());
    let state = h.engine.state();
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.is_offline);
    assert!(state.has_pending_retry);

    h.engine.on_input_change(entry("draft 2")).await;
    h.net.set_online(true);
    let state = wait_until(&h.engine, |s| s.status == SyncStatus::Success).await;
    assert!(!state.has_pending_retry);
    assert!(!state.is_offline);

    h.net.set_online(false);
    h.net.set_online(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.uploader.contents(), vec!["draft 2"]);
}

#[tokio::test(start_paused = true)]
async fn failed_retry_keeps_the_flag_for_the_next_transition() {
    let h = harness(false);
    h.uploader.push(Step::Fail(network_error()));

    assert_eq!(h.engine.save_now(entry("draft")).await, Err(SaveError::Offline));
    h.net.set_online(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.engine.state().status, SyncStatus::Error);
    assert_eq!(h.uploader.requests().len(), 1);
    assert!(h.engine.state().has_pending_retry);

    h.net.set_online(false);
    h.net.set_online(true);
    wait_until(&h.engine, |s| s.status == SyncStatus::Success).await;
    assert_eq!(h.uploader.requests().len(), 2);
}

// ── Outcomes ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn conflict_is_surfaced_and_leaves_entry_dirty() {
    let h = harness(true);
    h.uploader.push(Step::Conflict { remote: "theirs" });

    assert_eq!(h.engine.save_now(entry("mine")).await, Err(SaveError::Conflict));

    let state = h.engine.state();
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.is_dirty);
    assert!(!state.has_pending_retry);
    let conflict = state.conflict.expect("conflict");
    assert_eq!(conflict.local.content(), "mine");
    assert_eq!(conflict.remote.unwrap().content(), "theirs");
    assert_eq!(conflict.remote_version.as_deref(), Some("remote-v"));
}

#[tokio::test(start_paused = true)]
async fn conflict_does_not_touch_pending_retry() {
    let h = harness(true);
    h.uploader.push(Step::Fail(network_error()));
    h.uploader.push(Step::Conflict { remote: "theirs" });

    assert_eq!(h.engine.save_now(entry("mine")).await, Err(SaveError::Network));
    assert!(h.engine.state().has_pending_retry);
    assert_eq!(h.engine.save_now(entry("mine")).await, Err(SaveError::Conflict));
    assert!(h.engine.state().has_pending_retry);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_clears_pending_retry() {
    let h = harness(true);
    h.uploader.push(Step::Fail(network_error()));
    h.uploader.push(Step::Fail(StoreError::Auth {
        status: 401,
        message: None,
    }));

    assert_eq!(h.engine.save_now(entry("x")).await, Err(SaveError::Network));
    assert!(h.engine.state().has_pending_retry);

    assert_eq!(h.engine.save_now(entry("x")).await, Err(SaveError::Auth));
    let state = h.engine.state();
    assert!(!state.has_pending_retry);
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.error_message.unwrap().contains("Authentication"));
}

#[tokio::test(start_paused = true)]
async fn unknown_failure_is_generic() {
    let h = harness(true);
    h.uploader.push(Step::Fail(StoreError::Api {
        status: 500,
        message: "boom".into(),
    }));

    assert_eq!(h.engine.save_now(entry("x")).await, Err(SaveError::Unknown));
    let state = h.engine.state();
    assert!(!state.has_pending_retry);
    assert!(state.is_dirty);
    assert_eq!(state.error_message.as_deref(), Some("Sync failed, please retry later."));
}

#[tokio::test(start_paused = true)]
async fn slow_upload_times_out_as_network_failure() {
    let h = harness(true);
    h.uploader.set_delay(Duration::from_secs(60));
    let started = tokio::time::Instant::now();

    assert_eq!(h.engine.save_now(entry("x")).await, Err(SaveError::Network));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(h.engine.state().has_pending_retry);
}

#[tokio::test(start_paused = true)]
async fn success_persists_baseline_with_version() {
    let h = harness(true);
    h.engine.save_now(entry("hello")).await.unwrap();

    let baseline = h.baselines.get("daily:2026-03-01").await.unwrap().unwrap();
    assert_eq!(baseline.fingerprint, fingerprint(&entry("hello")));
    assert_eq!(baseline.remote_version.as_deref(), Some("v1"));

    h.engine.save_now(entry("hello again")).await.unwrap();
    let requests = h.uploader.requests();
    assert_eq!(requests[0].expected_version, None);
    assert_eq!(requests[1].expected_version.as_deref(), Some("v1"));
}

// ── Conflict resolution ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn resolution_requires_a_conflict_and_a_usable_choice() {
    let h = harness(true);
    assert_eq!(
        h.engine.resolve_conflict(ConflictChoice::Local, None).await,
        Err(SaveError::NoConflict)
    );

    h.uploader.push(Step::Conflict { remote: "theirs" });
    let _ = h.engine.save_now(entry("mine")).await;

    let other_day = SyncEntryMetadata::daily(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), "m", at(9));
    assert_eq!(
        h.engine.resolve_conflict(ConflictChoice::Merged, Some(other_day)).await,
        Err(SaveError::ResolutionUnavailable)
    );
    assert!(h.engine.state().conflict.is_some());

    h.engine
        .resolve_conflict(ConflictChoice::Merged, Some(entry("mine + theirs")))
        .await
        .unwrap();
    let last = h.uploader.requests().pop().unwrap();
    assert_eq!(last.entry.content(), "mine + theirs");
    assert_eq!(last.expected_version.as_deref(), Some("remote-v"));
    assert!(h.engine.state().conflict.is_none());
}

#[tokio::test(start_paused = true)]
async fn dismissing_clears_the_conflict() {
    let h = harness(true);
    h.uploader.push(Step::Conflict { remote: "theirs" });
    let _ = h.engine.save_now(entry("mine")).await;

    h.engine.dismiss_conflict();
    let state = h.engine.state();
    assert!(state.conflict.is_none());
    assert_eq!(state.status, SyncStatus::Idle);
    assert!(state.is_dirty);
}

#[tokio::test(start_paused = true)]
async fn edit_conflict_resolve_against_a_real_repository() {
    let files = Arc::new(MemoryFiles::new());
    let key = DataKey::generate();
    let baselines = Arc::new(KvBaselineStore::new(Arc::new(MemoryStore::new())));
    let uploader = Arc::new(DiaryUploader::new(files.clone(), key.clone(), SyncConfig::default()));
    let engine = SyncEngine::new(
        uploader,
        baselines.clone(),
        Connectivity::new(true),
        SyncConfig::default(),
    );
    let started = tokio::time::Instant::now();

    engine.on_input_change(entry("hello")).await;
    wait_until(&engine, |s| s.status == SyncStatus::Success).await;
    assert!(started.elapsed() >= Duration::from_secs(30));
    let baseline = baselines.get("daily:2026-03-01").await.unwrap().unwrap();
    assert_eq!(baseline.fingerprint, fingerprint(&entry("hello")));

    engine.on_input_change(entry("hello world")).await;
    let sealed = encrypt_with_aes_gcm("hello from the laptop", &key).unwrap();
    files.put_remote("2026-03-01.md.enc", &sealed).await;

    assert_eq!(engine.save_now(entry("hello world")).await, Err(SaveError::Conflict));
    let conflict = engine.state().conflict.expect("conflict");
    assert_eq!(conflict.remote.unwrap().content(), "hello from the laptop");
    assert!(engine.state().is_dirty);

    engine.resolve_conflict(ConflictChoice::Local, None).await.unwrap();
    let state = engine.state();
    assert_eq!(state.status, SyncStatus::Success);
    assert!(!state.is_dirty);
    let baseline = baselines.get("daily:2026-03-01").await.unwrap().unwrap();
    assert_eq!(baseline.fingerprint, fingerprint(&entry("hello world")));
    assert!(files.paths().await.contains(&"metadata.json.enc".to_string()));
}

#[tokio::test(start_paused = true)]
async fn offline_resolution_is_retried_against_the_conflicting_version() {
    let h = harness(true);
    h.engine.save_now(entry("hello")).await.unwrap();
    h.uploader.push(Step::Conflict { remote: "theirs" });
    assert_eq!(h.engine.save_now(entry("hello world")).await, Err(SaveError::Conflict));

    h.net.set_online(false);
    assert_eq!(
        h.engine.resolve_conflict(ConflictChoice::Local, None).await,
        Err(SaveError::Offline)
    );
    assert!(h.engine.state().has_pending_retry);

    h.net.set_online(true);
    let state = wait_until(&h.engine, |s| s.status == SyncStatus::Success).await;
    assert!(state.conflict.is_none());
    assert!(!state.has_pending_retry);
    let last = h.uploader.requests().pop().unwrap();
    assert_eq!(last.entry.content(), "hello world");
    assert_eq!(last.expected_version.as_deref(), Some("remote-v"));

    // Later saves go back to the baseline written by the resolution.
    h.engine.save_now(entry("hello again")).await.unwrap();
    let requests = h.uploader.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[3].expected_version.as_deref(), Some("v3"));
}

#[tokio::test(start_paused = true)]
async fn offline_resolution_succeeds_against_a_real_repository() {
    let files = Arc::new(MemoryFiles::new());
    let key = DataKey::generate();
    let baselines = Arc::new(KvBaselineStore::new(Arc::new(MemoryStore::new())));
    let uploader = Arc::new(DiaryUploader::new(files.clone(), key.clone(), SyncConfig::default()));
    let net = Connectivity::new(true);
    let engine = SyncEngine::new(uploader, baselines.clone(), net.clone(), SyncConfig::default());

    engine.save_now(entry("hello")).await.unwrap();
    let sealed = encrypt_with_aes_gcm("hello from the laptop", &key).unwrap();
    files.put_remote("2026-03-01.md.enc", &sealed).await;
    assert_eq!(engine.save_now(entry("hello world")).await, Err(SaveError::Conflict));

    net.set_online(false);
    assert_eq!(
        engine.resolve_conflict(ConflictChoice::Local, None).await,
        Err(SaveError::Offline)
    );
    net.set_online(true);

    let state = wait_until(&engine, |s| s.status == SyncStatus::Success).await;
    assert!(state.conflict.is_none());
    assert!(!state.is_dirty);
    let baseline = baselines.get("daily:2026-03-01").await.unwrap().unwrap();
    assert_eq!(baseline.fingerprint, fingerprint(&entry("hello world")));
}

#[tokio::test(start_paused = true)]
async fn baselines_written_by_a_pull_are_seen_by_the_engine() {
    let files = Arc::new(MemoryFiles::new());
    let key = DataKey::generate();
    let store = Arc::new(MemoryStore::new());
    let baselines = Arc::new(KvBaselineStore::new(store.clone()));
    let repo = KvEntryRepository::new(store);
    let uploader = Arc::new(DiaryUploader::new(files.clone(), key.clone(), SyncConfig::default()));
    let engine = SyncEngine::new(
        uploader,
        baselines.clone(),
        Connectivity::new(true),
        SyncConfig::default(),
    );

    engine.on_input_change(entry("hello")).await;
    assert!(engine.state().is_dirty);

    // Another device already published the same entry.
    let remote = entry("hello");
    let sealed = encrypt_with_aes_gcm(remote.content(), &key).unwrap();
    files.put_remote(&remote.remote_path(), &sealed).await;
    let mut index = MetadataIndex::empty(at(0));
    index.upsert(&remote, at(9));
    let sealed = encrypt_with_aes_gcm(&serde_json::to_string(&index).unwrap(), &key).unwrap();
    files.put_remote("metadata.json.enc", &sealed).await;

    let report = pull_remote_entries(
        files.as_ref(),
        &key,
        &repo,
        baselines.as_ref(),
        &SyncConfig::default(),
        at(10),
    )
    .await
    .unwrap();
    assert_eq!(report.inserted, 1);

    engine.on_input_change(entry("hello")).await;
    assert!(!engine.state().is_dirty);

    engine.save_now(entry("hello world")).await.unwrap();
    assert_eq!(engine.state().status, SyncStatus::Success);
}
