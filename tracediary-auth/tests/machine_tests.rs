use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracediary_auth::persistence::{CONFIG_KEY, LOCK_STATE_KEY, PASSWORD_EXPIRY_KEY};
use tracediary_auth::secret_cache::{SESSION_CACHE_KEY, SESSION_SECRET_KEY};
use tracediary_auth::{
    AppConfig, AuthDeps, AuthError, AuthMachine, AuthPhase, AuthResult, AuthSettings, AuthStage,
    Clock, CloudConfigMirror, ConnectionSettings, LocalSecretCache, ManualClock, SetupRequest,
    TokenRefreshReason,
};
use tracediary_crypto::{decrypt_with_aes_gcm, CalibrationOptions};
use tracediary_remote::{RepoRef, StoreError, StoreResult};
use tracediary_storage::{KeyValueStore, MemoryStore};

const PASSWORD: &str = "diary2024pw";
const TOKEN: &str = "tok-initial-123";

// ── Test doubles ────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedValidator {
    outcomes: Mutex<VecDeque<StoreResult<()>>>,
    calls: AtomicUsize,
    last: Mutex<Option<(RepoRef, String)>>,
}

impl ScriptedValidator {
    fn push(&self, outcome: StoreResult<()>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last(&self) -> Option<(RepoRef, String)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl tracediary_auth::RepoAccessValidator for ScriptedValidator {
    async fn validate(&self, repo: &RepoRef, token: &str) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((repo.clone(), token.to_string()));
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
struct RecordingMirror {
    stored: Mutex<Option<AppConfig>>,
    saves: AtomicUsize,
}

#[async_trait]
impl CloudConfigMirror for RecordingMirror {
    async fn load(&self) -> AuthResult<Option<AppConfig>> {
        Ok(self.stored.lock().unwrap().clone())
    }

    async fn save(&self, config: &AppConfig) -> AuthResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().unwrap() = Some(config.clone());
        Ok(())
    }
}

struct Harness {
    kv: Arc<MemoryStore>,
    validator: Arc<ScriptedValidator>,
    mirror: Arc<RecordingMirror>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self {
            kv: Arc::new(MemoryStore::new()),
            validator: Arc::new(ScriptedValidator::default()),
            mirror: Arc::new(RecordingMirror::default()),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            )),
        }
    }

    /// A fresh machine over the same persisted state, as after a restart.
    fn machine(&self) -> AuthMachine {
        AuthMachine::new(
            fast_settings(),
            AuthDeps {
                store: self.kv.clone(),
                secrets: Arc::new(LocalSecretCache::new(self.kv.clone())),
                validator: self.validator.clone(),
                mirror: self.mirror.clone(),
                clock: self.clock.clone(),
            },
        )
    }

    async fn raw(&self, key: &str) -> Option<String> {
        self.kv.get(key).await.unwrap()
    }

    /// Boots a machine and completes setup.
    async fn ready_machine(&self) -> AuthMachine {
        let machine = self.machine();
        assert_eq!(machine.boot().await, AuthStage::NeedsSetup);
        machine.initialize(setup()).await.unwrap();
        assert_eq!(machine.state().stage(), AuthStage::Ready);
        machine
    }
}

fn fast_settings() -> AuthSettings {
    AuthSettings {
        calibration: CalibrationOptions {
            min_iterations: 1_000,
            max_iterations: 2_000,
            initial_iterations: 1_000,
            max_attempts: 2,
            ..CalibrationOptions::default()
        },
        ..AuthSettings::default()
    }
}

fn setup() -> SetupRequest {
    SetupRequest {
        repo_input: "https://gitee.com/alice/diary.git".into(),
        token: format!("  {TOKEN}  "),
        master_password: PASSWORD.into(),
        branch: None,
    }
}

// ── Boot and setup ──────────────────────────────────────────────────

#[tokio::test]
async fn fresh_install_needs_setup() {
    let h = Harness::new();
    let machine = h.machine();
    assert_eq!(machine.state().stage(), AuthStage::Checking);

    assert_eq!(machine.boot().await, AuthStage::NeedsSetup);
    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("locked"));
    assert!(machine.state().is_locked());
}

#[tokio::test]
async fn initialize_persists_sealed_config_and_unlocks() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    let state = machine.state();

    assert_eq!(state.token(), Some(TOKEN));
    let config = state.config().unwrap().clone();
    assert_eq!(config.gitee_repo, "https://gitee.com/alice/diary");
    assert_eq!(config.gitee_owner, "alice");
    assert_eq!(config.gitee_repo_name, "diary");
    assert_eq!(config.gitee_branch.as_deref(), Some("master"));
    assert_eq!(config.password_expiry, h.clock.now() + Duration::days(7));

    let (repo, token) = h.validator.last().unwrap();
    assert_eq!(repo.path(), "alice/diary");
    assert_eq!(token, TOKEN);

    let stored = h.raw(CONFIG_KEY).await.unwrap();
    assert!(!stored.contains(TOKEN));
    assert!(!stored.contains(PASSWORD));
    let sealed = config.encrypted_token.as_deref().unwrap();
    assert_eq!(
        decrypt_with_aes_gcm(sealed, state.data_key().unwrap()).unwrap(),
        TOKEN
    );

    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("unlocked"));
    assert!(h.raw(PASSWORD_EXPIRY_KEY).await.is_some());
    assert_eq!(h.mirror.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn initialize_rejects_bad_input_before_touching_remote() {
    let h = Harness::new();
    let machine = h.machine();
    machine.boot().await;

    let mut bad_repo = setup();
    bad_repo.repo_input = "https://github.com/alice/diary".into();
    assert!(matches!(
        machine.initialize(bad_repo).await,
        Err(AuthError::Remote(StoreError::InvalidRepo(_)))
    ));

    let mut weak = setup();
    weak.master_password = "short1".into();
    assert!(matches!(
        machine.initialize(weak).await,
        Err(AuthError::Validation(_))
    ));

    let mut no_token = setup();
    no_token.token = "   ".into();
    assert!(matches!(
        machine.initialize(no_token).await,
        Err(AuthError::Validation(_))
    ));

    assert_eq!(h.validator.calls(), 0);
    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::NeedsSetup);
    assert_eq!(state.error_message.as_deref(), Some("Please enter an access token."));
    assert!(h.raw(CONFIG_KEY).await.is_none());
}

#[tokio::test]
async fn initialize_with_rejected_token_persists_nothing() {
    let h = Harness::new();
    let machine = h.machine();
    machine.boot().await;
    h.validator.push(Err(StoreError::Auth {
        status: 401,
        message: None,
    }));

    let err = machine.initialize(setup()).await.unwrap_err();
    assert!(matches!(err, AuthError::Remote(StoreError::Auth { .. })));

    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::NeedsSetup);
    assert!(state.error_message.unwrap().contains("Token is invalid"));
    assert!(h.raw(CONFIG_KEY).await.is_none());
    assert_eq!(h.mirror.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn initialize_only_from_setup() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    assert!(matches!(
        machine.initialize(setup()).await,
        Err(AuthError::InvalidPhase("ready"))
    ));
    assert_eq!(machine.state().stage(), AuthStage::Ready);
}

// ── Restart behaviour ───────────────────────────────────────────────

#[tokio::test]
async fn restart_within_window_restores_silently() {
    let h = Harness::new();
    h.ready_machine().await;
    h.clock.advance(Duration::days(3));

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::Ready);
    assert_eq!(restarted.state().token(), Some(TOKEN));
    // Once at setup, once at boot.
    assert_eq!(h.validator.calls(), 2);
}

#[tokio::test]
async fn restart_after_expiry_needs_unlock() {
    let h = Harness::new();
    h.ready_machine().await;
    h.clock.advance(Duration::days(7));

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsUnlock);
    assert!(restarted.state().password_expired());
    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("locked"));
}

#[tokio::test]
async fn unreadable_session_cache_fails_closed() {
    let h = Harness::new();
    h.ready_machine().await;
    h.kv.put(SESSION_CACHE_KEY, "not-a-sealed-record".into())
        .await
        .unwrap();

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsUnlock);
    assert!(!restarted.state().password_expired());
}

#[tokio::test]
async fn unreadable_config_boots_into_setup() {
    let h = Harness::new();
    h.ready_machine().await;
    *h.mirror.stored.lock().unwrap() = None;
    h.kv.put(CONFIG_KEY, "{not json".into()).await.unwrap();

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsSetup);
    assert!(restarted.state().token().is_none());
    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("locked"));
}

#[tokio::test]
async fn unreadable_config_is_recovered_from_the_mirror() {
    let h = Harness::new();
    h.ready_machine().await;
    h.kv.put(CONFIG_KEY, "{not json".into()).await.unwrap();

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::Ready);
    assert_eq!(restarted.state().token(), Some(TOKEN));
    let stored: AppConfig = serde_json::from_str(&h.raw(CONFIG_KEY).await.unwrap()).unwrap();
    assert_eq!(Some(stored), h.mirror.stored.lock().unwrap().clone());
}

#[tokio::test]
async fn restart_with_invalid_token_needs_refresh() {
    let h = Harness::new();
    h.ready_machine().await;
    h.validator.push(Err(StoreError::Auth {
        status: 401,
        message: None,
    }));

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsTokenRefresh);
    let state = restarted.state();
    assert_eq!(
        state.token_refresh_reason(),
        Some(TokenRefreshReason::TokenInvalid)
    );
    match state.phase {
        AuthPhase::NeedsTokenRefresh {
            needs_master_password,
            ..
        } => assert!(needs_master_password),
        other => panic!("unexpected phase {other:?}"),
    }
}

#[tokio::test]
async fn cloud_mirror_restores_config_on_new_device() {
    let h = Harness::new();
    h.ready_machine().await;

    let device = Harness {
        kv: Arc::new(MemoryStore::new()),
        validator: h.validator.clone(),
        mirror: h.mirror.clone(),
        clock: h.clock.clone(),
    };
    let machine = device.machine();
    assert_eq!(machine.boot().await, AuthStage::NeedsUnlock);
    assert!(device.raw(CONFIG_KEY).await.is_some());

    machine.unlock(PASSWORD).await.unwrap();
    assert_eq!(machine.state().token(), Some(TOKEN));
}

// ── Unlock ──────────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_keeps_unlock_phase() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    machine.lock_now().await.unwrap();

    let err = machine.unlock("wrongpass99").await.unwrap_err();
    assert!(matches!(err, AuthError::WrongPassword));
    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::NeedsUnlock);
    assert_eq!(state.error_message.as_deref(), Some("Incorrect master password."));

    machine.clear_error();
    assert_eq!(machine.state().error_message, None);
}

#[tokio::test]
async fn unlock_restores_session_and_extends_window() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    machine.lock_now().await.unwrap();
    h.clock.advance(Duration::days(10));

    machine.unlock(PASSWORD).await.unwrap();
    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::Ready);
    assert_eq!(state.token(), Some(TOKEN));
    assert_eq!(
        state.config().unwrap().password_expiry,
        h.clock.now() + Duration::days(7)
    );
    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("unlocked"));
}

#[tokio::test]
async fn unlock_with_unreachable_remote_needs_refresh() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    machine.lock_now().await.unwrap();
    h.validator.push(Err(StoreError::Network("connection refused".into())));

    machine.unlock(PASSWORD).await.unwrap();
    let state = machine.state();
    assert_eq!(
        state.token_refresh_reason(),
        Some(TokenRefreshReason::RemoteUnreachable)
    );
    assert!(state.error_message.is_some());
}

#[tokio::test]
async fn unlock_without_stored_token_needs_refresh() {
    let h = Harness::new();
    h.ready_machine().await;
    let mut config: AppConfig =
        serde_json::from_str(&h.raw(CONFIG_KEY).await.unwrap()).unwrap();
    config.encrypted_token = None;
    h.kv.put(CONFIG_KEY, serde_json::to_string(&config).unwrap())
        .await
        .unwrap();
    h.kv.put(LOCK_STATE_KEY, "locked".into()).await.unwrap();

    let machine = h.machine();
    assert_eq!(machine.boot().await, AuthStage::NeedsUnlock);
    machine.unlock(PASSWORD).await.unwrap();
    assert_eq!(
        machine.state().token_refresh_reason(),
        Some(TokenRefreshReason::MissingToken)
    );
}

// ── Token refresh ───────────────────────────────────────────────────

#[tokio::test]
async fn update_token_reuses_remembered_password() {
    let h = Harness::new();
    let machine = h.ready_machine().await;

    machine.update_token("tok-rotated-456", None).await.unwrap();
    let state = machine.state();
    assert_eq!(state.token(), Some("tok-rotated-456"));
    let sealed = state.config().unwrap().encrypted_token.clone().unwrap();
    assert_eq!(
        decrypt_with_aes_gcm(&sealed, state.data_key().unwrap()).unwrap(),
        "tok-rotated-456"
    );
    assert_eq!(h.mirror.saves.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn update_token_after_restart_requires_password() {
    let h = Harness::new();
    h.ready_machine().await;
    h.validator.push(Err(StoreError::Auth {
        status: 403,
        message: None,
    }));
    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsTokenRefresh);

    assert!(matches!(
        restarted.update_token("tok-new", None).await,
        Err(AuthError::PasswordRequired)
    ));
    assert!(matches!(
        restarted.update_token("tok-new", Some("wrongpass99")).await,
        Err(AuthError::WrongPassword)
    ));
    assert_eq!(restarted.state().stage(), AuthStage::NeedsTokenRefresh);

    restarted
        .update_token("tok-new", Some(PASSWORD))
        .await
        .unwrap();
    assert_eq!(restarted.state().token(), Some("tok-new"));
}

// ── Lock ────────────────────────────────────────────────────────────

#[tokio::test]
async fn lock_now_discards_secrets() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    assert!(h.raw(SESSION_CACHE_KEY).await.is_some());

    machine.lock_now().await.unwrap();
    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::NeedsUnlock);
    assert!(state.password_expired());
    assert!(state.token().is_none());
    assert!(state.data_key().is_none());

    assert_eq!(h.raw(LOCK_STATE_KEY).await.as_deref(), Some("locked"));
    assert!(h.raw(PASSWORD_EXPIRY_KEY).await.is_none());
    assert!(h.raw(SESSION_CACHE_KEY).await.is_none());
    assert!(h.raw(SESSION_SECRET_KEY).await.is_none());

    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::NeedsUnlock);
}

#[tokio::test]
async fn lock_without_config_needs_setup() {
    let h = Harness::new();
    let machine = h.machine();
    machine.boot().await;
    machine.lock_now().await.unwrap();
    assert_eq!(machine.state().stage(), AuthStage::NeedsSetup);
}

// ── Connection settings ─────────────────────────────────────────────

#[tokio::test]
async fn connection_settings_require_ready() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    machine.lock_now().await.unwrap();

    let result = machine
        .update_connection_settings(ConnectionSettings {
            repo_input: "alice/notes".into(),
            ..ConnectionSettings::default()
        })
        .await;
    assert!(matches!(result, Err(AuthError::InvalidPhase("needs-unlock"))));
}

#[tokio::test]
async fn failed_connection_update_stays_ready() {
    let h = Harness::new();
    let machine = h.ready_machine().await;
    let before = machine.state().config().unwrap().clone();
    h.validator.push(Err(StoreError::NotFound));

    let result = machine
        .update_connection_settings(ConnectionSettings {
            repo_input: "alice/missing".into(),
            branch: Some("main".into()),
            token: None,
        })
        .await;
    assert!(result.is_err());

    let state = machine.state();
    assert_eq!(state.stage(), AuthStage::Ready);
    assert_eq!(state.config(), Some(&before));
    assert!(state.error_message.unwrap().contains("Repository not found"));
}

#[tokio::test]
async fn connection_update_switches_repo_and_rotates_token() {
    let h = Harness::new();
    let machine = h.ready_machine().await;

    machine
        .update_connection_settings(ConnectionSettings {
            repo_input: "bob/journal".into(),
            branch: Some(" main ".into()),
            token: Some("tok-bob".into()),
        })
        .await
        .unwrap();

    let state = machine.state();
    let config = state.config().unwrap();
    assert_eq!(config.gitee_repo, "https://gitee.com/bob/journal");
    assert_eq!(config.gitee_branch.as_deref(), Some("main"));
    assert_eq!(state.token(), Some("tok-bob"));
    assert_eq!(
        decrypt_with_aes_gcm(config.encrypted_token.as_deref().unwrap(), state.data_key().unwrap())
            .unwrap(),
        "tok-bob"
    );

    // The rotated token survives a restart through the session cache.
    let restarted = h.machine();
    assert_eq!(restarted.boot().await, AuthStage::Ready);
    assert_eq!(restarted.state().token(), Some("tok-bob"));
}

#[tokio::test]
async fn subscribers_see_transitions() {
    let h = Harness::new();
    let machine = h.machine();
    let mut rx = machine.subscribe();

    machine.boot().await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().stage(), AuthStage::NeedsSetup);

    machine.initialize(setup()).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().stage(), AuthStage::Ready);
}
