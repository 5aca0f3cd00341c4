//! The auth state machine.
//!
//! Every operation runs under a single operation lock and publishes its
//! outcome through [`AuthMachine::commit`], the only place state changes.
//! Observers follow along with [`AuthMachine::subscribe`].

use crate::clock::{Clock, SystemClock};
use crate::cloud_mirror::{CloudConfigMirror, NoopConfigMirror};
use crate::config::{AppConfig, AuthSettings, TokenCipherVersion};
use crate::error::{AuthError, AuthResult};
use crate::password::master_password_error;
use crate::persistence::ConfigStore;
use crate::secret_cache::{CachedSession, LocalSecretCache, SecretCache};
use crate::state::{AuthEvent, AuthPhase, AuthStage, AuthState, TokenRefreshReason, UnlockedSession};
use crate::validator::{HttpRepoValidator, RepoAccessValidator};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracediary_crypto::{
    calibrate_kdf_params, decrypt_with_aes_gcm, derive_aes_key_from_password,
    encrypt_with_aes_gcm, hash_master_password, verify_master_password, CryptoError, DataKey,
};
use tracediary_remote::{parse_repo_input, FailureKind, RepoRef};
use tracediary_storage::KeyValueStore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const MIRROR_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators of the machine.
pub struct AuthDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub secrets: Arc<dyn SecretCache>,
    pub validator: Arc<dyn RepoAccessValidator>,
    pub mirror: Arc<dyn CloudConfigMirror>,
    pub clock: Arc<dyn Clock>,
}

impl AuthDeps {
    /// Local-only wiring: session cache in `store`, HTTP validation, no cloud mirror.
    pub fn local(store: Arc<dyn KeyValueStore>, settings: &AuthSettings) -> Self {
        Self {
            secrets: Arc::new(LocalSecretCache::new(store.clone())),
            validator: Arc::new(HttpRepoValidator::new(settings.store.clone())),
            mirror: Arc::new(NoopConfigMirror),
            clock: Arc::new(SystemClock),
            store,
        }
    }
}

/// First-run input.
#[derive(Clone)]
pub struct SetupRequest {
    pub repo_input: String,
    pub token: String,
    pub master_password: String,
    pub branch: Option<String>,
}

/// New connection settings while ready. `token: None` keeps the current token.
#[derive(Clone, Default)]
pub struct ConnectionSettings {
    pub repo_input: String,
    pub branch: Option<String>,
    pub token: Option<String>,
}

enum Restore {
    Session(UnlockedSession),
    Locked,
    DecryptFailed,
}

pub struct AuthMachine {
    settings: AuthSettings,
    configs: ConfigStore,
    secrets: Arc<dyn SecretCache>,
    validator: Arc<dyn RepoAccessValidator>,
    mirror: Arc<dyn CloudConfigMirror>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<AuthState>,
    master_password: Mutex<Option<Zeroizing<String>>>,
    op: tokio::sync::Mutex<()>,
}

impl AuthMachine {
    pub fn new(settings: AuthSettings, deps: AuthDeps) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            settings,
            configs: ConfigStore::new(deps.store),
            secrets: deps.secrets,
            validator: deps.validator,
            mirror: deps.mirror,
            clock: deps.clock,
            state,
            master_password: Mutex::new(None),
            op: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    // ── State mutation ──────────────────────────────────────────────

    fn commit(&self, event: AuthEvent) {
        self.state.send_modify(|state| {
            let before = state.stage();
            *state = state.reduce(event);
            if state.stage() != before {
                info!(from = %before, to = %state.stage(), "auth stage changed");
            }
        });
    }

    /// Publishes a failed operation as an error message on the current phase.
    fn report<T>(&self, result: AuthResult<T>) -> AuthResult<T> {
        if let Err(e) = &result {
            warn!(error = %e, "auth operation failed");
            self.commit(AuthEvent::Rejected {
                message: e.user_message(),
            });
        }
        result
    }

    pub fn clear_error(&self) {
        self.commit(AuthEvent::ErrorCleared);
    }

    fn remembered_password(&self) -> Option<Zeroizing<String>> {
        self.master_password
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember(&self, password: Option<Zeroizing<String>>) {
        *self
            .master_password
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = password;
    }

    // ── Boot ────────────────────────────────────────────────────────

    /// Recomputes the stage from persisted state. Never fails: problems
    /// degrade to a locked or refresh-required stage.
    pub async fn boot(&self) -> AuthStage {
        let _op = self.op.lock().await;
        self.commit(AuthEvent::BootStarted);

        let config = match self.load_or_recover_config().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                if let Err(e) = self.configs.set_locked(true).await {
                    warn!(error = %e, "could not persist lock flag");
                }
                self.commit(AuthEvent::SetupRequired);
                return AuthStage::NeedsSetup;
            }
            Err(e) => {
                warn!(error = %e, "local config unreadable");
                self.commit(AuthEvent::SetupRequired);
                self.commit(AuthEvent::Rejected {
                    message: e.user_message(),
                });
                return AuthStage::NeedsSetup;
            }
        };

        let now = self.clock.now();
        let expiry = self
            .configs
            .expiry()
            .await
            .ok()
            .flatten()
            .unwrap_or(config.password_expiry);
        let password_expired = expiry <= now;
        let locked = self.configs.is_locked().await.unwrap_or(true);

        if locked || password_expired {
            self.lock_to(config, password_expired).await;
            return AuthStage::NeedsUnlock;
        }

        if !config.has_token() {
            self.require_token_refresh(config, TokenRefreshReason::MissingToken);
            return AuthStage::NeedsTokenRefresh;
        }

        let session = match self.restore_session(&config, now).await {
            Restore::Session(session) => session,
            Restore::Locked => {
                self.lock_to(config, false).await;
                return AuthStage::NeedsUnlock;
            }
            Restore::DecryptFailed => {
                self.require_token_refresh(config, TokenRefreshReason::DecryptFailed);
                return AuthStage::NeedsTokenRefresh;
            }
        };

        if let Err(reason) = self.check_remote(&config, &session.token).await {
            self.require_token_refresh(config, reason);
            return AuthStage::NeedsTokenRefresh;
        }

        debug!("session restored silently");
        self.commit(AuthEvent::Unlocked { config, session });
        AuthStage::Ready
    }

    async fn load_or_recover_config(&self) -> AuthResult<Option<AppConfig>> {
        if let Some(config) = self.configs.load().await? {
            return Ok(Some(config));
        }
        match tokio::time::timeout(MIRROR_LOAD_TIMEOUT, self.mirror.load()).await {
            Ok(Ok(Some(config))) => {
                info!("recovered connection config from cloud mirror");
                if let Err(e) = self.configs.save(&config).await {
                    warn!(error = %e, "could not store recovered config locally");
                }
                Ok(Some(config))
            }
            Ok(Ok(None)) => Ok(None),
            Ok(Err(e)) => {
                warn!(error = %e, "cloud config unavailable");
                Ok(None)
            }
            Err(_) => {
                warn!("cloud config load timed out");
                Ok(None)
            }
        }
    }

    async fn restore_session(&self, config: &AppConfig, now: DateTime<Utc>) -> Restore {
        match self.secrets.get().await {
            Ok(Some(cached)) if cached.expires_at > now => {
                return Restore::Session(UnlockedSession {
                    token: cached.token,
                    data_key: cached.data_key,
                });
            }
            Ok(Some(_)) => {
                debug!("cached session expired");
                if let Err(e) = self.secrets.clear().await {
                    warn!(error = %e, "could not clear expired session cache");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "session cache unreadable, locking");
                return Restore::Locked;
            }
        }

        match self.remembered_password() {
            Some(password) => match self.open_token(config, password).await {
                Ok(session) => Restore::Session(session),
                Err(e) => {
                    debug!(error = %e, "stored token did not open");
                    Restore::DecryptFailed
                }
            },
            None => Restore::Locked,
        }
    }

    async fn lock_to(&self, config: AppConfig, password_expired: bool) {
        if let Err(e) = self.configs.set_locked(true).await {
            warn!(error = %e, "could not persist lock flag");
        }
        self.commit(AuthEvent::LockRequired {
            config,
            password_expired,
        });
    }

    fn require_token_refresh(&self, config: AppConfig, reason: TokenRefreshReason) {
        let message = match reason {
            TokenRefreshReason::MissingToken => "No stored token is available. Please enter a token.",
            TokenRefreshReason::DecryptFailed => {
                "The stored token could not be decrypted. Please enter the token again."
            }
            TokenRefreshReason::TokenInvalid => {
                "The stored token is no longer valid. Please enter a new token."
            }
            TokenRefreshReason::RemoteUnreachable => {
                "Could not reach the remote to confirm the token. Retry or enter the token again."
            }
        };
        self.commit(AuthEvent::TokenRefreshRequired {
            config,
            reason,
            needs_master_password: self.remembered_password().is_none(),
            message: Some(message.to_string()),
        });
    }

    // ── Operations ──────────────────────────────────────────────────

    /// First-run setup: validate, calibrate, seal, persist, unlock.
    pub async fn initialize(&self, request: SetupRequest) -> AuthResult<()> {
        let _op = self.op.lock().await;
        let result = self.initialize_inner(request).await;
        self.report(result)
    }

    async fn initialize_inner(&self, request: SetupRequest) -> AuthResult<()> {
        let stage = self.state().stage();
        if stage != AuthStage::NeedsSetup {
            return Err(AuthError::InvalidPhase(stage.as_str()));
        }

        let host = &self.settings.store.web_host;
        let repo = parse_repo_input(&request.repo_input, host)?;
        let token = request.token.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::Validation("Please enter an access token.".into()));
        }
        if let Some(msg) = master_password_error(&request.master_password) {
            return Err(AuthError::Validation(msg.into()));
        }

        self.validator.validate(&repo, &token).await?;

        let password = Zeroizing::new(request.master_password);
        let options = self.settings.calibration.clone();
        let (params, verifier, sealed_token, data_key) = {
            let password = password.clone();
            let token = Zeroizing::new(token.clone());
            blocking(move || {
                let params = calibrate_kdf_params(&password, &options)?;
                let verifier = hash_master_password(&password, &params)?;
                let key = derive_aes_key_from_password(&password, &params)?;
                let sealed = encrypt_with_aes_gcm(&token, &key)?;
                Ok((params, verifier, sealed, key))
            })
            .await?
        };
        info!(iterations = params.iterations, "calibrated key derivation");

        let expiry = self.clock.now() + self.settings.session_ttl();
        let config = AppConfig {
            gitee_repo: repo.web_url(host),
            gitee_owner: repo.owner.clone(),
            gitee_repo_name: repo.repo.clone(),
            gitee_branch: Some(self.settings.store.resolve_branch(request.branch.as_deref())),
            password_hash: verifier,
            password_expiry: expiry,
            kdf_params: params,
            encrypted_token: Some(sealed_token),
            token_cipher_version: TokenCipherVersion::V1,
        };

        self.configs.save(&config).await?;
        self.mark_unlocked(expiry).await?;
        self.mirror_best_effort(&config).await;
        self.remember(Some(password));

        let session = UnlockedSession::new(token, data_key);
        self.cache_session(&session, expiry).await;
        self.commit(AuthEvent::Unlocked { config, session });
        Ok(())
    }

    /// Verifies the master password and opens the stored token.
    ///
    /// A wrong password is an error. Token problems after a correct password
    /// are not: they land in needs-token-refresh with a reason.
    pub async fn unlock(&self, master_password: &str) -> AuthResult<()> {
        let _op = self.op.lock().await;
        let result = self.unlock_inner(master_password).await;
        self.report(result)
    }

    async fn unlock_inner(&self, master_password: &str) -> AuthResult<()> {
        let mut config = self.current_config()?;
        if let Some(msg) = master_password_error(master_password) {
            return Err(AuthError::Validation(msg.into()));
        }

        let password = Zeroizing::new(master_password.to_string());
        if !self.verify(&config, &password).await? {
            return Err(AuthError::WrongPassword);
        }
        self.remember(Some(password.clone()));

        let expiry = self.clock.now() + self.settings.session_ttl();
        self.mark_unlocked(expiry).await?;
        config.password_expiry = expiry;
        self.configs.save(&config).await?;

        if !config.has_token() {
            self.require_token_refresh(config, TokenRefreshReason::MissingToken);
            return Ok(());
        }

        let session = match self.open_token(&config, password).await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "stored token did not open");
                self.require_token_refresh(config, TokenRefreshReason::DecryptFailed);
                return Ok(());
            }
        };

        if let Err(reason) = self.check_remote(&config, &session.token).await {
            self.require_token_refresh(config, reason);
            return Ok(());
        }

        self.cache_session(&session, expiry).await;
        self.commit(AuthEvent::Unlocked { config, session });
        Ok(())
    }

    /// Replaces the sealed token. Uses `master_password` when given, else the
    /// password remembered from this process's last unlock.
    pub async fn update_token(&self, token: &str, master_password: Option<&str>) -> AuthResult<()> {
        let _op = self.op.lock().await;
        let result = self.update_token_inner(token, master_password).await;
        self.report(result)
    }

    async fn update_token_inner(&self, token: &str, master_password: Option<&str>) -> AuthResult<()> {
        let mut config = self.current_config()?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::Validation("Please enter the new access token.".into()));
        }
        let password = master_password
            .filter(|p| !p.trim().is_empty())
            .map(|p| Zeroizing::new(p.to_string()))
            .or_else(|| self.remembered_password())
            .ok_or(AuthError::PasswordRequired)?;

        if !self.verify(&config, &password).await? {
            return Err(AuthError::WrongPassword);
        }

        let repo = config.repo_ref()?;
        self.validator.validate(&repo, &token).await?;

        let (data_key, sealed_token) = {
            let password = password.clone();
            let params = config.kdf_params.clone();
            let token = Zeroizing::new(token.clone());
            blocking(move || {
                let key = derive_aes_key_from_password(&password, &params)?;
                let sealed = encrypt_with_aes_gcm(&token, &key)?;
                Ok((key, sealed))
            })
            .await?
        };

        let expiry = self.clock.now() + self.settings.session_ttl();
        config.password_expiry = expiry;
        config.encrypted_token = Some(sealed_token);
        config.token_cipher_version = TokenCipherVersion::V1;

        self.configs.save(&config).await?;
        self.mark_unlocked(expiry).await?;
        self.mirror_best_effort(&config).await;
        self.remember(Some(password));

        let session = UnlockedSession::new(token, data_key);
        self.cache_session(&session, expiry).await;
        self.commit(AuthEvent::Unlocked { config, session });
        Ok(())
    }

    /// Drops every in-memory secret and the on-disk session cache.
    pub async fn lock_now(&self) -> AuthResult<()> {
        let _op = self.op.lock().await;
        self.remember(None);

        let flags = async {
            self.configs.set_locked(true).await?;
            self.configs.clear_expiry().await
        }
        .await;
        if let Err(e) = self.secrets.clear().await {
            warn!(error = %e, "could not clear session cache");
        }

        let config = match self.configs.load().await {
            Ok(config) => config,
            Err(_) => self.state().config().cloned(),
        };
        match config {
            Some(config) => self.commit(AuthEvent::LockRequired {
                config,
                password_expired: true,
            }),
            None => self.commit(AuthEvent::SetupRequired),
        }
        self.report(flags)
    }

    /// Changes repository, branch and optionally token while ready.
    ///
    /// The new settings are validated against the remote before anything is
    /// persisted. On failure the session stays ready and only the error
    /// message changes.
    pub async fn update_connection_settings(&self, settings: ConnectionSettings) -> AuthResult<()> {
        let _op = self.op.lock().await;
        let result = self.update_connection_inner(settings).await;
        self.report(result)
    }

    async fn update_connection_inner(&self, settings: ConnectionSettings) -> AuthResult<()> {
        let state = self.state();
        let stage = state.stage();
        let AuthPhase::Ready { config, session } = state.phase else {
            return Err(AuthError::InvalidPhase(stage.as_str()));
        };

        let host = &self.settings.store.web_host;
        let repo = parse_repo_input(&settings.repo_input, host)?;
        let new_token = settings
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let token = new_token.unwrap_or(session.token.as_str());

        self.validator.validate(&repo, token).await?;

        let mut next = config;
        next.gitee_repo = repo.web_url(host);
        next.gitee_owner = repo.owner.clone();
        next.gitee_repo_name = repo.repo.clone();
        next.gitee_branch = Some(self.settings.store.resolve_branch(settings.branch.as_deref()));

        let mut next_session = session.clone();
        if let Some(token) = new_token {
            // The data key is the password-derived key the token is sealed under.
            next.encrypted_token = Some(encrypt_with_aes_gcm(token, &session.data_key)?);
            next.token_cipher_version = TokenCipherVersion::V1;
            next_session = UnlockedSession::new(token, session.data_key.clone());
        }

        self.configs.save(&next).await?;
        if new_token.is_some() {
            self.cache_session(&next_session, next.password_expiry).await;
        }
        self.mirror_best_effort(&next).await;
        info!(repo = %repo, "connection settings updated");
        self.commit(AuthEvent::Unlocked {
            config: next,
            session: next_session,
        });
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn current_config(&self) -> AuthResult<AppConfig> {
        match self.state().config().cloned() {
            Some(config) => Ok(config),
            None => {
                self.commit(AuthEvent::SetupRequired);
                Err(AuthError::NotConfigured)
            }
        }
    }

    async fn verify(&self, config: &AppConfig, password: &Zeroizing<String>) -> AuthResult<bool> {
        let params = config.kdf_params.clone();
        let verifier = config.password_hash.clone();
        let password = password.clone();
        blocking(move || verify_master_password(&password, &params, &verifier)).await
    }

    async fn open_token(
        &self,
        config: &AppConfig,
        password: Zeroizing<String>,
    ) -> AuthResult<UnlockedSession> {
        let sealed = config
            .encrypted_token
            .clone()
            .ok_or(AuthError::Crypto(CryptoError::InvalidCiphertext("no token".into())))?;
        let params = config.kdf_params.clone();
        let (token, key): (String, DataKey) = blocking(move || {
            let key = derive_aes_key_from_password(&password, &params)?;
            let token = decrypt_with_aes_gcm(&sealed, &key)?;
            Ok((token, key))
        })
        .await?;
        Ok(UnlockedSession::new(token, key))
    }

    /// Maps a failed remote check to the refresh reason it implies.
    async fn check_remote(&self, config: &AppConfig, token: &str) -> Result<(), TokenRefreshReason> {
        let repo: RepoRef = config
            .repo_ref()
            .map_err(|_| TokenRefreshReason::TokenInvalid)?;
        match self.validator.validate(&repo, token).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == FailureKind::Network => {
                warn!(error = %e, "remote unreachable while validating token");
                Err(TokenRefreshReason::RemoteUnreachable)
            }
            Err(e) => {
                warn!(error = %e, "stored token rejected");
                Err(TokenRefreshReason::TokenInvalid)
            }
        }
    }

    async fn mark_unlocked(&self, expiry: DateTime<Utc>) -> AuthResult<()> {
        self.configs.set_locked(false).await?;
        self.configs.set_expiry(expiry).await
    }

    async fn cache_session(&self, session: &UnlockedSession, expires_at: DateTime<Utc>) {
        let cached = CachedSession {
            token: session.token.clone(),
            data_key: session.data_key.clone(),
            expires_at,
        };
        if let Err(e) = self.secrets.put(&cached).await {
            warn!(error = %e, "could not cache session");
        }
    }

    async fn mirror_best_effort(&self, config: &AppConfig) {
        if let Err(e) = self.mirror.save(config).await {
            warn!(error = %e, "cloud config mirror failed");
        }
    }
}

/// Runs CPU-bound crypto off the async workers.
async fn blocking<T, F>(job: F) -> AuthResult<T>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|_| AuthError::Task)?
        .map_err(AuthError::from)
}
