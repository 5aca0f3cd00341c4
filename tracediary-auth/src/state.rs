//! Auth state as a tagged union, and the reducer that moves between states.

use crate::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracediary_crypto::DataKey;
use zeroize::Zeroizing;

/// Flat stage name, for display and matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStage {
    Checking,
    NeedsSetup,
    NeedsUnlock,
    NeedsTokenRefresh,
    Ready,
}

impl AuthStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthStage::Checking => "checking",
            AuthStage::NeedsSetup => "needs-setup",
            AuthStage::NeedsUnlock => "needs-unlock",
            AuthStage::NeedsTokenRefresh => "needs-token-refresh",
            AuthStage::Ready => "ready",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRefreshReason {
    MissingToken,
    DecryptFailed,
    TokenInvalid,
    /// The remote could not be reached to confirm the token.
    RemoteUnreachable,
}

/// Secrets available only while ready.
#[derive(Clone)]
pub struct UnlockedSession {
    pub token: Zeroizing<String>,
    pub data_key: DataKey,
}

impl UnlockedSession {
    pub fn new(token: impl Into<String>, data_key: DataKey) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            data_key,
        }
    }
}

impl fmt::Debug for UnlockedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedSession")
            .field("token", &"<redacted>")
            .field("data_key", &self.data_key)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum AuthPhase {
    Checking,
    NeedsSetup,
    NeedsUnlock {
        config: AppConfig,
        password_expired: bool,
    },
    NeedsTokenRefresh {
        config: AppConfig,
        reason: TokenRefreshReason,
        needs_master_password: bool,
    },
    Ready {
        config: AppConfig,
        session: UnlockedSession,
    },
}

impl AuthPhase {
    pub fn stage(&self) -> AuthStage {
        match self {
            AuthPhase::Checking => AuthStage::Checking,
            AuthPhase::NeedsSetup => AuthStage::NeedsSetup,
            AuthPhase::NeedsUnlock { .. } => AuthStage::NeedsUnlock,
            AuthPhase::NeedsTokenRefresh { .. } => AuthStage::NeedsTokenRefresh,
            AuthPhase::Ready { .. } => AuthStage::Ready,
        }
    }
}

/// Session-visible projection of the auth machine.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub error_message: Option<String>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            phase: AuthPhase::Checking,
            error_message: None,
        }
    }
}

impl AuthState {
    pub fn stage(&self) -> AuthStage {
        self.phase.stage()
    }

    pub fn config(&self) -> Option<&AppConfig> {
        match &self.phase {
            AuthPhase::Checking | AuthPhase::NeedsSetup => None,
            AuthPhase::NeedsUnlock { config, .. }
            | AuthPhase::NeedsTokenRefresh { config, .. }
            | AuthPhase::Ready { config, .. } => Some(config),
        }
    }

    pub fn session(&self) -> Option<&UnlockedSession> {
        match &self.phase {
            AuthPhase::Ready { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session().map(|s| s.token.as_str())
    }

    pub fn data_key(&self) -> Option<&DataKey> {
        self.session().map(|s| &s.data_key)
    }

    /// Locked means the password must be entered before anything else.
    pub fn is_locked(&self) -> bool {
        matches!(
            self.phase,
            AuthPhase::Checking | AuthPhase::NeedsSetup | AuthPhase::NeedsUnlock { .. }
        )
    }

    pub fn password_expired(&self) -> bool {
        match &self.phase {
            AuthPhase::NeedsUnlock {
                password_expired, ..
            } => *password_expired,
            AuthPhase::Checking | AuthPhase::NeedsSetup => true,
            _ => false,
        }
    }

    pub fn token_refresh_reason(&self) -> Option<TokenRefreshReason> {
        match &self.phase {
            AuthPhase::NeedsTokenRefresh { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Everything that can happen to [`AuthState`].
#[derive(Debug, Clone)]
pub enum AuthEvent {
    BootStarted,
    SetupRequired,
    LockRequired {
        config: AppConfig,
        password_expired: bool,
    },
    TokenRefreshRequired {
        config: AppConfig,
        reason: TokenRefreshReason,
        needs_master_password: bool,
        message: Option<String>,
    },
    Unlocked {
        config: AppConfig,
        session: UnlockedSession,
    },
    /// An operation failed without changing the phase.
    Rejected {
        message: String,
    },
    ErrorCleared,
}

impl AuthState {
    /// Pure transition function.
    pub fn reduce(&self, event: AuthEvent) -> AuthState {
        match event {
            AuthEvent::BootStarted => AuthState::default(),
            AuthEvent::SetupRequired => AuthState {
                phase: AuthPhase::NeedsSetup,
                error_message: None,
            },
            AuthEvent::LockRequired {
                config,
                password_expired,
            } => AuthState {
                phase: AuthPhase::NeedsUnlock {
                    config,
                    password_expired,
                },
                error_message: None,
            },
            AuthEvent::TokenRefreshRequired {
                config,
                reason,
                needs_master_password,
                message,
            } => AuthState {
                phase: AuthPhase::NeedsTokenRefresh {
                    config,
                    reason,
                    needs_master_password,
                },
                error_message: message,
            },
            AuthEvent::Unlocked { config, session } => AuthState {
                phase: AuthPhase::Ready { config, session },
                error_message: None,
            },
            AuthEvent::Rejected { message } => AuthState {
                phase: self.phase.clone(),
                error_message: Some(message),
            },
            AuthEvent::ErrorCleared => AuthState {
                phase: self.phase.clone(),
                error_message: None,
            },
        }
    }
}
