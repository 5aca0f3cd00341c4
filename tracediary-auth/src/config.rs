//! Persisted connection config and auth settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracediary_crypto::{CalibrationOptions, KdfParams};
use tracediary_remote::{RepoRef, StoreConfig, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TokenCipherVersion {
    #[default]
    #[serde(rename = "v1")]
    V1,
}

/// One per install. Serialized in the camelCase shape shared with the cloud mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Canonical web URL of the repository.
    pub gitee_repo: String,
    pub gitee_owner: String,
    pub gitee_repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitee_branch: Option<String>,
    /// Master password verifier.
    pub password_hash: String,
    pub password_expiry: DateTime<Utc>,
    pub kdf_params: KdfParams,
    /// Remote token sealed under the password-derived key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_token: Option<String>,
    #[serde(default)]
    pub token_cipher_version: TokenCipherVersion,
}

impl AppConfig {
    pub fn repo_ref(&self) -> StoreResult<RepoRef> {
        RepoRef::new(&self.gitee_owner, &self.gitee_repo_name)
    }

    /// Configured branch, or the store default when unset.
    pub fn branch(&self, store: &StoreConfig) -> String {
        store.resolve_branch(self.gitee_branch.as_deref())
    }

    pub fn has_token(&self) -> bool {
        self.encrypted_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// How long an unlock stays valid without re-entering the password.
    pub session_ttl_days: i64,

    /// KDF calibration bounds used at setup.
    pub calibration: CalibrationOptions,

    /// Remote host settings, used to parse repository input.
    pub store: StoreConfig,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl_days: 7,
            calibration: CalibrationOptions::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AuthSettings {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_ttl_days.max(0))
    }
}
