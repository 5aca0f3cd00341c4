//! Best-effort mirror of [`AppConfig`] to a cloud table.
//!
//! Lets a fresh device recover the connection settings (sealed token
//! included) after signing in to an identity provider. The table is reached
//! through a PostgREST-style endpoint and keyed by the external user id. With
//! no signed-in identity every call is a no-op.

use crate::config::{AppConfig, TokenCipherVersion};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracediary_crypto::KdfParams;
use tracing::debug;

pub const TABLE_NAME: &str = "user_sync_configs";

/// Who is signed in to the identity provider, if anyone.
#[async_trait]
pub trait IdentitySession: Send + Sync {
    /// `(user_id, access_token)` of the current session.
    async fn current(&self) -> Option<(String, String)>;
}

/// A fixed identity. `None` models "signed out".
pub struct StaticIdentity(pub Option<(String, String)>);

#[async_trait]
impl IdentitySession for StaticIdentity {
    async fn current(&self) -> Option<(String, String)> {
        self.0.clone()
    }
}

#[async_trait]
pub trait CloudConfigMirror: Send + Sync {
    async fn load(&self) -> AuthResult<Option<AppConfig>>;

    async fn save(&self, config: &AppConfig) -> AuthResult<()>;
}

/// Mirror used when no cloud backend is configured.
pub struct NoopConfigMirror;

#[async_trait]
impl CloudConfigMirror for NoopConfigMirror {
    async fn load(&self) -> AuthResult<Option<AppConfig>> {
        Ok(None)
    }

    async fn save(&self, _config: &AppConfig) -> AuthResult<()> {
        Ok(())
    }
}

/// Row shape of the cloud table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfigRow {
    pub user_id: String,
    pub gitee_repo: String,
    pub gitee_owner: String,
    pub gitee_repo_name: String,
    pub gitee_branch: String,
    pub password_hash: String,
    pub password_expiry: DateTime<Utc>,
    pub kdf_params: KdfParams,
    pub encrypted_token: Option<String>,
    pub token_cipher_version: TokenCipherVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl CloudConfigRow {
    pub fn from_config(user_id: &str, config: &AppConfig, default_branch: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            gitee_repo: config.gitee_repo.clone(),
            gitee_owner: config.gitee_owner.clone(),
            gitee_repo_name: config.gitee_repo_name.clone(),
            gitee_branch: config
                .gitee_branch
                .clone()
                .unwrap_or_else(|| default_branch.to_string()),
            password_hash: config.password_hash.clone(),
            password_expiry: config.password_expiry,
            kdf_params: config.kdf_params.clone(),
            encrypted_token: config.encrypted_token.clone(),
            token_cipher_version: config.token_cipher_version,
            updated_at: None,
        }
    }

    pub fn into_config(self) -> AppConfig {
        AppConfig {
            gitee_repo: self.gitee_repo,
            gitee_owner: self.gitee_owner,
            gitee_repo_name: self.gitee_repo_name,
            gitee_branch: Some(self.gitee_branch).filter(|b| !b.trim().is_empty()),
            password_hash: self.password_hash,
            password_expiry: self.password_expiry,
            kdf_params: self.kdf_params,
            encrypted_token: self.encrypted_token,
            token_cipher_version: self.token_cipher_version,
        }
    }
}

pub struct RestConfigMirror {
    http: Client,
    base_url: String,
    api_key: String,
    default_branch: String,
    identity: Arc<dyn IdentitySession>,
}

impl RestConfigMirror {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        identity: Arc<dyn IdentitySession>,
    ) -> AuthResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AuthError::Mirror(e.without_url().to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_branch: "master".to_string(),
            identity,
        })
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{TABLE_NAME}", self.base_url)
    }
}

fn mirror_err(e: reqwest::Error) -> AuthError {
    AuthError::Mirror(e.without_url().to_string())
}

#[async_trait]
impl CloudConfigMirror for RestConfigMirror {
    async fn load(&self) -> AuthResult<Option<AppConfig>> {
        let Some((user_id, access_token)) = self.identity.current().await else {
            return Ok(None);
        };
        let rows: Vec<CloudConfigRow> = self
            .http
            .get(self.table_url())
            .query(&[("user_id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .header("apikey", &self.api_key)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(mirror_err)?
            .error_for_status()
            .map_err(mirror_err)?
            .json()
            .await
            .map_err(mirror_err)?;
        debug!(found = !rows.is_empty(), "loaded cloud config");
        Ok(rows.into_iter().next().map(CloudConfigRow::into_config))
    }

    async fn save(&self, config: &AppConfig) -> AuthResult<()> {
        let Some((user_id, access_token)) = self.identity.current().await else {
            return Ok(());
        };
        let row = CloudConfigRow::from_config(&user_id, config, &self.default_branch);
        self.http
            .post(self.table_url())
            .query(&[("on_conflict", "user_id")])
            .header("apikey", &self.api_key)
            .header("Prefer", "resolution=merge-duplicates")
            .bearer_auth(&access_token)
            .json(&row)
            .send()
            .await
            .map_err(mirror_err)?
            .error_for_status()
            .map_err(mirror_err)?;
        debug!("saved cloud config");
        Ok(())
    }
}
