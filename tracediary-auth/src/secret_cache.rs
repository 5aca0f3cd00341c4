//! Sealed cache of the unlocked session.
//!
//! Lets a restart inside the unlock window restore the token and data key
//! without the master password. The record is sealed under a random key that
//! never leaves this device; the password itself is never cached.

use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracediary_crypto::{decrypt_with_aes_gcm, encrypt_with_aes_gcm, DataKey};
use tracediary_storage::KeyValueStore;
use zeroize::Zeroizing;

pub const SESSION_SECRET_KEY: &str = "trace-diary:auth:session-secret";
pub const SESSION_CACHE_KEY: &str = "trace-diary:auth:session-cache";

#[derive(Clone)]
pub struct CachedSession {
    pub token: Zeroizing<String>,
    pub data_key: DataKey,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SecretCache: Send + Sync {
    /// `Err` means the cache exists but cannot be trusted.
    async fn get(&self) -> AuthResult<Option<CachedSession>>;

    async fn put(&self, session: &CachedSession) -> AuthResult<()>;

    async fn clear(&self) -> AuthResult<()>;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SealedRecord {
    token: String,
    data_key: String,
    expires_at: DateTime<Utc>,
}

/// [`SecretCache`] over the local key-value store.
pub struct LocalSecretCache {
    store: Arc<dyn KeyValueStore>,
}

impl LocalSecretCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn device_key(&self, create: bool) -> AuthResult<Option<DataKey>> {
        match self.store.get(SESSION_SECRET_KEY).await? {
            Some(encoded) => Ok(Some(DataKey::from_base64(&encoded)?)),
            None if create => {
                let key = DataKey::generate();
                self.store.put(SESSION_SECRET_KEY, key.to_base64()).await?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SecretCache for LocalSecretCache {
    async fn get(&self) -> AuthResult<Option<CachedSession>> {
        let Some(sealed) = self.store.get(SESSION_CACHE_KEY).await? else {
            return Ok(None);
        };
        let Some(key) = self.device_key(false).await? else {
            return Err(AuthError::Validation("session cache has no device key".into()));
        };
        let plain = Zeroizing::new(decrypt_with_aes_gcm(&sealed, &key)?);
        let record: SealedRecord = serde_json::from_str(&plain)
            .map_err(|_| AuthError::Validation("session cache is malformed".into()))?;
        let token = Zeroizing::new(record.token);
        let data_key = DataKey::from_base64(&Zeroizing::new(record.data_key))?;
        Ok(Some(CachedSession {
            token,
            data_key,
            expires_at: record.expires_at,
        }))
    }

    async fn put(&self, session: &CachedSession) -> AuthResult<()> {
        let key = self
            .device_key(true)
            .await?
            .ok_or(AuthError::Task)?;
        let record = SealedRecord {
            token: session.token.to_string(),
            data_key: session.data_key.to_base64(),
            expires_at: session.expires_at,
        };
        let plain = Zeroizing::new(
            serde_json::to_string(&record)
                .map_err(|_| AuthError::Validation("session record not serializable".into()))?,
        );
        let sealed = encrypt_with_aes_gcm(&plain, &key)?;
        self.store.put(SESSION_CACHE_KEY, sealed).await?;
        Ok(())
    }

    /// Drops the record and rotates the device key.
    async fn clear(&self) -> AuthResult<()> {
        self.store.delete(SESSION_CACHE_KEY).await?;
        self.store.delete(SESSION_SECRET_KEY).await?;
        Ok(())
    }
}
