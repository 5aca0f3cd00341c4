//! Local config record and lock flags.
//!
//! The lock flag and expiry timestamp live under their own keys so that an
//! explicit lock can reset them without rewriting the config record.

use crate::config::AppConfig;
use crate::error::AuthResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracediary_storage::{get_json, put_json, KeyValueStore, StorageError};
use tracing::warn;

pub const CONFIG_KEY: &str = "trace-diary:app-config";
pub const LOCK_STATE_KEY: &str = "trace-diary:auth:lock-state";
pub const PASSWORD_EXPIRY_KEY: &str = "trace-diary:auth:password-expiry";

const LOCKED: &str = "locked";
const UNLOCKED: &str = "unlocked";

#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the config. An unreadable record counts as absent.
    pub async fn load(&self) -> AuthResult<Option<AppConfig>> {
        match get_json::<AppConfig>(self.store.as_ref(), CONFIG_KEY).await {
            Ok(config) => Ok(config),
            Err(StorageError::Corrupt { reason, .. }) => {
                warn!(%reason, "ignoring unreadable local config");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, config: &AppConfig) -> AuthResult<()> {
        put_json(self.store.as_ref(), CONFIG_KEY, config).await?;
        Ok(())
    }

    /// Anything other than an explicit "unlocked" reads as locked.
    pub async fn is_locked(&self) -> AuthResult<bool> {
        Ok(self.store.get(LOCK_STATE_KEY).await?.as_deref() != Some(UNLOCKED))
    }

    pub async fn set_locked(&self, locked: bool) -> AuthResult<()> {
        let value = if locked { LOCKED } else { UNLOCKED };
        self.store.put(LOCK_STATE_KEY, value.to_string()).await?;
        Ok(())
    }

    /// Unlock expiry in epoch milliseconds, if set and parsable.
    pub async fn expiry(&self) -> AuthResult<Option<DateTime<Utc>>> {
        let raw = self.store.get(PASSWORD_EXPIRY_KEY).await?;
        Ok(raw
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    pub async fn set_expiry(&self, at: DateTime<Utc>) -> AuthResult<()> {
        self.store
            .put(PASSWORD_EXPIRY_KEY, at.timestamp_millis().to_string())
            .await?;
        Ok(())
    }

    pub async fn clear_expiry(&self) -> AuthResult<()> {
        self.store.delete(PASSWORD_EXPIRY_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracediary_storage::MemoryStore;

    #[tokio::test]
    async fn missing_lock_flag_reads_locked() {
        let store = ConfigStore::new(Arc::new(MemoryStore::new()));
        assert!(store.is_locked().await.unwrap());
        store.set_locked(false).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn expiry_roundtrips_as_millis() {
        let kv = Arc::new(MemoryStore::new());
        let store = ConfigStore::new(kv.clone());
        let at = DateTime::<Utc>::from_timestamp_millis(1_767_225_600_123).unwrap();
        store.set_expiry(at).await.unwrap();
        assert_eq!(
            kv.get(PASSWORD_EXPIRY_KEY).await.unwrap().as_deref(),
            Some("1767225600123")
        );
        assert_eq!(store.expiry().await.unwrap(), Some(at));

        kv.put(PASSWORD_EXPIRY_KEY, "garbage".into()).await.unwrap();
        assert_eq!(store.expiry().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_config_reads_as_absent() {
        let kv = Arc::new(MemoryStore::new());
        kv.put(CONFIG_KEY, "{not json".into()).await.unwrap();
        let store = ConfigStore::new(kv);
        assert!(store.load().await.unwrap().is_none());
    }
}
