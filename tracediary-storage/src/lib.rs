//! Local persistence for TraceDiary.
//!
//! Everything the client keeps on the device (connection config, lock flags,
//! the sealed session cache, sync baselines, diary records, the metadata
//! cache) goes through the [`KeyValueStore`] trait. Values are JSON strings.
//!
//! Two implementations ship here:
//! - [`MemoryStore`] for tests and ephemeral sessions
//! - [`FileStore`], a single JSON document on disk written atomically

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A durable string-to-string map.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn put(&self, key: &str, value: String) -> StorageResult<()>;

    /// Removes a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys beginning with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Reads and deserializes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Serializes and writes a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    store.put(key, raw).await
}
