//! Local cache of the remote metadata index.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::metadata::MetadataIndex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracediary_crypto::{decrypt_with_aes_gcm, DataKey};
use tracediary_remote::{RemoteFile, VersionedFiles};
use tracediary_storage::{get_json, put_json, KeyValueStore};
use tracing::{debug, info};

pub const METADATA_CACHE_KEY: &str = "trace-diary:metadata-cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataCacheRecord {
    pub metadata: MetadataIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,
    pub cached_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn get(&self) -> SyncResult<Option<MetadataCacheRecord>>;

    async fn put(&self, record: &MetadataCacheRecord) -> SyncResult<()>;
}

#[derive(Clone)]
pub struct KvMetadataCache {
    store: Arc<dyn KeyValueStore>,
}

impl KvMetadataCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetadataCache for KvMetadataCache {
    async fn get(&self) -> SyncResult<Option<MetadataCacheRecord>> {
        Ok(get_json(self.store.as_ref(), METADATA_CACHE_KEY).await?)
    }

    async fn put(&self, record: &MetadataCacheRecord) -> SyncResult<()> {
        put_json(self.store.as_ref(), METADATA_CACHE_KEY, record).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Cache,
    Remote,
    /// Nothing cached and nothing on the remote.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPull {
    pub metadata: Option<MetadataIndex>,
    pub source: MetadataSource,
    pub remote_version: Option<String>,
}

impl MetadataPull {
    fn cached(record: MetadataCacheRecord) -> Self {
        Self {
            metadata: Some(record.metadata),
            source: MetadataSource::Cache,
            remote_version: record.remote_version,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    pub force_refresh: bool,
}

/// Returns the cached index without network I/O unless there is none or
/// `force_refresh` is set. A missing remote index falls back to the cache.
/// A fetched index always overwrites the cache.
pub async fn pull_and_cache_metadata(
    files: &dyn VersionedFiles,
    key: &DataKey,
    cache: &dyn MetadataCache,
    config: &SyncConfig,
    options: PullOptions,
    now: DateTime<Utc>,
) -> SyncResult<MetadataPull> {
    let cached = cache.get().await?;
    if let Some(record) = &cached
        && !options.force_refresh
    {
        debug!("metadata served from cache");
        return Ok(MetadataPull::cached(record.clone()));
    }

    let (content, version) = match files.read(config.metadata_path()).await? {
        RemoteFile::Found { content, version } => (content, version),
        RemoteFile::Missing => {
            return Ok(match cached {
                Some(record) => {
                    info!("remote metadata index missing, keeping cached copy");
                    MetadataPull::cached(record)
                }
                None => MetadataPull {
                    metadata: None,
                    source: MetadataSource::Empty,
                    remote_version: None,
                },
            });
        }
    };
    if content.trim().is_empty() {
        return Err(SyncError::EmptyIndex);
    }

    let metadata = MetadataIndex::parse(&decrypt_with_aes_gcm(&content, key)?, now)?;
    cache
        .put(&MetadataCacheRecord {
            metadata: metadata.clone(),
            remote_version: Some(version.clone()),
            cached_at: now,
        })
        .await?;
    info!(entries = metadata.entries.len(), "metadata index refreshed");

    Ok(MetadataPull {
        metadata: Some(metadata),
        source: MetadataSource::Remote,
        remote_version: Some(version),
    })
}
