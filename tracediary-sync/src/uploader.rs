//! Encrypted entry uploads against a versioned file store.

use crate::config::SyncConfig;
use crate::entry::{commit_timestamp, SyncEntryMetadata};
use crate::error::{SyncError, SyncResult};
use crate::fingerprint::contents_match;
use crate::metadata::MetadataIndex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracediary_crypto::{decrypt_with_aes_gcm, encrypt_with_aes_gcm, DataKey};
use tracediary_remote::{FileWrite, RemoteFile, VersionedFiles};
use tracing::{debug, info, warn};

/// Injectable wall clock.
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_now() -> NowFn {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub entry: SyncEntryMetadata,
    /// CAS expectation; `None` creates the file.
    pub expected_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        version: String,
        synced_at: DateTime<Utc>,
    },
    /// The remote moved. `remote` is the remote content when it could be read.
    Conflict {
        local: SyncEntryMetadata,
        remote: Option<SyncEntryMetadata>,
        remote_version: Option<String>,
    },
}

/// Pushes one entry. Conflicts are outcomes; transport and auth failures are errors.
#[async_trait]
pub trait EntryUploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadOutcome>;
}

/// [`EntryUploader`] that seals entries under the session data key.
pub struct DiaryUploader {
    files: Arc<dyn VersionedFiles>,
    key: DataKey,
    config: SyncConfig,
    now: NowFn,
}

impl DiaryUploader {
    pub fn new(files: Arc<dyn VersionedFiles>, key: DataKey, config: SyncConfig) -> Self {
        Self {
            files,
            key,
            config,
            now: system_now(),
        }
    }

    pub fn with_clock(mut self, now: NowFn) -> Self {
        self.now = now;
        self
    }

    fn timestamp(&self) -> String {
        commit_timestamp((self.now)(), self.config.commit_offset())
    }

    /// Reads and decrypts the remote copy of `local`'s slot.
    async fn read_remote(
        &self,
        local: &SyncEntryMetadata,
    ) -> SyncResult<Option<(SyncEntryMetadata, String)>> {
        match self.files.read(&local.remote_path()).await? {
            RemoteFile::Missing => Ok(None),
            RemoteFile::Found { content, version } => {
                let plain = decrypt_with_aes_gcm(&content, &self.key)?;
                Ok(Some((local.with_content(plain, (self.now)()), version)))
            }
        }
    }

    /// Read, upsert, CAS-write the metadata index; one retry on a lost race.
    /// Failures are logged and swallowed.
    async fn sync_index(&self, entry: &SyncEntryMetadata) {
        if !self.config.sync_metadata_index {
            return;
        }
        let path = self.config.metadata_path();
        for attempt in 0..2 {
            match self.try_sync_index(path, entry).await {
                Ok(()) => return,
                Err(e) if attempt == 0 && is_write_conflict(&e) => {
                    debug!("metadata index moved, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "metadata index update failed");
                    return;
                }
            }
        }
    }

    async fn try_sync_index(&self, path: &str, entry: &SyncEntryMetadata) -> SyncResult<()> {
        let now = (self.now)();
        let remote = self.files.read(path).await?;
        let mut index = match &remote {
            RemoteFile::Found { content, .. } if !content.trim().is_empty() => {
                match decrypt_with_aes_gcm(content, &self.key)
                    .ok()
                    .and_then(|plain| MetadataIndex::parse(&plain, now).ok())
                {
                    Some(index) => index,
                    None => {
                        warn!("remote metadata index unreadable, rebuilding");
                        MetadataIndex::empty(now)
                    }
                }
            }
            _ => MetadataIndex::empty(now),
        };
        index.upsert(entry, now);

        let sealed = encrypt_with_aes_gcm(&serde_json::to_string(&index)?, &self.key)?;
        let message = format!("chore: metadata @ {}", commit_timestamp(now, self.config.commit_offset()));
        self.files
            .write(&FileWrite {
                path,
                content: &sealed,
                message: &message,
                expected_version: remote.version(),
            })
            .await?;
        Ok(())
    }
}

fn is_write_conflict(e: &SyncError) -> bool {
    matches!(e, SyncError::Remote(err) if err.is_conflict())
}

#[async_trait]
impl EntryUploader for DiaryUploader {
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadOutcome> {
        let entry = &request.entry;
        let path = entry.remote_path();
        let expected = request
            .expected_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let sealed = encrypt_with_aes_gcm(entry.content(), &self.key)?;
        let message = entry.commit_message(&self.timestamp());

        let write = FileWrite {
            path: &path,
            content: &sealed,
            message: &message,
            expected_version: expected,
        };
        let err = match self.files.write(&write).await {
            Ok(receipt) => {
                info!(entry = %entry.entry_id(), %path, "entry uploaded");
                self.sync_index(entry).await;
                return Ok(UploadOutcome::Uploaded {
                    version: receipt.version,
                    synced_at: (self.now)(),
                });
            }
            Err(e) if e.is_conflict() => e,
            Err(e) => return Err(e.into()),
        };

        warn!(entry = %entry.entry_id(), error = %err, "upload conflict");
        let remote = match self.read_remote(entry).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "could not read remote side of conflict");
                None
            }
        };

        // A first upload that finds identical content already there is a success.
        if expected.is_none()
            && let Some((remote_entry, version)) = &remote
            && contents_match(remote_entry.content(), entry.content())
        {
            info!(entry = %entry.entry_id(), "remote already holds this content");
            self.sync_index(entry).await;
            return Ok(UploadOutcome::Uploaded {
                version: version.clone(),
                synced_at: (self.now)(),
            });
        }

        let (remote, remote_version) = match remote {
            Some((entry, version)) => (Some(entry), Some(version)),
            None => (None, None),
        };
        Ok(UploadOutcome::Conflict {
            local: entry.clone(),
            remote,
            remote_version,
        })
    }
}
