//! C2: the upload coordinator.
//!
//! Owns live chunked-upload sessions in a single in-process table guarded by
//! a readers-writer lock (spec.md §4.2, §5). No lock is held across file or
//! network I/O longer than a pointer read/write — session mutations only
//! hold the write lock to update bookkeeping fields, never while streaming
//! bytes to disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

use crate::digest::Digest;
use crate::error::{OciErrorCode, RegistryError, Result};
use crate::store::ContentStore;

struct UploadSession {
    repo: String,
    staging_path: PathBuf,
    offset: u64,
    completed: bool,
}

/// Current state of an upload session, as reported by `Status`.
pub struct SessionStatus {
    pub offset: u64,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    store: ContentStore,
    sessions: Arc<RwLock<HashMap<String, UploadSession>>>,
}

impl UploadCoordinator {
    pub fn new(store: ContentStore) -> Self {
        Self {
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates an empty staging file and registers a new session. Session
    /// IDs are unique opaque tokens (a random UUID, which collides with
    /// astronomically low probability — spec.md's example of a monotonic
    /// nanosecond timestamp works identically, but a UUID needs no shared
    /// monotonic clock across restarts).
    pub async fn initiate(&self, repo: &str) -> Result<String> {
        let dir = self.store.upload_dir(repo);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let staging_path = dir.join(&session_id);
        fs::File::create(&staging_path)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(RegistryError::new(
                OciErrorCode::BlobUploadInvalid,
                "session id collision",
            ));
        }
        sessions.insert(
            session_id.clone(),
            UploadSession {
                repo: repo.to_string(),
                staging_path,
                offset: 0,
                completed: false,
            },
        );

        Ok(session_id)
    }

    /// Appends a chunk to the session's staging file. `start` must equal the
    /// session's current offset exactly: less than it is duplicate bytes,
    /// greater than it is a gap — both are `RANGE_INVALID` (spec.md §4.2,
    /// §8 invariant 4). The offset only advances after the bytes are
    /// durably appended.
    pub async fn chunk(
        &self,
        session_id: &str,
        reader: impl AsyncRead + Unpin,
        start: u64,
    ) -> Result<u64> {
        let staging_path = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .ok_or_else(|| RegistryError::new(OciErrorCode::BlobUploadUnknown, "unknown upload session"))?;

            if session.completed {
                return Err(RegistryError::new(
                    OciErrorCode::BlobUploadInvalid,
                    "upload session is already completed",
                ));
            }

            if start != session.offset {
                let detail = if start < session.offset {
                    format!(
                        "range start {start} is less than current offset {}",
                        session.offset
                    )
                } else {
                    format!(
                        "range start {start} does not match current offset {}",
                        session.offset
                    )
                };
                return Err(RegistryError::range_invalid(detail));
            }
            session.staging_path.clone()
        };

        let written = append_to_file(&staging_path, reader).await?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| RegistryError::new(OciErrorCode::BlobUploadUnknown, "unknown upload session"))?;
        session.offset += written;
        Ok(session.offset)
    }

    /// Appends any trailing bytes, re-hashes the whole staging file, and on
    /// a digest match promotes it into the store's blob namespace. On
    /// mismatch the staging file is left in place for forensic inspection
    /// (spec.md §4.2).
    pub async fn complete(
        &self,
        session_id: &str,
        digest: &Digest,
        trailing: Option<impl AsyncRead + Unpin>,
    ) -> Result<()> {
        let (repo, staging_path) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .ok_or_else(|| RegistryError::new(OciErrorCode::BlobUploadUnknown, "unknown upload session"))?;

            if session.completed {
                return Err(RegistryError::new(
                    OciErrorCode::BlobUploadInvalid,
                    "upload session is already completed",
                ));
            }

            (session.repo.clone(), session.staging_path.clone())
        };

        if let Some(reader) = trailing {
            append_to_file(&staging_path, reader).await?;
        }

        let bytes = fs::read(&staging_path)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        let actual = Digest::of(&bytes);
        if &actual != digest {
            return Err(RegistryError::digest_invalid(format!(
                "digest mismatch: expected {digest}, got {actual}"
            )));
        }

        self.promote_to_blob(&repo, digest, &staging_path).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.completed = true;
        }
        Ok(())
    }

    async fn promote_to_blob(&self, repo: &str, digest: &Digest, staging_path: &PathBuf) -> Result<()> {
        let blob_path = self.store.blob_path_for(repo, digest);
        if let Some(dir) = blob_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        }
        fs::rename(staging_path, &blob_path)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        Ok(())
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| RegistryError::new(OciErrorCode::BlobUploadUnknown, "unknown upload session"))?;
        Ok(SessionStatus {
            offset: session.offset,
        })
    }
}

async fn append_to_file(path: &PathBuf, mut reader: impl AsyncRead + Unpin) -> Result<u64> {
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        total += n as u64;
    }
    file.flush()
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
    Ok(total)
}
