//! Attachment download and local persistence.

use std::path::{Path, PathBuf};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    mediarelay_common::Session,
    tracing::{debug, error, info},
};

use crate::{
    classifier::QualifiedMessage,
    error::{Error, Result},
};

/// A persisted attachment, ready for delivery.
#[derive(Debug, Clone)]
pub struct StoredMediaFile {
    pub path: PathBuf,
    /// `{epoch_millis}_{message_id}.jpg`
    pub filename: String,
    /// Base64 of the bytes read back from `path`.
    pub base64: String,
    pub size: usize,
}

/// Writes downloaded images to the incoming-media directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file name for a capture time and message id.
    pub fn filename_for(captured_at_millis: i64, message_id: &str) -> String {
        let safe_id: String = message_id
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        format!("{captured_at_millis}_{safe_id}.jpg")
    }

    /// Persist `bytes` using the current time as the capture time.
    pub async fn persist(&self, message_id: &str, bytes: &[u8]) -> Result<StoredMediaFile> {
        let captured_at = chrono::Utc::now().timestamp_millis();
        self.persist_at(captured_at, message_id, bytes).await
    }

    /// Write `bytes`, then read the file back and encode what is on disk.
    pub async fn persist_at(
        &self,
        captured_at_millis: i64,
        message_id: &str,
        bytes: &[u8],
    ) -> Result<StoredMediaFile> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::storage("create", &self.dir, e))?;

        let filename = Self::filename_for(captured_at_millis, message_id);
        let path = self.dir.join(&filename);

        if let Err(e) = tokio::fs::write(&path, bytes).await {
            error!(
                message_id,
                path = %path.display(),
                buffer_size = bytes.len(),
                error = %e,
                "failed to write media file"
            );
            return Err(Error::storage("write", path, e));
        }

        let written = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::storage("read", &path, e))?;
        info!(message_id, path = %path.display(), size = written.len(), "media saved");

        Ok(StoredMediaFile {
            base64: BASE64.encode(&written),
            size: written.len(),
            filename,
            path,
        })
    }
}

/// Download the attachment of an image message and persist it.
pub async fn acquire(
    session: &dyn Session,
    store: &MediaStore,
    message: &QualifiedMessage,
) -> Result<StoredMediaFile> {
    let bytes = session.download_media(&message.event).await?;
    debug!(message_id = %message.event.id, bytes = bytes.len(), "media downloaded");
    store.persist(&message.event.id, &bytes).await
}
