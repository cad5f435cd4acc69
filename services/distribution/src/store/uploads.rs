//! Monolithic blob upload sessions.

use chrono::{DateTime, Utc};
use storage::StorageBucket;
use uuid::Uuid;

use super::{BlobStore, Descriptor, paths, write_object};
use crate::digest::Digest;
use crate::error::{StoreError, StoreResult, not_found_as};
use crate::reference::RepositoryName;

/// An open blob upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Session id, a v4 UUID.
    pub id: String,
    /// When the session was opened.
    pub started: DateTime<Utc>,
}

/// Upload sessions for one repository.
///
/// Sessions live in storage as marker objects so that any server sharing the
/// bucket can complete them. Content arrives in one piece on completion.
#[derive(Debug, Clone)]
pub struct UploadStore {
    repository: RepositoryName,
    bucket: StorageBucket,
    blobs: BlobStore,
}

impl UploadStore {
    pub(crate) fn new(repository: RepositoryName, bucket: StorageBucket, blobs: BlobStore) -> Self {
        Self {
            repository,
            bucket,
            blobs,
        }
    }

    /// Open a new session.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn start(&self) -> StoreResult<Upload> {
        let upload = Upload {
            id: Uuid::new_v4().to_string(),
            started: Utc::now(),
        };
        let marker = paths::upload_started(&self.repository, &upload.id);
        write_object(&self.bucket, &marker, upload.started.to_rfc3339().as_bytes()).await?;
        tracing::debug!(id=%upload.id, "upload started");
        Ok(upload)
    }

    /// Look up an open session.
    pub async fn status(&self, id: &str) -> StoreResult<Upload> {
        let id = session_id(id)?;
        let metadata = self
            .bucket
            .metadata(&paths::upload_started(&self.repository, &id))
            .await
            .map_err(|err| not_found_as(err, || StoreError::UploadUnknown(id.clone())))?;

        Ok(Upload {
            id,
            started: metadata.created,
        })
    }

    /// Finish a session with the full blob content.
    ///
    /// A digest mismatch leaves the session open so the client may retry.
    #[tracing::instrument(skip(self, data), fields(repository=%self.repository, size=data.len()))]
    pub async fn complete(&self, id: &str, claimed: &Digest, data: &[u8]) -> StoreResult<Descriptor> {
        let upload = self.status(id).await?;
        let descriptor = self.blobs.put_verified(claimed, data).await?;
        self.remove(&upload.id).await?;
        Ok(descriptor)
    }

    /// Abandon a session.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn cancel(&self, id: &str) -> StoreResult<()> {
        let id = session_id(id)?;
        self.remove(&id).await
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        self.bucket
            .delete(&paths::upload_started(&self.repository, id))
            .await
            .map_err(|err| not_found_as(err, || StoreError::UploadUnknown(id.to_string())))
    }
}

/// Only ids this store could have issued name a session.
fn session_id(id: &str) -> StoreResult<String> {
    Uuid::parse_str(id)
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|_| StoreError::UploadUnknown(id.to_string()))
}
