//! Manifest revisions stored as repository blobs.

use super::BlobStore;
use crate::digest::Digest;
use crate::error::{StoreError, StoreResult};
use crate::schema::SignedManifest;

/// A manifest as stored, identified by the digest of its canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Digest of the stored bytes.
    pub digest: Digest,
    /// The manifest.
    pub manifest: SignedManifest,
}

/// Immutable manifest revisions, kept as blobs of the repository.
///
/// No validation happens here; callers verify before storing.
#[derive(Debug, Clone)]
pub struct RevisionStore {
    blobs: BlobStore,
}

impl RevisionStore {
    pub(crate) fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    /// Whether a revision exists.
    pub async fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        self.blobs.exists(digest).await
    }

    /// Load and decode a revision.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, digest: &Digest) -> StoreResult<SignedManifest> {
        let data = self.blobs.get(digest).await?;
        serde_json::from_slice(&data).map_err(|source| StoreError::InvalidRevision {
            digest: digest.clone(),
            source,
        })
    }

    /// Store a manifest. Storing an identical manifest again is a no-op.
    #[tracing::instrument(skip_all, fields(name=%manifest.manifest.name, tag=%manifest.manifest.tag))]
    pub async fn put(&self, manifest: &SignedManifest) -> StoreResult<Revision> {
        let data = manifest.canonical_bytes()?;
        let descriptor = self.blobs.put(&data).await?;
        tracing::debug!(digest=%descriptor.digest, "stored manifest revision");

        Ok(Revision {
            digest: descriptor.digest,
            manifest: manifest.clone(),
        })
    }
}
