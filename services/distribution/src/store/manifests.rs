//! The manifest store and its pre-store verification.

use super::{BlobStore, Revision, RevisionStore, TagStore};
use crate::digest::Digest;
use crate::errcode::{Detail, ErrorCode, Errors};
use crate::error::{StoreError, StoreResult};
use crate::reference::RepositoryName;
use crate::schema::SignedManifest;

/// Signed manifests of one repository: append-only revisions plus tags.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    repository: RepositoryName,
    blobs: BlobStore,
    revisions: RevisionStore,
    tags: TagStore,
}

impl ManifestStore {
    pub(crate) fn new(repository: RepositoryName, blobs: BlobStore, tags: TagStore) -> Self {
        Self {
            repository,
            revisions: RevisionStore::new(blobs.clone()),
            blobs,
            tags,
        }
    }

    /// Whether a revision exists.
    pub async fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        tracing::debug!("manifests: exists");
        self.revisions.exists(digest).await
    }

    /// Fetch a revision by digest.
    pub async fn get(&self, digest: &Digest) -> StoreResult<SignedManifest> {
        tracing::debug!("manifests: get");
        self.revisions.get(digest).await
    }

    /// All tags in the repository.
    pub async fn tags(&self) -> StoreResult<Vec<String>> {
        tracing::debug!("manifests: tags");
        self.tags.list().await
    }

    /// Whether `tag` is set.
    pub async fn exists_by_tag(&self, tag: &str) -> StoreResult<bool> {
        tracing::debug!("manifests: exists by tag");
        self.tags.exists(tag).await
    }

    /// The digest `tag` points at.
    pub async fn resolve(&self, tag: &str) -> StoreResult<Digest> {
        self.tags.resolve(tag).await
    }

    /// Fetch the revision `tag` points at.
    pub async fn get_by_tag(&self, tag: &str) -> StoreResult<SignedManifest> {
        tracing::debug!("manifests: get by tag");
        let digest = self.tags.resolve(tag).await?;
        self.revisions.get(&digest).await
    }

    /// Store a revision and point the manifest's own tag at it.
    ///
    /// Run [`ManifestStore::verify`] first; nothing is checked here.
    #[tracing::instrument(skip_all, fields(repository=%self.repository, tag=%manifest.manifest.tag))]
    pub async fn put(&self, manifest: &SignedManifest) -> StoreResult<Revision> {
        let revision = self.revisions.put(manifest).await?;
        self.tags.tag(&manifest.manifest.tag, &revision.digest).await?;
        Ok(revision)
    }

    /// Revisions are append-only; this always fails.
    pub async fn delete(&self, digest: &Digest) -> StoreResult<()> {
        tracing::debug!(%digest, "manifests: delete unsupported");
        Err(StoreError::Unsupported("deletion of manifests"))
    }

    /// Check a manifest before it is stored.
    ///
    /// Every check runs; the result holds one error per problem found and is
    /// empty when the manifest may be stored.
    #[tracing::instrument(skip_all, fields(repository=%self.repository, name=%manifest.manifest.name))]
    pub async fn verify(&self, manifest: &SignedManifest) -> Errors {
        let mut errors = Errors::new();

        if manifest.manifest.name != self.repository.as_str() {
            errors.push_detail(
                ErrorCode::NameInvalid,
                "repository name does not match manifest name",
            );
        }

        if let Err(err) = manifest.verify() {
            tracing::debug!("manifest signature rejected: {err}");
            errors.push(ErrorCode::ManifestUnverified);
        }

        for layer in &manifest.manifest.fs_layers {
            match self.blobs.stat(&layer.blob_sum).await {
                Ok(_) => {}
                Err(StoreError::BlobUnknown(digest)) => {
                    errors.push_detail(ErrorCode::BlobUnknown, &digest);
                }
                Err(err) => {
                    // A layer that cannot be checked counts as unknown too.
                    tracing::warn!(digest=%layer.blob_sum, "checking layer failed: {err}");
                    errors.push_detail(ErrorCode::Unknown, Detail::error(&err));
                    errors.push_detail(ErrorCode::BlobUnknown, &layer.blob_sum);
                }
            }
        }

        errors
    }
}
