//! Repository-scoped stores over one storage bucket.
//!
//! A [`Registry`] owns the bucket and the deletion policy. Each [`Repository`]
//! hands out cheap store handles that share both.

use camino::Utf8Path;
use storage::{StorageError, StorageBucket};

use crate::digest::Digest;
use crate::error::{StoreError, StoreResult, not_found_as};
use crate::reference::RepositoryName;

mod blobs;
mod manifests;
pub(crate) mod paths;
mod revisions;
mod tags;
mod uploads;

pub use self::blobs::{BLOB_MEDIA_TYPE, BlobReader, BlobStore, Descriptor};
pub use self::manifests::ManifestStore;
pub use self::revisions::{Revision, RevisionStore};
pub use self::tags::TagStore;
pub use self::uploads::{Upload, UploadStore};

/// The registry's view of its storage bucket.
#[derive(Debug, Clone)]
pub struct Registry {
    bucket: StorageBucket,
    delete_enabled: bool,
}

impl Registry {
    /// A registry over `bucket` with deletion disabled.
    pub fn new(bucket: StorageBucket) -> Self {
        Self {
            bucket,
            delete_enabled: false,
        }
    }

    /// Allow or forbid blob deletion.
    pub fn with_delete_enabled(mut self, enabled: bool) -> Self {
        self.delete_enabled = enabled;
        self
    }

    /// Whether blob deletion is allowed.
    pub fn delete_enabled(&self) -> bool {
        self.delete_enabled
    }

    /// Open a repository. Repositories exist implicitly.
    pub fn repository(&self, name: RepositoryName) -> Repository {
        Repository {
            name,
            bucket: self.bucket.clone(),
            delete_enabled: self.delete_enabled,
        }
    }
}

/// One named repository.
#[derive(Debug, Clone)]
pub struct Repository {
    name: RepositoryName,
    bucket: StorageBucket,
    delete_enabled: bool,
}

impl Repository {
    /// The repository name.
    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    /// Layer blobs linked into this repository.
    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(self.name.clone(), self.bucket.clone(), self.delete_enabled)
    }

    /// Manifest revisions and tags.
    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(self.name.clone(), self.blobs(), self.tags())
    }

    /// Tags, without the manifest layer on top.
    pub fn tags(&self) -> TagStore {
        TagStore::new(self.name.clone(), self.bucket.clone())
    }

    /// Blob upload sessions.
    pub fn uploads(&self) -> UploadStore {
        UploadStore::new(self.name.clone(), self.bucket.clone(), self.blobs())
    }
}

/// Read a whole object into memory.
pub(crate) async fn read_object(
    bucket: &StorageBucket,
    path: &Utf8Path,
) -> Result<Vec<u8>, StorageError> {
    let mut data = Vec::new();
    bucket.download(path, &mut data).await?;
    Ok(data)
}

/// Write a whole object, replacing any previous content.
pub(crate) async fn write_object(
    bucket: &StorageBucket,
    path: &Utf8Path,
    data: &[u8],
) -> Result<(), StorageError> {
    let mut reader = data;
    bucket.upload(path, &mut reader).await
}

/// Read a link file holding a digest.
pub(crate) async fn read_link(
    bucket: &StorageBucket,
    path: &Utf8Path,
    missing: impl FnOnce() -> StoreError,
) -> StoreResult<Digest> {
    let data = read_object(bucket, path)
        .await
        .map_err(|err| not_found_as(err, missing))?;

    String::from_utf8_lossy(&data)
        .trim()
        .parse()
        .map_err(|source| StoreError::InvalidLink {
            path: path.to_string(),
            source,
        })
}

/// Point a link file at `digest`.
pub(crate) async fn write_link(
    bucket: &StorageBucket,
    path: &Utf8Path,
    digest: &Digest,
) -> Result<(), StorageError> {
    write_object(bucket, path, digest.to_string().as_bytes()).await
}

#[cfg(test)]
pub(crate) mod fixtures {
    use storage::MemoryStorage;

    use super::*;

    pub(crate) fn registry(delete_enabled: bool) -> Registry {
        let storage: storage::Storage = MemoryStorage::with_buckets(&["registry"]).into();
        Registry::new(storage.bucket("registry")).with_delete_enabled(delete_enabled)
    }

    pub(crate) fn repository(name: &str, delete_enabled: bool) -> Repository {
        registry(delete_enabled).repository(RepositoryName::parse(name).unwrap())
    }
}
