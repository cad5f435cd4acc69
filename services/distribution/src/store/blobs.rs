//! Content-addressed blobs linked into a repository.

use std::future::Future as _;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use camino::Utf8PathBuf;
use storage::{ByteRange, StorageBucket, StorageError};
use tokio::io::{self, AsyncRead, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use super::{paths, read_object, write_link, write_object};
use crate::digest::Digest;
use crate::error::{StoreError, StoreResult, not_found_as};
use crate::reference::RepositoryName;

/// Media type reported for raw blobs.
pub const BLOB_MEDIA_TYPE: &str = "application/octet-stream";

/// Capacity of the pipe between a blob download and its reader.
const PIPE_CAPACITY: usize = 64 * 1024;

/// What the registry knows about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Content digest.
    pub digest: Digest,
    /// Size in bytes.
    pub length: u64,
    /// Media type.
    pub media_type: String,
}

/// Content-addressed blobs visible to one repository.
#[derive(Debug, Clone)]
pub struct BlobStore {
    repository: RepositoryName,
    bucket: StorageBucket,
    delete_enabled: bool,
}

impl BlobStore {
    pub(crate) fn new(repository: RepositoryName, bucket: StorageBucket, delete_enabled: bool) -> Self {
        Self {
            repository,
            bucket,
            delete_enabled,
        }
    }

    /// Describe a blob linked into this repository.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn stat(&self, digest: &Digest) -> StoreResult<Descriptor> {
        let unknown = || StoreError::BlobUnknown(digest.clone());

        self.bucket
            .metadata(&paths::layer_link(&self.repository, digest))
            .await
            .map_err(|err| not_found_as(err, unknown))?;

        let metadata = self
            .bucket
            .metadata(&paths::blob_data(digest))
            .await
            .map_err(|err| not_found_as(err, unknown))?;

        Ok(Descriptor {
            digest: digest.clone(),
            length: metadata.size,
            media_type: BLOB_MEDIA_TYPE.into(),
        })
    }

    /// Whether a blob is linked into this repository.
    pub async fn exists(&self, digest: &Digest) -> StoreResult<bool> {
        match self.stat(digest).await {
            Ok(_) => Ok(true),
            Err(StoreError::BlobUnknown(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stream part or all of a blob.
    ///
    /// The download runs on its own task and is abandoned as soon as the
    /// returned reader is dropped.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn open(&self, digest: &Digest, range: ByteRange) -> StoreResult<BlobReader> {
        let descriptor = self.stat(digest).await?;
        let (mut writer, pipe) = io::duplex(PIPE_CAPACITY);

        let bucket = self.bucket.clone();
        let path = paths::blob_data(digest);
        let task = tokio::spawn(async move {
            let result = bucket.download_range(&path, range, &mut writer).await;
            if let Err(err) = &result {
                tracing::debug!(%path, "blob download ended early: {err}");
            }
            result
        });

        Ok(BlobReader {
            descriptor,
            pipe,
            task: Some(task),
        })
    }

    /// Read a whole blob into memory.
    pub async fn get(&self, digest: &Digest) -> StoreResult<Bytes> {
        self.stat(digest).await?;
        let data = read_object(&self.bucket, &paths::blob_data(digest))
            .await
            .map_err(|err| not_found_as(err, || StoreError::BlobUnknown(digest.clone())))?;
        Ok(data.into())
    }

    /// Store `data` under its SHA-256 digest. Storing the same bytes again is a no-op.
    pub async fn put(&self, data: &[u8]) -> StoreResult<Descriptor> {
        self.store(Digest::from_bytes(data), data).await
    }

    /// Store `data`, which the client claims hashes to `claimed`.
    pub async fn put_verified(&self, claimed: &Digest, data: &[u8]) -> StoreResult<Descriptor> {
        let actual = Digest::compute(claimed.algorithm(), data);
        if &actual != claimed {
            return Err(StoreError::DigestMismatch {
                expected: claimed.clone(),
                actual,
            });
        }
        self.store(actual, data).await
    }

    #[tracing::instrument(skip(self, data), fields(repository=%self.repository, size=data.len()))]
    async fn store(&self, digest: Digest, data: &[u8]) -> StoreResult<Descriptor> {
        let blob = paths::blob_data(&digest);
        if !exists(&self.bucket, &blob).await? {
            tracing::debug!(%digest, "writing blob data");
            write_object(&self.bucket, &blob, data).await?;
        }

        let link = paths::layer_link(&self.repository, &digest);
        if !exists(&self.bucket, &link).await? {
            write_link(&self.bucket, &link, &digest).await?;
        }

        Ok(Descriptor {
            digest,
            length: data.len() as u64,
            media_type: BLOB_MEDIA_TYPE.into(),
        })
    }

    /// Unlink a blob from this repository.
    ///
    /// The shared data stays in place for other repositories.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn delete(&self, digest: &Digest) -> StoreResult<()> {
        if !self.delete_enabled {
            return Err(StoreError::DeletionDisabled);
        }

        self.bucket
            .delete(&paths::layer_link(&self.repository, digest))
            .await
            .map_err(|err| not_found_as(err, || StoreError::BlobUnknown(digest.clone())))
    }
}

async fn exists(bucket: &StorageBucket, path: &Utf8PathBuf) -> Result<bool, StorageError> {
    match bucket.metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// A streaming read of one blob.
///
/// A storage failure while streaming surfaces as an I/O error at the point
/// the stream would otherwise have ended.
#[derive(Debug)]
pub struct BlobReader {
    descriptor: Descriptor,
    pipe: DuplexStream,
    task: Option<JoinHandle<Result<(), StorageError>>>,
}

impl BlobReader {
    /// The blob being read.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.pipe).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // End of pipe: the producer has finished, one way or another.
        if let Some(task) = this.task.as_mut() {
            let outcome = ready!(Pin::new(task).poll(cx));
            this.task = None;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Poll::Ready(Err(io::Error::other(err))),
                Err(err) => return Poll::Ready(Err(io::Error::other(err))),
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt as _;

    use super::*;
    use crate::store::fixtures::repository;

    #[tokio::test]
    async fn content_addressing() {
        let blobs = repository("app", false).blobs();
        let first = blobs.put(b"layer contents").await.unwrap();
        let second = blobs.put(b"layer contents").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.digest, Digest::from_bytes(b"layer contents"));
        assert_eq!(first.length, 14);

        let stat = blobs.stat(&first.digest).await.unwrap();
        assert_eq!(stat, first);

        let mut reader = blobs.open(&first.digest, ByteRange::full()).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"layer contents");
        assert_eq!(blobs.get(&first.digest).await.unwrap(), &b"layer contents"[..]);
    }

    #[tokio::test]
    async fn ranged_reads() {
        let blobs = repository("app", false).blobs();
        let desc = blobs.put(b"0123456789").await.unwrap();

        let mut reader = blobs.open(&desc.digest, ByteRange::new(2, 5)).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"23456");
        assert_eq!(reader.descriptor().length, 10);
    }

    #[tokio::test]
    async fn large_blobs_stream_through_the_pipe() {
        let blobs = repository("app", false).blobs();
        let data: Vec<u8> = (0..PIPE_CAPACITY * 3).map(|i| (i % 251) as u8).collect();
        let desc = blobs.put(&data).await.unwrap();

        let mut reader = blobs.open(&desc.digest, ByteRange::full()).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn dropping_the_reader_releases_the_download() {
        let blobs = repository("app", false).blobs();
        let data = vec![7u8; PIPE_CAPACITY * 4];
        let desc = blobs.put(&data).await.unwrap();

        let mut reader = blobs.open(&desc.digest, ByteRange::full()).await.unwrap();
        let mut head = [0u8; 16];
        reader.read_exact(&mut head).await.unwrap();
        drop(reader);

        // The blob is still readable afterwards.
        assert!(blobs.exists(&desc.digest).await.unwrap());
    }

    #[tokio::test]
    async fn not_found_symmetry() {
        let blobs = repository("app", true).blobs();
        let missing = Digest::from_bytes(b"never stored");

        assert!(matches!(blobs.stat(&missing).await, Err(StoreError::BlobUnknown(_))));
        assert!(matches!(
            blobs.open(&missing, ByteRange::full()).await,
            Err(StoreError::BlobUnknown(_))
        ));
        assert!(matches!(blobs.delete(&missing).await, Err(StoreError::BlobUnknown(_))));
        assert!(!blobs.exists(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn deletion_policy() {
        let disabled = repository("app", false).blobs();
        let desc = disabled.put(b"keep me").await.unwrap();
        assert!(matches!(
            disabled.delete(&desc.digest).await,
            Err(StoreError::DeletionDisabled)
        ));
        assert!(disabled.exists(&desc.digest).await.unwrap());

        let enabled = repository("app", true).blobs();
        let desc = enabled.put(b"remove me").await.unwrap();
        enabled.delete(&desc.digest).await.unwrap();
        assert!(matches!(
            enabled.stat(&desc.digest).await,
            Err(StoreError::BlobUnknown(_))
        ));
    }

    #[tokio::test]
    async fn blobs_are_scoped_to_a_repository() {
        let registry = crate::store::fixtures::registry(false);
        let app = registry.repository(RepositoryName::parse("app").unwrap());
        let other = registry.repository(RepositoryName::parse("other").unwrap());

        let desc = app.blobs().put(b"private layer").await.unwrap();
        assert!(!other.blobs().exists(&desc.digest).await.unwrap());

        other.blobs().put(b"private layer").await.unwrap();
        assert!(other.blobs().exists(&desc.digest).await.unwrap());
    }

    #[tokio::test]
    async fn verified_puts_reject_mismatches() {
        let blobs = repository("app", false).blobs();
        let claimed = Digest::from_bytes(b"what the client promised");
        let err = blobs.put_verified(&claimed, b"what it sent").await.unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { expected, .. } if expected == claimed));
        assert!(!blobs.exists(&claimed).await.unwrap());

        let sha512 = Digest::compute(crate::digest::Algorithm::Sha512, b"wide");
        let desc = blobs.put_verified(&sha512, b"wide").await.unwrap();
        assert_eq!(desc.digest, sha512);
        assert!(blobs.exists(&sha512).await.unwrap());
    }
}
