use std::fmt;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::StorageError;
use crate::range::{ByteRange, RangeWriter};

/// A reader stream for object contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for object contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// Object metadata common to every driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// When the object was written.
    pub created: DateTime<Utc>,
}

/// A storage driver: the durable byte store under a registry.
///
/// Drivers must make `upload` atomic from a reader's point of view: a
/// concurrent `metadata` or `download` either sees the object as missing or
/// sees all of it.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver, used in errors and spans.
    fn name(&self) -> &'static str;

    /// Delete an object. Missing objects are a `NotFound` error.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for an object.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Write an object, replacing any existing one at the same path.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Stream an object into a writer.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// Stream part of an object into a writer.
    ///
    /// The default implementation drives a full `download` through a window,
    /// which is correct for every driver but reads bytes outside the range.
    /// Drivers with native seeking should override it.
    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        range: ByteRange,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        tracing::trace!(%remote, ?range, "ranged download through full stream");
        let mut window = RangeWriter::new(writer, range);
        self.download(bucket, remote, &mut window).await
    }

    /// List the objects in a bucket, optionally filtered by a path prefix.
    ///
    /// Returned paths are relative to the bucket root.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}
