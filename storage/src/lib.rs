//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{
    ByteRange, Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer,
};

/// Which backend to build, as read from configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep everything in memory, pre-creating one bucket.
    Memory {
        /// The bucket to create.
        bucket: String,
    },

    /// Store objects under a directory on the local filesystem.
    #[cfg(feature = "local")]
    Local {
        /// Root directory; buckets are subdirectories.
        path: Utf8PathBuf,
    },

    /// Store objects in a temporary directory removed on drop.
    #[cfg(feature = "tmp")]
    Temp,
}

impl StorageConfig {
    /// Construct the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "tmp")]
            StorageConfig::Temp => TempDriver::new()
                .map_err(|err| StorageError::io("temp", err))?
                .into(),
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A shared handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The driver name.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle bound to one bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// A storage handle bound to a single bucket. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name.
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// The driver name.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Get an object's metadata.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Stream an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Stream part of an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn download_range<'d, W>(
        &'d self,
        remote: &Utf8Path,
        range: ByteRange,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, ?range, "Downloading range from: {}/{remote}", self.bucket);
        self.driver
            .download_range(&self.bucket, remote, range, writer)
            .await
    }

    /// Write an object from `reader`.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// List objects, optionally under a prefix.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Delete an object.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=%self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_config_builds_a_bucket() {
        let storage = StorageConfig::Memory {
            bucket: "registry".into(),
        }
        .build()
        .await
        .unwrap();
        assert_eq!(storage.name(), "memory");

        let bucket = storage.bucket("registry");
        let mut data: &[u8] = b"payload";
        bucket
            .upload(Utf8Path::new("a/b"), &mut data)
            .await
            .unwrap();

        let mut out = Vec::new();
        bucket
            .download_range(Utf8Path::new("a/b"), ByteRange::new(3, 4), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"load");
    }
}
