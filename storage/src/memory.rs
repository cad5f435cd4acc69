use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{
    ByteRange, Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer,
};

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Arc<[u8]>,
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data: data.into(),
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores objects in memory.
///
/// Uploads are buffered completely before they are inserted, so readers
/// never observe a partial object.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.insert(bucket, HashMap::new());
    }

    fn bucket_missing(&self, bucket: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("bucket not found: {bucket}"),
        )
        .bucket(bucket)
        .build()
    }

    fn path_missing(&self, bucket: &str, remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("path not found: {remote}"),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build()
    }

    /// Snapshot the bytes of an object so the lock is not held while streaming.
    async fn contents(&self, bucket: &str, remote: &Utf8Path) -> Result<Arc<[u8]>, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_missing(bucket))?;
        bucket_map
            .get(remote)
            .map(|item| item.data.clone())
            .ok_or_else(|| self.path_missing(bucket, remote))
    }
}

async fn write_all(
    engine: &'static str,
    data: &[u8],
    local: &mut Writer<'_>,
) -> Result<(), StorageError> {
    local
        .write_all(data)
        .await
        .map_err(|err| StorageError::io(engine, err))?;
    local
        .flush()
        .await
        .map_err(|err| StorageError::io(engine, err))
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_missing(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| self.path_missing(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.bucket_missing(bucket))?;
        bucket_map
            .remove(remote)
            .map(|_| ())
            .ok_or_else(|| self.path_missing(bucket, remote))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let data = self.contents(bucket, remote).await?;
        write_all(self.name(), &data, local).await
    }

    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        range: ByteRange,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let data = self.contents(bucket, remote).await?;
        let (start, end) = range.bounds(data.len() as u64);
        write_all(self.name(), &data[start as usize..end as usize], local).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let bucket_map = buckets
            .get(bucket)
            .ok_or_else(|| self.bucket_missing(bucket))?;

        let paths = bucket_map
            .keys()
            .filter(|path| prefix.is_none_or(|prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect();

        Ok(paths)
    }
}
