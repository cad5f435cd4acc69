use std::io::SeekFrom;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::Instrument;

use storage_driver::{
    ByteRange, Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer,
};

/// Storage driver rooted at a directory on the local filesystem.
///
/// Uploads are written to a temporary file beside the destination and then
/// renamed into place.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Store buckets as subdirectories of `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path.push(remote);
        path
    }

    fn io_error(&self, bucket: &str, remote: &Utf8Path, context: &str, err: std::io::Error) -> StorageError {
        StorageError::builder(self.name(), StorageErrorKind::from_io(&err), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context)
            .build()
    }

    async fn open(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<tokio::io::BufReader<tokio::fs::File>, StorageError> {
        let path = self.path(bucket, remote);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "open remote file", err))?;
        Ok(tokio::io::BufReader::new(file))
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "metadata", err))?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|err| self.io_error(bucket, remote, "created timestamp", err))?;
        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "remove_file", err))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        let parent = path
            .parent()
            .ok_or_else(|| eyre::eyre!("no parent directory for {path}"))
            .map_err(StorageError::with(self.name(), StorageErrorKind::InvalidRequest))?
            .to_owned();

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|err| self.io_error(bucket, remote, "create_dir_all", err))?;

        let staging = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&parent)
            .map_err(|err| self.io_error(bucket, remote, "create staging file", err))?;
        let (file, staged) = staging.into_parts();

        let mut writer = tokio::io::BufWriter::new(tokio::fs::File::from_std(file));
        tokio::io::copy(local, &mut writer)
            .await
            .map_err(|err| self.io_error(bucket, remote, "copy", err))?;
        writer
            .shutdown()
            .await
            .map_err(|err| self.io_error(bucket, remote, "shutdown writer", err))?;

        staged
            .persist(&path)
            .map_err(|err| self.io_error(bucket, remote, "rename into place", err.error))?;
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open(bucket, remote).await?;

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(|err| self.io_error(bucket, remote, "copy", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn download_range(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        range: ByteRange,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open(bucket, remote).await?;
        reader
            .seek(SeekFrom::Start(range.offset))
            .await
            .map_err(|err| self.io_error(bucket, remote, "seek", err))?;

        let copied = match range.length {
            Some(length) => tokio::io::copy(&mut (&mut reader).take(length), local).await,
            None => tokio::io::copy(&mut reader, local).await,
        };
        copied.map_err(|err| self.io_error(bucket, remote, "copy range", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let mut root = self.root.join(bucket);
        root.push("b");
        let mut target = root.clone();
        if let Some(part) = prefix {
            target.push(part);
        }

        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &target))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

/// Every file under `target`, as paths relative to `root`.
#[tracing::instrument]
fn collect_list(root: &Utf8Path, target: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    visit(target, &mut files)?;

    Ok(files
        .into_iter()
        .filter(|p| {
            !p.file_name()
                .is_some_and(|name| name.starts_with(".upload-"))
        })
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
