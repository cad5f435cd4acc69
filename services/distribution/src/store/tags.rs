//! Tag links.

use camino::{Utf8Path, Utf8PathBuf};
use storage::StorageBucket;

use super::{paths, read_link, write_link};
use crate::digest::Digest;
use crate::error::{StoreError, StoreResult};
use crate::reference::{RepositoryName, validate_tag};

/// Mutable tag pointers for one repository.
///
/// Tags are plain link files. Concurrent writers race and the last one wins.
#[derive(Debug, Clone)]
pub struct TagStore {
    repository: RepositoryName,
    bucket: StorageBucket,
}

impl TagStore {
    pub(crate) fn new(repository: RepositoryName, bucket: StorageBucket) -> Self {
        Self { repository, bucket }
    }

    /// Link path for `tag`, refusing anything outside the tag grammar.
    fn current(&self, tag: &str) -> StoreResult<Utf8PathBuf> {
        validate_tag(tag)?;
        Ok(paths::tag_current(&self.repository, tag))
    }

    /// Point `tag` at `digest`.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn tag(&self, tag: &str, digest: &Digest) -> StoreResult<()> {
        let path = self.current(tag)?;
        write_link(&self.bucket, &path, digest).await?;
        Ok(())
    }

    /// The digest `tag` currently points at.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn resolve(&self, tag: &str) -> StoreResult<Digest> {
        let path = self.current(tag)?;
        read_link(&self.bucket, &path, || StoreError::TagUnknown(tag.to_string())).await
    }

    /// Whether `tag` has been set.
    pub async fn exists(&self, tag: &str) -> StoreResult<bool> {
        let path = self.current(tag)?;
        match self.bucket.metadata(&path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Every tag in the repository, sorted. Each call lists afresh.
    #[tracing::instrument(skip(self), fields(repository=%self.repository))]
    pub async fn list(&self) -> StoreResult<Vec<String>> {
        let root = paths::tags_root(&self.repository);
        let files = self.bucket.list(Some(root.as_path())).await?;

        let mut tags: Vec<String> = files
            .iter()
            .filter_map(|file| {
                let relative = Utf8Path::new(file).strip_prefix(&root).ok()?;
                let mut components = relative.components();
                let tag = components.next()?.as_str();
                let rest: Vec<_> = components.map(|c| c.as_str()).collect();
                (rest == ["current", "link"]).then(|| tag.to_string())
            })
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}
