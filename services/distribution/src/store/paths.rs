//! Object layout within the registry bucket.
//!
//! ```text
//! blobs/<alg>/<hex[..2]>/<hex>/data
//! repositories/<name>/_layers/<alg>/<hex>/link
//! repositories/<name>/_manifests/tags/<tag>/current/link
//! repositories/<name>/_uploads/<uuid>/startedat
//! ```

use camino::Utf8PathBuf;

use crate::digest::Digest;
use crate::reference::RepositoryName;

/// Shared content-addressed data for `digest`.
pub(crate) fn blob_data(digest: &Digest) -> Utf8PathBuf {
    let hex = digest.hex();
    let prefix = hex.get(..2).unwrap_or(hex);
    Utf8PathBuf::from(format!(
        "blobs/{}/{prefix}/{hex}/data",
        digest.algorithm()
    ))
}

fn repository(name: &RepositoryName) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("repositories/{name}"))
}

/// Link making `digest` visible in repository `name`.
pub(crate) fn layer_link(name: &RepositoryName, digest: &Digest) -> Utf8PathBuf {
    repository(name).join(format!("_layers/{}/{}/link", digest.algorithm(), digest.hex()))
}

/// Directory holding every tag of repository `name`.
pub(crate) fn tags_root(name: &RepositoryName) -> Utf8PathBuf {
    repository(name).join("_manifests/tags")
}

/// Current-revision link for `tag`.
pub(crate) fn tag_current(name: &RepositoryName, tag: &str) -> Utf8PathBuf {
    tags_root(name).join(format!("{tag}/current/link"))
}

/// Marker recording when upload `id` started.
pub(crate) fn upload_started(name: &RepositoryName, id: &str) -> Utf8PathBuf {
    repository(name).join(format!("_uploads/{id}/startedat"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> RepositoryName {
        RepositoryName::parse("library/app").unwrap()
    }

    #[test]
    fn test_blob_paths() {
        let digest = Digest::from_bytes(b"");
        assert_eq!(
            blob_data(&digest).as_str(),
            "blobs/sha256/e3/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855/data"
        );
    }

    #[test]
    fn test_layer_paths() {
        let digest = Digest::from_bytes(b"");
        assert_eq!(
            layer_link(&name(), &digest).as_str(),
            "repositories/library/app/_layers/sha256/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855/link"
        );
    }

    #[test]
    fn test_tag_paths() {
        assert_eq!(
            tag_current(&name(), "latest").as_str(),
            "repositories/library/app/_manifests/tags/latest/current/link"
        );
        assert!(tag_current(&name(), "latest").starts_with(tags_root(&name())));
    }

    #[test]
    fn test_upload_paths() {
        assert_eq!(
            upload_started(&name(), "abc").as_str(),
            "repositories/library/app/_uploads/abc/startedat"
        );
    }
}
