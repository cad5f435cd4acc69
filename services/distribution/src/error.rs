//! Error types for the registry stores

use storage::StorageErrorKind;

use crate::digest::{Digest, DigestError};
use crate::reference::NameError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures returned by the blob, revision, tag, manifest and upload stores.
///
/// Backend failures which correspond to a domain condition (a missing object,
/// a disabled operation) are translated into their own variant at the store
/// boundary; everything else stays wrapped in [`StoreError::Storage`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No blob with this digest is linked into the repository
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(Digest),

    /// Deletion is disabled by the registry's policy
    #[error("deletion is disabled")]
    DeletionDisabled,

    /// The tag has never been set in this repository
    #[error("unknown tag: {0}")]
    TagUnknown(String),

    /// The tag breaks the tag grammar and cannot name a link
    #[error(transparent)]
    InvalidTag(#[from] NameError),

    /// Content did not hash to the digest it was claimed to have
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest claimed by the client
        expected: Digest,
        /// Digest of the bytes actually received
        actual: Digest,
    },

    /// The operation is never supported at this layer
    #[error("{0} not supported")]
    Unsupported(&'static str),

    /// No upload session with this id exists in the repository
    #[error("blob upload unknown: {0}")]
    UploadUnknown(String),

    /// A stored revision could not be decoded
    #[error("invalid manifest revision {digest}: {source}")]
    InvalidRevision {
        /// The revision digest
        digest: Digest,
        /// The decode failure
        #[source]
        source: serde_json::Error,
    },

    /// A link file did not contain a digest
    #[error("invalid link at {path}: {source}")]
    InvalidLink {
        /// The link path
        path: String,
        /// The parse failure
        #[source]
        source: DigestError,
    },

    /// A manifest could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend failed for a reason with no domain meaning
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

impl StoreError {
    /// Whether this error means "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::BlobUnknown(_)
            | StoreError::TagUnknown(_)
            | StoreError::UploadUnknown(_) => true,
            StoreError::Storage(err) => err.kind() == StorageErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Map a backend `NotFound` to a domain error, passing everything else through.
pub(crate) fn not_found_as(
    err: storage::StorageError,
    missing: impl FnOnce() -> StoreError,
) -> StoreError {
    if err.is_not_found() {
        missing()
    } else {
        StoreError::Storage(err)
    }
}
