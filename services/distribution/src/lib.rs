//! # Content-addressed registry storage
//!
//! The storage core of a container image registry: immutable blobs addressed
//! by digest, signed manifests kept as append-only revisions, mutable tags,
//! and verification of manifests before they are accepted.
//!
//! The [`store`] module works directly against a `storage` bucket. The HTTP
//! API built by [`RegistryBuilder`] sits on top and reports failures with the
//! structured error envelope from [`errcode`].
//!
//! ## Example
//!
//! ```no_run
//! use distribution::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
pub mod config;
mod context;
pub mod digest;
pub mod errcode;
mod error;
mod manifest;
pub mod reference;
pub mod schema;
pub mod store;

pub use api::{
    API_VERSION, API_VERSION_HEADER, BuildError, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID,
    RegistryBuilder,
};
pub use config::RegistryConfig;
pub use context::RequestContext;
pub use digest::Digest;
pub use errcode::{ErrorCode, ErrorCodes, Errors};
pub use error::{StoreError, StoreResult};
