//! API server builder and router

use axum::Router;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Json;
use axum::routing::get;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::RegistryConfig;
use crate::store::Registry;

/// Header announcing the API version on every response.
pub const API_VERSION_HEADER: HeaderName = HeaderName::from_static("docker-distribution-api-version");

/// The API version this registry speaks.
pub const API_VERSION: &str = "registry/2.0";

/// Header carrying the digest of returned or stored content.
pub const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// Header carrying an upload session id.
pub const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Errors building a registry service.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No storage backend was given.
    #[error("storage backend must be configured")]
    MissingStorage,

    /// The configured storage backend could not be created.
    #[error("storage backend: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Registry builder for configuring and creating the registry service
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    delete_enabled: bool,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a builder from a loaded configuration file
    pub async fn from_config(config: RegistryConfig) -> Result<Self, BuildError> {
        let storage = config.storage.build().await?;
        Ok(Self::new()
            .storage(storage)
            .bucket(config.bucket)
            .delete_enabled(config.delete.enabled))
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Allow blobs to be deleted. Off by default.
    pub fn delete_enabled(mut self, enabled: bool) -> Self {
        self.delete_enabled = enabled;
        self
    }

    /// Build the store handle without the HTTP layer
    pub fn registry(self) -> Result<Registry, BuildError> {
        let storage = self.storage.ok_or(BuildError::MissingStorage)?;
        let bucket = self
            .bucket
            .unwrap_or_else(|| crate::config::DEFAULT_BUCKET.to_string());
        tracing::debug!(driver = storage.name(), %bucket, delete_enabled = self.delete_enabled, "building registry");

        Ok(Registry::new(storage.bucket(bucket)).with_delete_enabled(self.delete_enabled))
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Result<Router, BuildError> {
        let registry = self.registry()?;

        Ok(Router::new()
            .route("/v2/", get(api_version_check))
            .merge(crate::blob::router())
            .merge(crate::manifest::router())
            .with_state(registry)
            .layer(SetResponseHeaderLayer::overriding(
                API_VERSION_HEADER,
                HeaderValue::from_static(API_VERSION),
            )))
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}
