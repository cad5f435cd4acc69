//! Registry configuration file.
//!
//! ```toml
//! bucket = "registry"
//!
//! [storage.local]
//! path = "/var/lib/registry"
//!
//! [delete]
//! enabled = false
//!
//! [http]
//! addr = "127.0.0.1:5000"
//! ```

use std::net::SocketAddr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::StorageConfig;

/// Bucket used when the configuration names none.
pub const DEFAULT_BUCKET: &str = "registry";

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// The configuration path.
        path: Utf8PathBuf,
        /// The read failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[error("parsing {path}: {source}")]
    Parse {
        /// The configuration path.
        path: Utf8PathBuf,
        /// The parse failure.
        #[source]
        source: toml::de::Error,
    },
}

/// Top level registry configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Storage backend.
    pub storage: StorageConfig,

    /// Bucket within the backend.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Deletion policy.
    #[serde(default)]
    pub delete: DeleteConfig,

    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

/// Whether blobs may be deleted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DeleteConfig {
    /// Off unless set.
    #[serde(default)]
    pub enabled: bool,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    /// Address to listen on.
    #[serde(default = "HttpConfig::default_addr")]
    pub addr: SocketAddr,
}

impl HttpConfig {
    fn default_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5000))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
        }
    }
}

impl RegistryConfig {
    /// Parse a configuration document.
    pub fn parse(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    /// Load a configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&document).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = RegistryConfig::parse(
            r#"
            [storage.memory]
            bucket = "registry"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.storage,
            StorageConfig::Memory {
                bucket: "registry".into()
            }
        );
        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert!(!config.delete.enabled);
        assert_eq!(config.http.addr, "127.0.0.1:5000".parse().unwrap());
    }

    #[test]
    fn full_config() {
        let config = RegistryConfig::parse(
            r#"
            bucket = "images"

            [storage.local]
            path = "/srv/registry"

            [delete]
            enabled = true

            [http]
            addr = "0.0.0.0:8080"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.storage,
            StorageConfig::Local {
                path: "/srv/registry".into()
            }
        );
        assert_eq!(config.bucket, "images");
        assert!(config.delete.enabled);
        assert_eq!(config.http.addr.port(), 8080);
    }

    #[test]
    fn missing_storage_is_an_error() {
        assert!(RegistryConfig::parse("bucket = \"x\"").is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let err = RegistryConfig::load(Utf8Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
