//! The signed image manifest document.
//!
//! A manifest names a repository and tag, lists the layer digests of an image
//! and carries one or more detachable Ed25519 signatures. Each signature covers
//! the JSON serialization of the unsigned [`Manifest`] and embeds the public
//! key it was made with as an OKP JSON web key.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// The only manifest schema version this registry accepts.
pub const SCHEMA_VERSION: u32 = 1;

/// Media type of a signed manifest.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// JWS algorithm identifier for Ed25519 signatures.
const ALGORITHM: &str = "EdDSA";

/// The unsigned manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// The repository this manifest belongs to.
    pub name: String,

    /// The tag this manifest is pushed under.
    pub tag: String,

    /// Target architecture of the image.
    pub architecture: String,

    /// Layer references, topmost first.
    pub fs_layers: Vec<FsLayer>,

    /// Opaque per-layer history entries.
    pub history: Vec<History>,
}

impl Manifest {
    /// A manifest with no layers.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
            tag: tag.into(),
            architecture: "amd64".into(),
            fs_layers: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Add a layer, with an empty history entry.
    pub fn with_layer(mut self, digest: Digest) -> Self {
        self.fs_layers.push(FsLayer { blob_sum: digest });
        self.history.push(History {
            v1_compatibility: "{}".into(),
        });
        self
    }
}

/// A reference to one layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    /// Digest of the layer blob.
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

/// Legacy image configuration for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// Raw v1 image JSON.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Why a manifest's signatures could not be trusted.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The manifest carries no signatures.
    #[error("manifest has no signatures")]
    MissingSignature,

    /// The embedded key is not a usable Ed25519 key.
    #[error("malformed signature key: {0}")]
    MalformedKey(String),

    /// The signature bytes could not be decoded.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The signature does not match the payload.
    #[error("invalid signature")]
    InvalidSignature,

    /// The signed payload could not be produced.
    #[error("signed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Public half of an Ed25519 key as a JSON web key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, `OKP`.
    pub kty: String,
    /// Curve, `Ed25519`.
    pub crv: String,
    /// Base64url public key bytes.
    pub x: String,
}

impl Jwk {
    fn from_key(key: &VerifyingKey) -> Self {
        Self {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
        }
    }

    fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(SignatureError::MalformedKey(format!(
                "unsupported key {}/{}",
                self.kty, self.crv
            )));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|err| SignatureError::MalformedKey(err.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::MalformedKey("key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|err| SignatureError::MalformedKey(err.to_string()))
    }
}

/// Protected information about a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHeader {
    /// The signer's public key.
    pub jwk: Jwk,
    /// Signature algorithm, `EdDSA`.
    pub alg: String,
}

/// One detachable signature over the manifest payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    /// Key and algorithm.
    pub header: SignatureHeader,
    /// Base64url signature bytes.
    pub signature: String,
}

impl ManifestSignature {
    fn verify(&self, payload: &[u8]) -> Result<VerifyingKey, SignatureError> {
        if self.header.alg != ALGORITHM {
            return Err(SignatureError::MalformedKey(format!(
                "unsupported algorithm {}",
                self.header.alg
            )));
        }

        let key = self.header.jwk.verifying_key()?;
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.signature)
            .map_err(|err| SignatureError::MalformedSignature(err.to_string()))?;
        let signature = ed25519_dalek::Signature::from_slice(&bytes)
            .map_err(|err| SignatureError::MalformedSignature(err.to_string()))?;

        key.verify_strict(payload, &signature)
            .map_err(|_| SignatureError::InvalidSignature)?;
        Ok(key)
    }
}

/// A manifest together with its signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedManifest {
    /// The signed document.
    #[serde(flatten)]
    pub manifest: Manifest,

    /// Signatures over [`SignedManifest::payload`].
    #[serde(default)]
    pub signatures: Vec<ManifestSignature>,
}

impl SignedManifest {
    /// Sign `manifest` with `key`.
    pub fn sign(manifest: Manifest, key: &SigningKey) -> Result<Self, SignatureError> {
        let mut signed = Self {
            manifest,
            signatures: Vec::new(),
        };
        signed.add_signature(key)?;
        Ok(signed)
    }

    /// Add another signature made with `key`.
    pub fn add_signature(&mut self, key: &SigningKey) -> Result<(), SignatureError> {
        let payload = self.payload()?;
        let signature = key.sign(&payload);
        self.signatures.push(ManifestSignature {
            header: SignatureHeader {
                jwk: Jwk::from_key(&key.verifying_key()),
                alg: ALGORITHM.into(),
            },
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        });
        Ok(())
    }

    /// The bytes every signature covers.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.manifest)
    }

    /// Check every signature, returning the keys which signed.
    ///
    /// At least one signature is required, and all of them must verify.
    pub fn verify(&self) -> Result<Vec<VerifyingKey>, SignatureError> {
        if self.signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }

        let payload = self.payload()?;
        self.signatures
            .iter()
            .map(|signature| signature.verify(&payload))
            .collect()
    }

    /// The stored form of this manifest, whose digest identifies the revision.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Digest of [`SignedManifest::canonical_bytes`].
    pub fn digest(&self) -> Result<Digest, serde_json::Error> {
        Ok(Digest::from_bytes(&self.canonical_bytes()?))
    }
}
