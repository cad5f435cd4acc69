//! The registry's API error model.
//!
//! Every failure reported over HTTP is an [`ApiError`] carrying an
//! [`ErrorCode`]. Handlers accumulate them in an [`Errors`] envelope so that a
//! single response can report every problem found while processing a request.
//!
//! Codes travel on the wire by their string identifier (`BLOB_UNKNOWN`, ...).
//! The enum discriminants are internal and are never serialized.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A registry API error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Catch-all for errors not defined below.
    #[default]
    Unknown,
    /// The operation is not supported.
    Unsupported,
    /// The request is not authorized.
    Unauthorized,
    /// The operation has been disabled by policy.
    Disabled,
    /// The digest did not match the content, or could not be parsed.
    DigestInvalid,
    /// The declared size did not match the content.
    SizeInvalid,
    /// The manifest name did not match the repository.
    NameInvalid,
    /// The manifest tag did not match the reference.
    TagInvalid,
    /// The repository is not known to the registry.
    NameUnknown,
    /// The manifest is not known to the registry.
    ManifestUnknown,
    /// The manifest failed validation.
    ManifestInvalid,
    /// The manifest signature could not be verified.
    ManifestUnverified,
    /// The blob is not known to the registry.
    BlobUnknown,
    /// The upload session is not known to the registry.
    BlobUploadUnknown,
    /// The upload session is invalid.
    BlobUploadInvalid,
}

/// The wire identity and fixed message of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// The code being described.
    pub code: ErrorCode,
    /// The stable string identifier used on the wire.
    pub value: &'static str,
    /// The human readable message bound to the code.
    pub message: &'static str,
}

/// Descriptors in discriminant order.
static DESCRIPTORS: [ErrorDescriptor; 15] = [
    ErrorDescriptor {
        code: ErrorCode::Unknown,
        value: "UNKNOWN",
        message: "unknown error",
    },
    ErrorDescriptor {
        code: ErrorCode::Unsupported,
        value: "UNSUPPORTED",
        message: "The operation is unsupported.",
    },
    ErrorDescriptor {
        code: ErrorCode::Unauthorized,
        value: "UNAUTHORIZED",
        message: "access to the requested resource is not authorized",
    },
    ErrorDescriptor {
        code: ErrorCode::Disabled,
        value: "DISABLED",
        message: "the requested operation has been disabled",
    },
    ErrorDescriptor {
        code: ErrorCode::DigestInvalid,
        value: "DIGEST_INVALID",
        message: "provided digest did not match uploaded content",
    },
    ErrorDescriptor {
        code: ErrorCode::SizeInvalid,
        value: "SIZE_INVALID",
        message: "provided length did not match content length",
    },
    ErrorDescriptor {
        code: ErrorCode::NameInvalid,
        value: "NAME_INVALID",
        message: "invalid repository name",
    },
    ErrorDescriptor {
        code: ErrorCode::TagInvalid,
        value: "TAG_INVALID",
        message: "manifest tag did not match URI",
    },
    ErrorDescriptor {
        code: ErrorCode::NameUnknown,
        value: "NAME_UNKNOWN",
        message: "repository name not known to registry",
    },
    ErrorDescriptor {
        code: ErrorCode::ManifestUnknown,
        value: "MANIFEST_UNKNOWN",
        message: "manifest unknown",
    },
    ErrorDescriptor {
        code: ErrorCode::ManifestInvalid,
        value: "MANIFEST_INVALID",
        message: "manifest invalid",
    },
    ErrorDescriptor {
        code: ErrorCode::ManifestUnverified,
        value: "MANIFEST_UNVERIFIED",
        message: "manifest failed signature verification",
    },
    ErrorDescriptor {
        code: ErrorCode::BlobUnknown,
        value: "BLOB_UNKNOWN",
        message: "blob unknown to registry",
    },
    ErrorDescriptor {
        code: ErrorCode::BlobUploadUnknown,
        value: "BLOB_UPLOAD_UNKNOWN",
        message: "blob upload unknown to registry",
    },
    ErrorDescriptor {
        code: ErrorCode::BlobUploadInvalid,
        value: "BLOB_UPLOAD_INVALID",
        message: "blob upload invalid",
    },
];

impl ErrorCode {
    /// The descriptor for this code.
    pub fn describe(self) -> &'static ErrorDescriptor {
        DESCRIPTORS
            .get(self as usize)
            .filter(|descriptor| descriptor.code == self)
            .unwrap_or(&DESCRIPTORS[0])
    }

    /// The canonical string identifier.
    pub fn as_str(self) -> &'static str {
        self.describe().value
    }

    /// The fixed human readable message.
    pub fn message(self) -> &'static str {
        self.describe().message
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Lookup table from wire identifiers to codes.
///
/// Build it once at startup and share it by reference; it is never mutated.
#[derive(Debug, Clone)]
pub struct ErrorCodes {
    by_value: HashMap<&'static str, ErrorCode>,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCodes {
    /// Build the table from the fixed descriptor set.
    pub fn new() -> Self {
        let by_value = DESCRIPTORS
            .iter()
            .map(|descriptor| (descriptor.value, descriptor.code))
            .collect();
        Self { by_value }
    }

    /// Map an identifier to its code. Unrecognized identifiers are
    /// [`ErrorCode::Unknown`], never an error.
    pub fn parse(&self, identifier: &str) -> ErrorCode {
        self.by_value
            .get(identifier)
            .copied()
            .unwrap_or(ErrorCode::Unknown)
    }

    /// Every known descriptor.
    pub fn descriptors(&self) -> impl Iterator<Item = &'static ErrorDescriptor> {
        DESCRIPTORS.iter()
    }

    /// Decode an error envelope, mapping codes through this table.
    pub fn decode(&self, body: &[u8]) -> Result<Errors, serde_json::Error> {
        let envelope: WireEnvelope = serde_json::from_slice(body)?;
        let errors = envelope
            .errors
            .into_iter()
            .map(|wire| ApiError {
                code: self.parse(&wire.code),
                message: wire.message,
                detail: wire.detail,
            })
            .collect();
        Ok(Errors { errors })
    }
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    errors: Vec<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Free-form context attached to an [`ApiError`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detail(serde_json::Value);

impl Detail {
    /// Use an error's message text as the detail.
    pub fn error(err: &dyn std::error::Error) -> Self {
        Detail(serde_json::Value::String(err.to_string()))
    }

    /// The detail value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<&str> for Detail {
    fn from(value: &str) -> Self {
        Detail(value.into())
    }
}

impl From<String> for Detail {
    fn from(value: String) -> Self {
        Detail(value.into())
    }
}

impl From<&crate::Digest> for Detail {
    fn from(value: &crate::Digest) -> Self {
        Detail(value.to_string().into())
    }
}

impl From<serde_json::Value> for Detail {
    fn from(value: serde_json::Value) -> Self {
        Detail(value)
    }
}

/// Panic payload raised when a caller breaks the error model's contract.
///
/// This is a programming error in the caller, not a request failure, so it
/// aborts request handling instead of becoming an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    /// What the caller did wrong.
    pub reason: &'static str,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error model contract violated: {}", self.reason)
    }
}

/// A single API error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    /// The error code.
    pub code: ErrorCode,

    /// Human readable message, normally the code's fixed message.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Optional context, such as the offending digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ApiError {
    /// An error with the code's fixed message and no detail.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            detail: None,
        }
    }

    /// Attach a detail.
    pub fn with_detail(mut self, detail: impl Into<Detail>) -> Self {
        self.detail = Some(detail.into().into_value());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.as_str().to_lowercase().replace('_', " "),
            self.message
        )
    }
}

impl std::error::Error for ApiError {}

/// An ordered collection of API errors, serialized as `{"errors": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Errors {
    errors: Vec<ApiError>,
}

impl Errors {
    /// An empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an error with the code's fixed message and no detail.
    pub fn push(&mut self, code: ErrorCode) {
        self.push_details(code, None::<Detail>);
    }

    /// Push an error with one detail.
    pub fn push_detail(&mut self, code: ErrorCode, detail: impl Into<Detail>) {
        self.push_details(code, Some::<Detail>(detail.into()));
    }

    /// Push an error with zero or one details.
    ///
    /// # Panics
    ///
    /// Supplying more than one detail panics with a [`ContractViolation`]
    /// payload.
    pub fn push_details<I>(&mut self, code: ErrorCode, details: I)
    where
        I: IntoIterator,
        I::Item: Into<Detail>,
    {
        let mut details = details.into_iter();
        let detail = details.next().map(Into::into);
        if details.next().is_some() {
            std::panic::panic_any(ContractViolation {
                reason: "specify zero or one detail items for an error",
            });
        }

        self.errors.push(ApiError {
            code,
            message: code.message().to_string(),
            detail: detail.map(Detail::into_value),
        });
    }

    /// Push a ready-made API error unchanged.
    pub fn push_error(&mut self, error: ApiError) {
        self.errors.push(error);
    }

    /// Push a foreign error: its text becomes the message and the code stays
    /// at the neutral [`ErrorCode::Unknown`].
    pub fn push_raw(&mut self, err: &dyn std::error::Error) {
        self.errors.push(ApiError {
            code: ErrorCode::default(),
            message: err.to_string(),
            detail: None,
        });
    }

    /// Append every error from `other`, preserving order.
    pub fn extend(&mut self, other: Errors) {
        self.errors.extend(other.errors);
    }

    /// Remove every error.
    pub fn clear(&mut self) {
        self.errors.clear();
    }

    /// The number of errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no errors have been pushed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The errors, in push order.
    pub fn iter(&self) -> std::slice::Iter<'_, ApiError> {
        self.errors.iter()
    }

    /// The codes, in push order.
    pub fn codes(&self) -> Vec<ErrorCode> {
        self.errors.iter().map(|error| error.code).collect()
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a ApiError;
    type IntoIter = std::slice::Iter<'a, ApiError>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("<nil>"),
            [only] => write!(f, "{only}"),
            many => {
                writeln!(f, "errors:")?;
                for error in many {
                    writeln!(f, "{error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Errors {}
