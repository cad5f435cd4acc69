//! Integration tests for the registry HTTP API

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use bytes::Bytes;
use camino::Utf8Path;
use distribution::schema::{Manifest, SignedManifest};
use distribution::{Digest, ErrorCode, ErrorCodes, Errors, RegistryBuilder};
use ed25519_dalek::SigningKey;
use storage::{
    Driver, MemoryStorage, Metadata, Reader, Storage, StorageError, StorageErrorKind, Writer,
};
use tower::ServiceExt;

/// Helper to create a test registry
fn test_registry(delete_enabled: bool) -> axum::Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::new()
        .storage(storage.into())
        .bucket("test-registry")
        .delete_enabled(delete_enabled)
        .build()
        .unwrap()
}

const LOCKED: &str = "bucket is locked";

/// A backend which accepts writes but refuses to read or delete anything.
#[derive(Debug)]
struct LockedDriver {
    inner: MemoryStorage,
}

impl LockedDriver {
    fn refuse() -> StorageError {
        StorageError::new("locked", StorageErrorKind::PermissionDenied, LOCKED)
    }
}

#[async_trait::async_trait]
impl Driver for LockedDriver {
    fn name(&self) -> &'static str {
        "locked"
    }

    async fn delete(&self, _bucket: &str, _remote: &Utf8Path) -> Result<(), StorageError> {
        Err(Self::refuse())
    }

    async fn metadata(&self, _bucket: &str, _remote: &Utf8Path) -> Result<Metadata, StorageError> {
        Err(Self::refuse())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.inner.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        _bucket: &str,
        _remote: &Utf8Path,
        _writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        Err(Self::refuse())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

fn locked_registry() -> axum::Router {
    let driver = LockedDriver {
        inner: MemoryStorage::with_buckets(&["locked"]),
    };
    RegistryBuilder::new()
        .storage(Storage::new(driver))
        .bucket("locked")
        .delete_enabled(true)
        .build()
        .unwrap()
}

/// The detail of the first error, which must mention the backend's message.
fn assert_backend_detail(errors: &Errors) {
    let detail = errors.iter().next().unwrap().detail.as_ref().unwrap();
    assert!(
        detail.as_str().unwrap().contains(LOCKED),
        "backend message missing from {detail}"
    );
}

async fn send(app: &axum::Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn request(method: &str, uri: impl AsRef<str>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri.as_ref())
        .body(Body::empty())
        .unwrap()
}

async fn body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn errors(response: Response<Body>) -> Errors {
    ErrorCodes::new().decode(&body(response).await).unwrap()
}

fn header_str<'r>(response: &'r Response<Body>, name: &str) -> &'r str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

/// Push a blob through the upload endpoints
async fn push_blob(app: &axum::Router, repo: &str, data: &'static [u8]) -> Digest {
    let digest = Digest::from_bytes(data);

    let response = send(app, request("POST", format!("/v2/{repo}/blobs/uploads/"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_str(&response, "location").to_string();

    let response = send(
        app,
        Request::builder()
            .method("PUT")
            .uri(format!("{location}?digest={digest}"))
            .body(Body::from(Bytes::from_static(data)))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());

    digest
}

fn signed_manifest(name: &str, tag: &str, layers: &[Digest]) -> SignedManifest {
    let manifest = layers
        .iter()
        .cloned()
        .fold(Manifest::new(name, tag), Manifest::with_layer);
    SignedManifest::sign(manifest, &SigningKey::from_bytes(&[42; 32])).unwrap()
}

fn put_manifest(uri: impl AsRef<str>, manifest: &SignedManifest) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri.as_ref())
        .header(
            header::CONTENT_TYPE,
            distribution::schema::MANIFEST_MEDIA_TYPE,
        )
        .body(Body::from(serde_json::to_vec(manifest).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry(false);
    let response = send(&app, request("GET", "/v2/")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
    assert_eq!(&body(response).await[..], b"{}");
}

#[tokio::test]
async fn test_blob_upload_and_download() {
    let app = test_registry(false);
    let data = b"Hello, registry!";
    let digest = push_blob(&app, "test-repo", data).await;

    let response = send(&app, request("GET", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-length"), data.len().to_string());
    assert_eq!(header_str(&response, "content-type"), "application/octet-stream");
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(header_str(&response, "etag"), format!("\"{digest}\""));
    assert_eq!(header_str(&response, "accept-ranges"), "bytes");
    assert_eq!(header_str(&response, "cache-control"), "max-age=31536000");
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
    assert_eq!(&body(response).await[..], data);
}

#[tokio::test]
async fn test_blob_head() {
    let app = test_registry(false);
    let digest = push_blob(&app, "test-repo", b"test blob data").await;

    let response = send(&app, request("HEAD", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-length"), "14");
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_blob_range_and_conditional_requests() {
    let app = test_registry(false);
    let digest = push_blob(&app, "test-repo", b"0123456789").await;
    let uri = format!("/v2/test-repo/blobs/{digest}");

    let response = send(
        &app,
        Request::builder()
            .uri(&uri)
            .header(header::RANGE, "bytes=2-5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, "content-range"), "bytes 2-5/10");
    assert_eq!(header_str(&response, "content-length"), "4");
    assert_eq!(&body(response).await[..], b"2345");

    let response = send(
        &app,
        Request::builder()
            .uri(&uri)
            .header(header::RANGE, "bytes=20-")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, "content-range"), "bytes */10");

    let response = send(
        &app,
        Request::builder()
            .uri(&uri)
            .header(header::IF_NONE_MATCH, format!("\"{digest}\""))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_blob_not_found_symmetry() {
    let app = test_registry(true);
    let missing = Digest::from_bytes(b"never pushed");

    for method in ["GET", "HEAD", "DELETE"] {
        let response = send(&app, request(method, format!("/v2/test-repo/blobs/{missing}"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method}");
        if method != "HEAD" {
            let errors = errors(response).await;
            assert_eq!(errors.codes(), vec![ErrorCode::BlobUnknown]);
            let error = errors.iter().next().unwrap();
            assert_eq!(error.detail, Some(serde_json::json!(missing.to_string())));
        }
    }
}

#[tokio::test]
async fn test_blobs_are_scoped_to_repositories() {
    let app = test_registry(false);
    let digest = push_blob(&app, "first", b"scoped").await;

    let response = send(&app, request("GET", format!("/v2/second/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_digests() {
    let app = test_registry(false);

    let response = send(&app, request("GET", "/v2/test-repo/blobs/sha256:nothex")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::DigestInvalid]);

    let response = send(&app, request("GET", "/v2/test-repo/blobs/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::DigestInvalid]);
}

#[tokio::test]
async fn test_invalid_repository_name() {
    let app = test_registry(false);
    let digest = Digest::from_bytes(b"x");

    let response = send(&app, request("GET", format!("/v2/Bad-Name/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::NameInvalid]);
}

#[tokio::test]
async fn test_blob_delete_disabled() {
    let app = test_registry(false);
    let digest = push_blob(&app, "test-repo", b"sticky").await;

    let response = send(&app, request("DELETE", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::Disabled]);

    let response = send(&app, request("HEAD", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blob_delete_enabled() {
    let app = test_registry(true);
    let digest = push_blob(&app, "test-repo", b"ephemeral").await;

    let response = send(&app, request("DELETE", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "content-length"), "0");

    let response = send(&app, request("GET", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_errors() {
    let app = test_registry(false);
    let unknown = "9a3b4c1e-2f4d-4c8b-9a1e-0123456789ab";

    let response = send(
        &app,
        request("PUT", format!("/v2/test-repo/blobs/uploads/{unknown}?digest={}", Digest::from_bytes(b""))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::BlobUploadUnknown]);

    let response = send(&app, request("POST", "/v2/test-repo/blobs/uploads/")).await;
    let location = header_str(&response, "location").to_string();
    let uuid = header_str(&response, "docker-upload-uuid").to_string();
    assert!(location.ends_with(&uuid));
    assert_eq!(header_str(&response, "range"), "0-0");

    let response = send(&app, request("GET", &location)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, request("PUT", &location)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::BlobUploadInvalid]);

    let wrong = Digest::from_bytes(b"something else");
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("{location}?digest={wrong}"))
            .body(Body::from("actual content"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::DigestInvalid]);

    let response = send(&app, request("DELETE", &location)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, request("DELETE", &location)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::BlobUploadUnknown]);
}

#[tokio::test]
async fn test_manifest_upload_and_download() {
    let app = test_registry(false);
    let layer = push_blob(&app, "test-repo", b"layer").await;
    let manifest = signed_manifest("test-repo", "latest", &[layer]);

    let response = send(&app, put_manifest("/v2/test-repo/manifests/latest", &manifest)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let digest = header_str(&response, "docker-content-digest").to_string();
    assert_eq!(digest, manifest.digest().unwrap().to_string());
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/test-repo/manifests/{digest}")
    );

    for reference in ["latest", digest.as_str()] {
        let response = send(&app, request("GET", format!("/v2/test-repo/manifests/{reference}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "docker-content-digest"), digest);
        let fetched: SignedManifest = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(fetched, manifest);
    }

    let response = send(&app, request("HEAD", "/v2/test-repo/manifests/latest")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_manifest_verification_reports_everything() {
    let app = test_registry(false);
    let manifest = signed_manifest(
        "other-repo",
        "latest",
        &[Digest::from_bytes(b"missing a"), Digest::from_bytes(b"missing b")],
    );

    let response = send(&app, put_manifest("/v2/test-repo/manifests/latest", &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        errors(response).await.codes(),
        vec![ErrorCode::NameInvalid, ErrorCode::BlobUnknown, ErrorCode::BlobUnknown]
    );

    let response = send(&app, request("GET", "/v2/test-repo/manifests/latest")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::ManifestUnknown]);
}

#[tokio::test]
async fn test_manifest_signature_and_reference_checks() {
    let app = test_registry(false);

    let mut tampered = signed_manifest("test-repo", "latest", &[]);
    tampered.manifest.architecture = "riscv64".into();
    let response = send(&app, put_manifest("/v2/test-repo/manifests/latest", &tampered)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::ManifestUnverified]);

    let manifest = signed_manifest("test-repo", "latest", &[]);
    let response = send(&app, put_manifest("/v2/test-repo/manifests/stable", &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::TagInvalid]);

    let wrong = Digest::from_bytes(b"not the manifest");
    let response = send(&app, put_manifest(format!("/v2/test-repo/manifests/{wrong}"), &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::DigestInvalid]);

    let by_digest = format!("/v2/test-repo/manifests/{}", manifest.digest().unwrap());
    let response = send(&app, put_manifest(&by_digest, &manifest)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/v2/test-repo/manifests/latest")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::ManifestInvalid]);
}

#[tokio::test]
async fn test_manifest_tag_must_be_valid() {
    let app = test_registry(false);

    for tag in ["../../../other/_manifests/tags/pwned", ""] {
        let manifest = signed_manifest("test-repo", tag, &[]);
        let by_digest = format!("/v2/test-repo/manifests/{}", manifest.digest().unwrap());
        let response = send(&app, put_manifest(&by_digest, &manifest)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{tag:?}");
        assert_eq!(errors(response).await.codes(), vec![ErrorCode::TagInvalid]);
    }

    for repo in ["other", "test-repo"] {
        let response = send(&app, request("GET", format!("/v2/{repo}/tags/list"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_backend_failures_are_reported() {
    let app = locked_registry();
    let digest = Digest::from_bytes(b"layer");

    let response = send(&app, request("GET", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let errs = errors(response).await;
    assert_eq!(errs.codes(), vec![ErrorCode::Unknown]);
    assert_backend_detail(&errs);

    let response = send(&app, request("DELETE", format!("/v2/test-repo/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let errs = errors(response).await;
    assert_eq!(errs.codes(), vec![ErrorCode::Unknown]);
    assert_backend_detail(&errs);

    let response = send(&app, request("GET", "/v2/test-repo/manifests/latest")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let errs = errors(response).await;
    assert_eq!(errs.codes(), vec![ErrorCode::Unknown]);
    assert_backend_detail(&errs);
}

#[tokio::test]
async fn test_unreadable_layers_fail_verification() {
    let app = locked_registry();
    let layer = Digest::from_bytes(b"layer");
    let manifest = signed_manifest("test-repo", "latest", &[layer.clone()]);

    let response = send(&app, put_manifest("/v2/test-repo/manifests/latest", &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let errs = errors(response).await;
    assert_eq!(errs.codes(), vec![ErrorCode::Unknown, ErrorCode::BlobUnknown]);
    assert_backend_detail(&errs);
    assert_eq!(
        errs.iter().nth(1).unwrap().detail,
        Some(serde_json::json!(layer.to_string()))
    );
}

#[tokio::test]
async fn test_manifest_delete_is_unsupported() {
    let app = test_registry(true);
    let manifest = signed_manifest("test-repo", "latest", &[]);
    let response = send(&app, put_manifest("/v2/test-repo/manifests/latest", &manifest)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let digest = manifest.digest().unwrap();

    for reference in [digest.to_string(), "latest".to_string()] {
        let response = send(&app, request("DELETE", format!("/v2/test-repo/manifests/{reference}"))).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(errors(response).await.codes(), vec![ErrorCode::Unsupported]);
    }

    let response = send(&app, request("GET", "/v2/test-repo/manifests/latest")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_tags() {
    let app = test_registry(false);

    let response = send(&app, request("GET", "/v2/test-repo/tags/list")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response).await.codes(), vec![ErrorCode::NameUnknown]);

    for tag in ["v1.0", "v1.1", "latest"] {
        let manifest = signed_manifest("test-repo", tag, &[]);
        let response = send(&app, put_manifest(format!("/v2/test-repo/manifests/{tag}"), &manifest)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = send(&app, request("GET", "/v2/test-repo/tags/list")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let list: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(
        list,
        serde_json::json!({"name": "test-repo", "tags": ["latest", "v1.0", "v1.1"]})
    );
}

#[tokio::test]
async fn test_error_envelope_shape() {
    let app = test_registry(false);
    let response = send(&app, request("GET", "/v2/test-repo/manifests/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );

    let envelope: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(
        envelope,
        serde_json::json!({
            "errors": [{
                "code": "MANIFEST_UNKNOWN",
                "message": ErrorCode::ManifestUnknown.message(),
                "detail": "missing",
            }]
        })
    );
}

#[tokio::test]
async fn test_local_storage_backend() {
    let storage = storage::StorageConfig::Temp.build().await.unwrap();
    let app = RegistryBuilder::new()
        .storage(storage)
        .bucket("registry")
        .build()
        .unwrap();

    let digest = push_blob(&app, "on-disk", b"persisted layer").await;
    let response = send(&app, request("GET", format!("/v2/on-disk/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body(response).await[..], b"persisted layer");

    let manifest = signed_manifest("on-disk", "latest", &[digest]);
    let response = send(&app, put_manifest("/v2/on-disk/manifests/latest", &manifest)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, request("GET", "/v2/on-disk/tags/list")).await;
    let list: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(list["tags"], serde_json::json!(["latest"]));
}
