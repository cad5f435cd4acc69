//! Manifest operations for the registry

use axum::body::Body;
use axum::extract::Path;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use tracing::Instrument as _;

use crate::api::DOCKER_CONTENT_DIGEST;
use crate::context::RequestContext;
use crate::digest::Digest;
use crate::errcode::{Detail, ErrorCode};
use crate::error::StoreError;
use crate::reference::{Reference, validate_tag};
use crate::schema::{MANIFEST_MEDIA_TYPE, SCHEMA_VERSION, SignedManifest};
use crate::store::Registry;

/// Router for manifest operations
pub fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(get_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Parse the reference from the request target.
fn request_reference(ctx: &mut RequestContext, raw: &str) -> Option<Reference> {
    match raw.parse() {
        Ok(reference) => Some(reference),
        Err(err) => {
            let code = if raw.contains(':') {
                ErrorCode::DigestInvalid
            } else {
                ErrorCode::TagInvalid
            };
            ctx.fail(StatusCode::BAD_REQUEST, code, Detail::error(&err));
            None
        }
    }
}

fn manifest_failure(ctx: &mut RequestContext, reference: &Reference, err: StoreError) {
    match err {
        StoreError::InvalidTag(err) => {
            ctx.fail(StatusCode::BAD_REQUEST, ErrorCode::TagInvalid, Detail::error(&err));
        }
        StoreError::TagUnknown(_) | StoreError::BlobUnknown(_) | StoreError::InvalidRevision { .. } => {
            tracing::debug!("manifest unknown: {err}");
            ctx.fail(
                StatusCode::NOT_FOUND,
                ErrorCode::ManifestUnknown,
                reference.to_string(),
            );
        }
        err => {
            tracing::error!("manifest lookup failed: {err}");
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
        }
    }
}

/// Get a manifest by tag or digest
async fn get_manifest(
    mut ctx: RequestContext,
    method: Method,
    Path((_, reference)): Path<(String, String)>,
) -> Response {
    let span = ctx.span().clone();
    let response = fetch_manifest(&mut ctx, &method, &reference)
        .instrument(span)
        .await;
    ctx.finish(response)
}

async fn fetch_manifest(ctx: &mut RequestContext, method: &Method, raw: &str) -> Option<Response> {
    tracing::debug!("get manifest");
    let reference = request_reference(ctx, raw)?;
    let manifests = ctx.repository().manifests();

    let lookup = match &reference {
        Reference::Tag(tag) => match manifests.resolve(tag).await {
            Ok(digest) => manifests.get(&digest).await.map(|manifest| (digest, manifest)),
            Err(err) => Err(err),
        },
        Reference::Digest(digest) => manifests
            .get(digest)
            .await
            .map(|manifest| (digest.clone(), manifest)),
    };

    let (digest, manifest) = match lookup {
        Ok(found) => found,
        Err(err) => {
            manifest_failure(ctx, &reference, err);
            return None;
        }
    };

    let data = match manifest.canonical_bytes() {
        Ok(data) => data,
        Err(err) => {
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
            return None;
        }
    };

    let headers = [
        (header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE.to_string()),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
        (header::CONTENT_LENGTH, data.len().to_string()),
    ];
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(data)
    };
    Some((StatusCode::OK, headers, body).into_response())
}

/// Put a manifest
async fn put_manifest(
    mut ctx: RequestContext,
    Path((_, reference)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let span = ctx.span().clone();
    let response = store_manifest(&mut ctx, &reference, &body)
        .instrument(span)
        .await;
    ctx.finish(response)
}

async fn store_manifest(ctx: &mut RequestContext, raw: &str, body: &[u8]) -> Option<Response> {
    tracing::debug!(size = body.len(), "put manifest");
    let reference = request_reference(ctx, raw)?;

    let manifest: SignedManifest = match serde_json::from_slice(body) {
        Ok(manifest) => manifest,
        Err(err) => {
            ctx.push_detail(ErrorCode::ManifestInvalid, Detail::error(&err));
            return None;
        }
    };
    if manifest.manifest.schema_version != SCHEMA_VERSION {
        ctx.push_detail(
            ErrorCode::ManifestInvalid,
            format!("unsupported schema version {}", manifest.manifest.schema_version),
        );
        return None;
    }
    if let Err(err) = validate_tag(&manifest.manifest.tag) {
        ctx.push_detail(ErrorCode::TagInvalid, Detail::error(&err));
        return None;
    }

    let digest = match manifest.digest() {
        Ok(digest) => digest,
        Err(err) => {
            ctx.push_detail(ErrorCode::ManifestInvalid, Detail::error(&err));
            return None;
        }
    };

    match &reference {
        Reference::Tag(tag) if tag != &manifest.manifest.tag => {
            ctx.push_detail(ErrorCode::TagInvalid, "tag does not match the manifest");
            return None;
        }
        Reference::Digest(expected) if expected != &digest => {
            ctx.push_detail(ErrorCode::DigestInvalid, expected);
            return None;
        }
        _ => {}
    }

    let manifests = ctx.repository().manifests();
    let errors = manifests.verify(&manifest).await;
    if !errors.is_empty() {
        tracing::debug!("manifest failed verification: {errors}");
        ctx.extend(errors);
        return None;
    }

    match manifests.put(&manifest).await {
        Ok(revision) => Some(
            (
                StatusCode::ACCEPTED,
                [
                    (
                        header::LOCATION,
                        format!("/v2/{}/manifests/{}", ctx.repository().name(), revision.digest),
                    ),
                    (DOCKER_CONTENT_DIGEST, revision.digest.to_string()),
                    (header::CONTENT_LENGTH, "0".to_string()),
                ],
            )
                .into_response(),
        ),
        Err(err) => {
            tracing::error!("storing manifest failed: {err}");
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
            None
        }
    }
}

/// Manifests are append-only; deletion is always refused
async fn delete_manifest(
    mut ctx: RequestContext,
    Path((_, reference)): Path<(String, String)>,
) -> Response {
    let span = ctx.span().clone();
    let response = async {
        tracing::debug!("delete manifest");
        let result = match reference.parse::<Digest>() {
            Ok(digest) => ctx.repository().manifests().delete(&digest).await,
            Err(_) => Err(StoreError::Unsupported("deletion of manifests")),
        };

        match result {
            Ok(()) => Some(StatusCode::ACCEPTED.into_response()),
            Err(err @ StoreError::Unsupported(_)) => {
                ctx.fail(
                    StatusCode::METHOD_NOT_ALLOWED,
                    ErrorCode::Unsupported,
                    Detail::error(&err),
                );
                None
            }
            Err(err) => {
                ctx.fail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Unknown,
                    Detail::error(&err),
                );
                None
            }
        }
    }
    .instrument(span)
    .await;
    ctx.finish(response)
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// List tags for a repository
async fn list_tags(mut ctx: RequestContext) -> Response {
    let span = ctx.span().clone();
    let response = async {
        tracing::debug!("list tags");
        let name = ctx.repository().name().to_string();
        match ctx.repository().manifests().tags().await {
            Ok(tags) if tags.is_empty() => {
                ctx.fail(
                    StatusCode::NOT_FOUND,
                    ErrorCode::NameUnknown,
                    serde_json::json!({ "name": name }),
                );
                None
            }
            Ok(tags) => Some(Json(TagList { name, tags }).into_response()),
            Err(err) => {
                tracing::error!("listing tags failed: {err}");
                ctx.fail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Unknown,
                    Detail::error(&err),
                );
                None
            }
        }
    }
    .instrument(span)
    .await;
    ctx.finish(response)
}
