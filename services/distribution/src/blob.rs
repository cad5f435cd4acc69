//! Blob operations for the registry

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use storage::ByteRange;
use tokio_util::io::ReaderStream;
use tracing::Instrument as _;

use crate::api::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use crate::context::RequestContext;
use crate::digest::Digest;
use crate::errcode::{Detail, ErrorCode};
use crate::error::StoreError;
use crate::store::{Descriptor, Registry};

/// Blobs never change, so clients may cache them for a year.
const CACHE_CONTROL: &str = "max-age=31536000";

/// Router for blob operations
pub fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/blobs/",
            get(digest_not_available)
                .head(digest_not_available)
                .delete(digest_not_available),
        )
        .route(
            "/v2/{name}/blobs/{digest}",
            get(get_blob).head(get_blob).delete(delete_blob),
        )
        .route("/v2/{name}/blobs/uploads/", post(start_upload))
        .route(
            "/v2/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .put(complete_upload)
                .delete(cancel_upload)
                .layer(DefaultBodyLimit::disable()),
        )
}

/// Parse the digest from the request target, recording why it is unusable.
///
/// The status is left for [`RequestContext::finish`] to choose.
fn request_digest(ctx: &mut RequestContext, raw: &str) -> Option<Digest> {
    match raw.parse() {
        Ok(digest) => Some(digest),
        Err(err) => {
            ctx.push_detail(ErrorCode::DigestInvalid, Detail::error(&err));
            None
        }
    }
}

/// The request target names a blob but carries no digest.
async fn digest_not_available(mut ctx: RequestContext) -> Response {
    ctx.fail(
        StatusCode::NOT_FOUND,
        ErrorCode::DigestInvalid,
        "digest not available",
    );
    ctx.finish(None)
}

/// Get a blob, or just its headers
async fn get_blob(
    mut ctx: RequestContext,
    method: Method,
    Path((_, digest)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let span = ctx.span().clone();
    let response = serve_blob(&mut ctx, &method, &digest, &headers)
        .instrument(span)
        .await;
    ctx.finish(response)
}

async fn serve_blob(
    ctx: &mut RequestContext,
    method: &Method,
    raw: &str,
    headers: &HeaderMap,
) -> Option<Response> {
    tracing::debug!("get blob");
    let digest = request_digest(ctx, raw)?;
    let blobs = ctx.repository().blobs();

    let descriptor = match blobs.stat(&digest).await {
        Ok(descriptor) => descriptor,
        Err(err) => {
            blob_failure(ctx, &digest, err);
            return None;
        }
    };

    let etag = format!("\"{digest}\"");
    if if_none_match(headers, &etag) {
        return Some(
            (
                StatusCode::NOT_MODIFIED,
                [(header::ETAG, etag), (DOCKER_CONTENT_DIGEST, digest.to_string())],
            )
                .into_response(),
        );
    }

    let (status, range) = match requested_range(headers, descriptor.length) {
        RangeRequest::Full => (StatusCode::OK, ByteRange::full()),
        RangeRequest::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            ByteRange::new(start, end - start + 1),
        ),
        RangeRequest::Unsatisfiable => {
            tracing::debug!(size = descriptor.length, "range not satisfiable");
            return Some(
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", descriptor.length))],
                )
                    .into_response(),
            );
        }
    };

    let mut response_headers = blob_headers(&descriptor, etag);
    let length = match range.length {
        Some(length) => {
            let end = range.offset + length - 1;
            response_headers.push((
                header::CONTENT_RANGE,
                format!("bytes {}-{end}/{}", range.offset, descriptor.length),
            ));
            length
        }
        None => descriptor.length,
    };
    response_headers.push((header::CONTENT_LENGTH, length.to_string()));

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        match blobs.open(&digest, range).await {
            Ok(reader) => Body::from_stream(ReaderStream::new(reader)),
            Err(err) => {
                blob_failure(ctx, &digest, err);
                return None;
            }
        }
    };

    let mut response = (status, body).into_response();
    for (name, value) in response_headers {
        if let Ok(value) = value.parse() {
            response.headers_mut().insert(name, value);
        }
    }
    Some(response)
}

fn blob_headers(descriptor: &Descriptor, etag: String) -> Vec<(HeaderName, String)> {
    vec![
        (header::CONTENT_TYPE, descriptor.media_type.clone()),
        (DOCKER_CONTENT_DIGEST, descriptor.digest.to_string()),
        (header::ETAG, etag),
        (header::ACCEPT_RANGES, "bytes".to_string()),
        (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
    ]
}

fn blob_failure(ctx: &mut RequestContext, digest: &Digest, err: StoreError) {
    match err {
        StoreError::BlobUnknown(_) => {
            ctx.fail(StatusCode::NOT_FOUND, ErrorCode::BlobUnknown, digest);
        }
        err => {
            tracing::error!("blob lookup failed: {err}");
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
        }
    }
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeRequest {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a `Range` header against a blob of `size` bytes.
///
/// Only a single byte range is honoured; anything else is served in full.
fn requested_range(headers: &HeaderMap, size: u64) -> RangeRequest {
    let Some(spec) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
    else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };

    match (first.parse::<u64>(), last.parse::<u64>()) {
        // bytes=-N: the final N bytes
        (Err(_), Ok(suffix)) if first.is_empty() => {
            if suffix == 0 || size == 0 {
                RangeRequest::Unsatisfiable
            } else {
                RangeRequest::Partial {
                    start: size.saturating_sub(suffix),
                    end: size - 1,
                }
            }
        }
        (Ok(start), Err(_)) if last.is_empty() => {
            if start >= size {
                RangeRequest::Unsatisfiable
            } else {
                RangeRequest::Partial {
                    start,
                    end: size - 1,
                }
            }
        }
        (Ok(start), Ok(end)) if start <= end => {
            if start >= size {
                RangeRequest::Unsatisfiable
            } else {
                RangeRequest::Partial {
                    start,
                    end: end.min(size - 1),
                }
            }
        }
        _ => RangeRequest::Full,
    }
}

/// Delete a blob
async fn delete_blob(
    mut ctx: RequestContext,
    Path((_, digest)): Path<(String, String)>,
) -> Response {
    let span = ctx.span().clone();
    let response = remove_blob(&mut ctx, &digest).instrument(span).await;
    ctx.finish(response)
}

async fn remove_blob(ctx: &mut RequestContext, raw: &str) -> Option<Response> {
    tracing::debug!("delete blob");
    let digest = request_digest(ctx, raw)?;

    match ctx.repository().blobs().delete(&digest).await {
        Ok(()) => Some((StatusCode::ACCEPTED, [(header::CONTENT_LENGTH, "0")]).into_response()),
        Err(StoreError::BlobUnknown(_)) => {
            ctx.fail(StatusCode::NOT_FOUND, ErrorCode::BlobUnknown, &digest);
            None
        }
        Err(StoreError::DeletionDisabled) => {
            ctx.fail(StatusCode::METHOD_NOT_ALLOWED, ErrorCode::Disabled, &digest);
            None
        }
        Err(err) => {
            tracing::error!("blob delete failed: {err}");
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
            None
        }
    }
}

fn upload_location(ctx: &RequestContext, id: &str) -> String {
    format!("/v2/{}/blobs/uploads/{id}", ctx.repository().name())
}

fn upload_failure(ctx: &mut RequestContext, err: StoreError) {
    match err {
        StoreError::UploadUnknown(id) => {
            ctx.fail(StatusCode::NOT_FOUND, ErrorCode::BlobUploadUnknown, id);
        }
        StoreError::DigestMismatch { .. } => {
            ctx.fail(
                StatusCode::BAD_REQUEST,
                ErrorCode::DigestInvalid,
                Detail::error(&err),
            );
        }
        err => {
            tracing::error!("upload failed: {err}");
            ctx.fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Unknown,
                Detail::error(&err),
            );
        }
    }
}

/// Start a blob upload session
async fn start_upload(mut ctx: RequestContext) -> Response {
    let span = ctx.span().clone();
    let response = async {
        tracing::debug!("start upload");
        match ctx.repository().uploads().start().await {
            Ok(upload) => Some(
                (
                    StatusCode::ACCEPTED,
                    [
                        (header::LOCATION, upload_location(&ctx, &upload.id)),
                        (DOCKER_UPLOAD_UUID, upload.id),
                        (header::RANGE, "0-0".to_string()),
                        (header::CONTENT_LENGTH, "0".to_string()),
                    ],
                )
                    .into_response(),
            ),
            Err(err) => {
                upload_failure(&mut ctx, err);
                None
            }
        }
    }
    .instrument(span)
    .await;
    ctx.finish(response)
}

/// Report on an open upload session
async fn upload_status(
    mut ctx: RequestContext,
    Path((_, id)): Path<(String, String)>,
) -> Response {
    let span = ctx.span().clone();
    let response = async {
        match ctx.repository().uploads().status(&id).await {
            Ok(upload) => Some(
                (
                    StatusCode::NO_CONTENT,
                    [
                        (header::LOCATION, upload_location(&ctx, &upload.id)),
                        (DOCKER_UPLOAD_UUID, upload.id),
                        (header::RANGE, "0-0".to_string()),
                    ],
                )
                    .into_response(),
            ),
            Err(err) => {
                upload_failure(&mut ctx, err);
                None
            }
        }
    }
    .instrument(span)
    .await;
    ctx.finish(response)
}

/// Query parameters closing an upload.
#[derive(Debug, serde::Deserialize)]
struct CompleteUpload {
    digest: Option<String>,
}

/// Complete a blob upload with its whole content
async fn complete_upload(
    mut ctx: RequestContext,
    Path((_, id)): Path<(String, String)>,
    Query(params): Query<CompleteUpload>,
    body: Bytes,
) -> Response {
    let span = ctx.span().clone();
    let response = finish_upload(&mut ctx, &id, params.digest.as_deref(), &body)
        .instrument(span)
        .await;
    ctx.finish(response)
}

async fn finish_upload(
    ctx: &mut RequestContext,
    id: &str,
    digest: Option<&str>,
    body: &[u8],
) -> Option<Response> {
    tracing::debug!(size = body.len(), "complete upload");
    let uploads = ctx.repository().uploads();

    if let Err(err) = uploads.status(id).await {
        upload_failure(ctx, err);
        return None;
    }

    let Some(raw) = digest else {
        ctx.fail(
            StatusCode::BAD_REQUEST,
            ErrorCode::BlobUploadInvalid,
            "digest parameter is required",
        );
        return None;
    };
    let digest = request_digest(ctx, raw)?;

    match uploads.complete(id, &digest, body).await {
        Ok(descriptor) => Some(
            (
                StatusCode::CREATED,
                [
                    (
                        header::LOCATION,
                        format!("/v2/{}/blobs/{}", ctx.repository().name(), descriptor.digest),
                    ),
                    (DOCKER_CONTENT_DIGEST, descriptor.digest.to_string()),
                    (header::CONTENT_LENGTH, "0".to_string()),
                ],
            )
                .into_response(),
        ),
        Err(err) => {
            upload_failure(ctx, err);
            None
        }
    }
}

/// Cancel a blob upload
async fn cancel_upload(
    mut ctx: RequestContext,
    Path((_, id)): Path<(String, String)>,
) -> Response {
    let span = ctx.span().clone();
    let response = async {
        tracing::debug!("cancel upload");
        match ctx.repository().uploads().cancel(&id).await {
            Ok(()) => Some(StatusCode::NO_CONTENT.into_response()),
            Err(err) => {
                upload_failure(&mut ctx, err);
                None
            }
        }
    }
    .instrument(span)
    .await;
    ctx.finish(response)
}
