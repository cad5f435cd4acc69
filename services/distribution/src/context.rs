//! Per-request state for the HTTP handlers.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{FromRequestParts, Path};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::Span;
use uuid::Uuid;

use crate::errcode::{Detail, ErrorCode, Errors};
use crate::reference::RepositoryName;
use crate::store::{Registry, Repository};

/// State carried through one request: its id, the repository it addresses and
/// the errors accumulated so far.
///
/// Handlers push errors, optionally pick a status, and hand the context back
/// through [`RequestContext::finish`], which renders the error envelope when
/// anything went wrong.
#[derive(Debug)]
pub struct RequestContext {
    id: Uuid,
    repository: Repository,
    errors: Errors,
    status: Option<StatusCode>,
    span: Span,
}

impl RequestContext {
    /// Open a context for repository `name`.
    ///
    /// An invalid name is answered immediately with `NAME_INVALID`.
    pub fn new(registry: &Registry, name: &str) -> Result<Self, Response> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("request", %id, repository = %name);

        match RepositoryName::parse(name) {
            Ok(name) => Ok(Self {
                id,
                repository: registry.repository(name),
                errors: Errors::new(),
                status: None,
                span,
            }),
            Err(err) => {
                span.in_scope(|| tracing::debug!("rejecting repository name: {err}"));
                let mut errors = Errors::new();
                errors.push_detail(ErrorCode::NameInvalid, Detail::error(&err));
                Err(envelope(StatusCode::BAD_REQUEST, &errors))
            }
        }
    }

    /// The request id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The addressed repository.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The request's span; handler work should run inside it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Errors accumulated so far.
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Record an error without a detail.
    pub fn push(&mut self, code: ErrorCode) {
        self.errors.push(code);
    }

    /// Record an error with a detail.
    pub fn push_detail(&mut self, code: ErrorCode, detail: impl Into<Detail>) {
        self.errors.push_detail(code, detail);
    }

    /// Record every error from `errors`.
    pub fn extend(&mut self, errors: Errors) {
        self.errors.extend(errors);
    }

    /// Choose the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Choose the status and record an error in one step.
    pub fn fail(&mut self, status: StatusCode, code: ErrorCode, detail: impl Into<Detail>) {
        self.set_status(status);
        self.push_detail(code, detail);
    }

    /// Produce the final response.
    ///
    /// With errors recorded, the envelope is rendered with the chosen status,
    /// or 400 when the handler left that to the transport. Otherwise the
    /// handler's response is returned, or a bare status.
    pub fn finish(self, response: Option<Response>) -> Response {
        let _entered = self.span.enter();

        if !self.errors.is_empty() {
            let status = self.status.unwrap_or(StatusCode::BAD_REQUEST);
            if status.is_server_error() {
                tracing::warn!(%status, "request failed: {}", self.errors);
            } else {
                tracing::debug!(%status, "request failed: {}", self.errors);
            }
            return envelope(status, &self.errors);
        }

        let response = response
            .unwrap_or_else(|| self.status.unwrap_or(StatusCode::OK).into_response());
        tracing::debug!(status = %response.status(), "request finished");
        response
    }
}

/// Render an error envelope.
pub(crate) fn envelope(status: StatusCode, errors: &Errors) -> Response {
    (status, Json(errors)).into_response()
}

impl FromRequestParts<Registry> for RequestContext {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, registry: &Registry) -> Result<Self, Self::Rejection> {
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, registry)
            .await
            .map_err(IntoResponse::into_response)?;

        let name = params.get("name").map(String::as_str).unwrap_or_default();
        let context = RequestContext::new(registry, name)?;
        context.span.in_scope(|| {
            tracing::debug!(method = %parts.method, uri = %parts.uri, "request started");
        });
        Ok(context)
    }
}
