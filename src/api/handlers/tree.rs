use crate::tree::{TreeError, TreeRequest, TreeResolver};
use axum::{
    extract::Extension,
    http::{HeaderMap, Method, StatusCode, Uri, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

pub const ORG_HEADER: &str = "x-org";
pub const REPO_NAME_HEADER: &str = "x-repo-name";

/// How resolution failures are reported to callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    /// Report unauthorized and forbidden requests as `404`.
    pub conceal_denied: bool,
}

impl Policy {
    #[must_use]
    pub fn status_for(&self, err: &TreeError) -> StatusCode {
        match err.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if self.conceal_denied => {
                StatusCode::NOT_FOUND
            }
            status => status,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[utoipa::path(
    get,
    path= "/tree",
    params(
        ("x-org" = String, Header, description = "Organization owning the repository"),
        ("x-repo-name" = String, Header, description = "Repository name"),
        ("Authorization" = Option<String>, Header, description = "Bearer token, optional on public paths"),
    ),
    responses (
        (status = 200, description = "Formula tree shaped for the caller"),
        (status = 401, description = "Missing or rejected bearer token"),
        (status = 403, description = "No granted role for this path and method"),
        (status = 404, description = "Unknown organization or repository"),
        (status = 500, description = "Repository remote failed"),
        (status = 503, description = "Identity provider unavailable"),
    ),
    tag = "tree",
)]
// axum handler for tree
#[instrument(skip(headers, resolver, policy))]
pub async fn tree(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    resolver: Extension<Arc<TreeResolver>>,
    policy: Extension<Policy>,
) -> Response {
    let request = TreeRequest {
        org: header(&headers, ORG_HEADER).unwrap_or_default(),
        repo_name: header(&headers, REPO_NAME_HEADER).unwrap_or_default(),
        authorization: header(&headers, AUTHORIZATION.as_str()),
        path: uri.path(),
        method: &method,
    };

    match resolver.resolve(request).await {
        Ok(tree) => (StatusCode::OK, Json(tree)).into_response(),
        Err(err) => {
            let status = policy.status_for(&err);
            if status.is_server_error() {
                error!("{}", err);
            } else {
                debug!("{}", err);
            }
            status.into_response()
        }
    }
}

/// Unknown paths and unsupported methods.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
