//! Resolution of a `GET /tree` request.
//!
//! A request moves through repository lookup, authorization and fetch, in that
//! order and exactly once. Each stage has one failure kind, and a failure ends
//! the resolution.

pub mod fetch;
pub mod manifest;

pub use self::fetch::{FetchError, HttpTreeFetcher, TreeFetcher, tree_url};
pub use self::manifest::ManifestTree;

use crate::{
    config::{ConfigStore, LookupError, RepositoryDescriptor},
    constraints::SecurityConstraints,
    identity::{IdentityError, IdentityGateway, bearer_token},
    repository::find_repo,
};
use axum::http::{Method, StatusCode};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("not found: {0}")]
    NotFound(#[from] LookupError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),
}

impl TreeError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IdentityError> for TreeError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AuthFailure(cause) => Self::Unauthorized(cause),
            IdentityError::Unavailable(cause) => Self::ServiceUnavailable(cause),
        }
    }
}

impl From<FetchError> for TreeError {
    fn from(err: FetchError) -> Self {
        Self::UpstreamFetch(err.to_string())
    }
}

/// Inbound request as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct TreeRequest<'a> {
    pub org: &'a str,
    pub repo_name: &'a str,
    pub authorization: Option<&'a str>,
    pub path: &'a str,
    pub method: &'a Method,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub identity: Duration,
    pub fetch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            identity: Duration::from_secs(5),
            fetch: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct TreeResolver {
    config: Arc<dyn ConfigStore>,
    identity: Arc<dyn IdentityGateway>,
    fetcher: Arc<dyn TreeFetcher>,
    constraints: Arc<SecurityConstraints>,
    timeouts: Timeouts,
}

impl TreeResolver {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigStore>,
        identity: Arc<dyn IdentityGateway>,
        fetcher: Arc<dyn TreeFetcher>,
        constraints: Arc<SecurityConstraints>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            config,
            identity,
            fetcher,
            constraints,
            timeouts,
        }
    }

    /// Resolve `request` to the shaped manifest of the requested repository.
    ///
    /// # Errors
    /// Returns the [`TreeError`] of the first stage that fails.
    #[instrument(skip(self, request), fields(org = request.org, repo = request.repo_name))]
    pub async fn resolve(&self, request: TreeRequest<'_>) -> Result<ManifestTree, TreeError> {
        let descriptors = self.config.read_repository_config(request.org).await?;
        let repo = find_repo(&descriptors, request.repo_name)?;

        let roles = self.authorize(&request).await?;

        self.fetch(repo, &roles).await
    }

    /// Roles the caller holds, or the reason it may not proceed.
    ///
    /// Public paths return an empty set without consulting the identity provider.
    async fn authorize(&self, request: &TreeRequest<'_>) -> Result<BTreeSet<String>, TreeError> {
        if self.constraints.is_public(request.path, request.method) {
            debug!("{} {} is public", request.method, request.path);
            return Ok(BTreeSet::new());
        }

        let token = request
            .authorization
            .and_then(bearer_token)
            .ok_or_else(|| TreeError::Unauthorized("missing bearer token".to_string()))?;

        let roles = timeout(
            self.timeouts.identity,
            self.identity.list_realm_roles(token, request.org),
        )
        .await
        .map_err(|_| {
            warn!("identity provider timed out for {}", request.org);
            TreeError::ServiceUnavailable("identity provider timed out".to_string())
        })??;

        let decision = self
            .constraints
            .evaluate(request.path, request.method, &roles);

        if decision.allowed {
            debug!("{} {} allowed: {}", request.method, request.path, decision.reason);
            Ok(roles)
        } else {
            info!("{} {} denied: {}", request.method, request.path, decision.reason);
            Err(TreeError::Forbidden(decision.reason.to_string()))
        }
    }

    async fn fetch(
        &self,
        repo: &RepositoryDescriptor,
        roles: &BTreeSet<String>,
    ) -> Result<ManifestTree, TreeError> {
        let url = tree_url(repo)?;

        let body = timeout(
            self.timeouts.fetch,
            self.fetcher.fetch(&url, repo.credentials()),
        )
        .await
        .map_err(|_| TreeError::UpstreamFetch(format!("{url} timed out")))??;

        let tree: ManifestTree = serde_json::from_slice(&body)
            .map_err(|e| TreeError::UpstreamFetch(format!("invalid tree at {url}: {e}")))?;

        Ok(tree.shape(repo, roles))
    }
}
