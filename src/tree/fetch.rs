use crate::config::RepositoryDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info_span, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid tree URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} - {status}")]
    Status { url: String, status: u16 },
}

/// Basic-auth credentials for a repository remote.
pub type Credentials<'a> = (&'a str, Option<&'a SecretString>);

#[async_trait]
pub trait TreeFetcher: Send + Sync {
    /// Raw manifest bytes stored at `url`.
    ///
    /// # Errors
    /// Returns an error if the remote cannot be reached or answers with a non-success status.
    async fn fetch(
        &self,
        url: &Url,
        credentials: Option<Credentials<'_>>,
    ) -> Result<Vec<u8>, FetchError>;
}

/// Location of a repository's manifest: the remote base joined with the tree path.
///
/// # Errors
/// Returns an error if the joined location is not a valid URL.
pub fn tree_url(repo: &RepositoryDescriptor) -> Result<Url, FetchError> {
    let raw = format!(
        "{}/{}",
        repo.remote_base_url.trim_end_matches('/'),
        repo.tree_path.trim_start_matches('/')
    );

    Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}

pub struct HttpTreeFetcher {
    client: Client,
}

impl HttpTreeFetcher {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TreeFetcher for HttpTreeFetcher {
    #[instrument(skip(self, credentials))]
    async fn fetch(
        &self,
        url: &Url,
        credentials: Option<Credentials<'_>>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url.as_str());

        if let Some((username, password)) = credentials {
            request = request.basic_auth(username, password.map(ExposeSecret::expose_secret));
        }

        let span = info_span!(
            "tree.fetch",
            http.method = "GET",
            url = %url
        );
        let response = request
            .send()
            .instrument(span)
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!("fetched {} bytes from {}", body.len(), url);

        Ok(body.to_vec())
    }
}
