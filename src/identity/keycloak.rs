use super::{IdentityError, IdentityGateway};
use crate::config::IdentityRealm;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};
use tracing::{Instrument, debug, info_span, instrument, warn};

#[derive(Debug, Deserialize)]
struct Introspection {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

/// Resolves realm roles through Keycloak token introspection.
///
/// Each organization maps to one realm; `url` is the server base including any
/// `/auth` context path.
pub struct KeycloakGateway {
    client: Client,
    realms: BTreeMap<String, IdentityRealm>,
}

impl KeycloakGateway {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(realms: BTreeMap<String, IdentityRealm>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, realms })
    }
}

fn introspection_url(realm: &IdentityRealm) -> String {
    format!(
        "{}/realms/{}/protocol/openid-connect/token/introspect",
        realm.url.trim_end_matches('/'),
        realm.realm
    )
}

fn unavailable(err: &reqwest::Error) -> IdentityError {
    if err.is_timeout() {
        IdentityError::Unavailable(format!("introspection timed out: {err}"))
    } else {
        IdentityError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl IdentityGateway for KeycloakGateway {
    #[instrument(skip(self, bearer_token))]
    async fn list_realm_roles(
        &self,
        bearer_token: &str,
        org: &str,
    ) -> Result<BTreeSet<String>, IdentityError> {
        if bearer_token.trim().is_empty() {
            return Err(IdentityError::AuthFailure("empty bearer token".to_string()));
        }

        // a missing realm is our misconfiguration, the caller's token may be fine
        let realm = self.realms.get(org).ok_or_else(|| {
            IdentityError::Unavailable(format!("no identity realm configured for {org}"))
        })?;

        let url = introspection_url(realm);

        let span = info_span!(
            "keycloak.introspect",
            http.method = "POST",
            url = %url
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&realm.client_id, Some(realm.client_secret.expose_secret()))
            .form(&[("token", bearer_token)])
            .send()
            .instrument(span)
            .await
            .map_err(|e| unavailable(&e))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                // our client credentials were refused, not the caller's token
                warn!("Keycloak rejected introspection client {}", realm.client_id);
                return Err(IdentityError::Unavailable(format!(
                    "{url} - {}",
                    response.status()
                )));
            }
            status => {
                return Err(IdentityError::Unavailable(format!("{url} - {status}")));
            }
        }

        let introspection: Introspection =
            response.json().await.map_err(|e| unavailable(&e))?;

        if !introspection.active {
            return Err(IdentityError::AuthFailure(
                "token is not active".to_string(),
            ));
        }

        let roles: BTreeSet<String> = introspection
            .realm_access
            .map(|access| access.roles.into_iter().collect())
            .unwrap_or_default();

        debug!("realm roles for {}: {:?}", org, roles);

        Ok(roles)
    }
}
