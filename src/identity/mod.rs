//! Realm role lookup for bearer tokens.
//!
//! A rejected credential ([`IdentityError::AuthFailure`]) is final. An
//! unreachable or misbehaving provider ([`IdentityError::Unavailable`]) is not
//! the caller's fault and must never be reported as a rejected credential.

mod keycloak;

pub use self::keycloak::KeycloakGateway;

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("credential rejected: {0}")]
    AuthFailure(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Realm roles granted to the holder of `bearer_token` within `org`.
    ///
    /// An empty set is a valid answer.
    ///
    /// # Errors
    /// Returns [`IdentityError::AuthFailure`] for invalid or expired tokens and
    /// [`IdentityError::Unavailable`] when the provider cannot be reached.
    async fn list_realm_roles(
        &self,
        bearer_token: &str,
        org: &str,
    ) -> Result<BTreeSet<String>, IdentityError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
