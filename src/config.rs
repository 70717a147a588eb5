//! Per-organization configuration.
//!
//! The whole document is read once at startup (from a file or from Vault) and
//! never mutated afterwards. Repository lists are sorted by priority on load so
//! every lookup sees the same order.

use crate::constraints::SecurityConstraints;
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::{collections::BTreeMap, fs, path::Path};
use thiserror::Error;
use tracing::{debug, instrument};

/// Lookup failures that all surface as "resource absent".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Carries the lookup key: the organization, or the repository name when
    /// an empty repository set was searched.
    #[error("repository configuration not found: {0:?}")]
    ConfigNotFound(String),
    #[error("no repository named {0:?}")]
    RepoNotFound(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Repository descriptors for `org`, ordered by priority.
    ///
    /// # Errors
    /// Returns [`LookupError::ConfigNotFound`] when the organization is unknown
    /// or has no repositories.
    async fn read_repository_config(
        &self,
        org: &str,
    ) -> Result<Vec<RepositoryDescriptor>, LookupError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    pub tree_path: String,
    #[serde(rename = "remote")]
    pub remote_base_url: String,
    #[serde(default)]
    pub server_url: String,
    #[serde(default, rename = "replaceRepoUrl")]
    pub replace_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub password: Option<SecretString>,
}

impl RepositoryDescriptor {
    /// Basic-auth credentials for the remote, if a username is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, Option<&SecretString>)> {
        self.username
            .as_deref()
            .filter(|username| !username.is_empty())
            .map(|username| (username, self.password.as_ref()))
    }
}

/// Identity provider realm used to resolve the roles of an organization's users.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRealm {
    pub url: String,
    pub realm: String,
    pub client_id: String,
    #[serde(deserialize_with = "secret")]
    pub client_secret: SecretString,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationConfig {
    #[serde(default, rename = "keycloakConfig")]
    pub identity: Option<IdentityRealm>,
    #[serde(default, rename = "repositoryConfig")]
    pub repositories: Vec<RepositoryDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default, rename = "securityConstraints")]
    pub security_constraints: SecurityConstraints,
    #[serde(default, alias = "configs")]
    pub organizations: BTreeMap<String, OrganizationConfig>,
}

impl Configuration {
    /// Parse a configuration document.
    /// # Errors
    /// Returns an error if the document is not valid JSON or a policy entry is invalid.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let mut configuration: Self = serde_json::from_str(document)?;

        for (org, config) in &mut configuration.organizations {
            // stable: equal priorities keep declaration order
            config.repositories.sort_by_key(|repo| repo.priority);
            debug!(
                "organization {} has {} repositories",
                org,
                config.repositories.len()
            );
        }

        Ok(configuration)
    }

    /// Read and parse a configuration document from disk.
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    #[instrument]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let document = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&document)
    }

    /// Identity realms by organization.
    #[must_use]
    pub fn identity_realms(&self) -> BTreeMap<String, IdentityRealm> {
        self.organizations
            .iter()
            .filter_map(|(org, config)| {
                config
                    .identity
                    .clone()
                    .map(|identity| (org.clone(), identity))
            })
            .collect()
    }
}

#[async_trait]
impl ConfigStore for Configuration {
    async fn read_repository_config(
        &self,
        org: &str,
    ) -> Result<Vec<RepositoryDescriptor>, LookupError> {
        self.organizations
            .get(org)
            .map(|config| config.repositories.clone())
            .filter(|repositories| !repositories.is_empty())
            .ok_or_else(|| LookupError::ConfigNotFound(org.to_string()))
    }
}

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|value| !value.is_empty())
        .map(SecretString::from))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::Method;
    use secrecy::ExposeSecret;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
        "securityConstraints": {
            "constraints": [
                { "pattern": "/validate", "roleMappings": { "admin": ["POST", "GET"] } }
            ],
            "publicConstraints": [
                { "pattern": "/public", "methods": ["POST", "GET"] }
            ]
        },
        "organizations": {
            "zup": {
                "keycloakConfig": {
                    "url": "http://localhost:8080",
                    "realm": "ritchie",
                    "clientId": "user-login",
                    "clientSecret": "user-login"
                },
                "repositoryConfig": [
                    {
                        "name": "test1",
                        "priority": 1,
                        "treePath": "/tree/tree-test1.json",
                        "remote": "http://localhost:8882",
                        "serverUrl": "http://localhost:3000",
                        "replaceRepoUrl": "http://localhost:3000/formulas",
                        "username": "",
                        "password": ""
                    },
                    {
                        "name": "commons",
                        "priority": 0,
                        "treePath": "/tree/tree.json",
                        "remote": "http://localhost:8882",
                        "serverUrl": "http://localhost:3000",
                        "replaceRepoUrl": "http://localhost:3000/formulas",
                        "username": "reader",
                        "password": "s3cret"
                    }
                ]
            },
            "empty": { "repositoryConfig": [] }
        }
    }"#;

    #[tokio::test]
    async fn repositories_are_ordered_by_priority() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        let repos = configuration.read_repository_config("zup").await?;
        let names: Vec<&str> = repos.iter().map(|repo| repo.name.as_str()).collect();
        assert_eq!(names, ["commons", "test1"]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_organization_is_config_not_found() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        let err = configuration
            .read_repository_config("acme")
            .await
            .unwrap_err();
        assert_eq!(err, LookupError::ConfigNotFound("acme".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn organization_without_repositories_is_config_not_found() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        let err = configuration
            .read_repository_config("empty")
            .await
            .unwrap_err();
        assert_eq!(err, LookupError::ConfigNotFound("empty".to_string()));
        Ok(())
    }

    #[test]
    fn config_not_found_message_names_only_the_key() {
        let message = LookupError::ConfigNotFound("commons".to_string()).to_string();
        assert_eq!(message, "repository configuration not found: \"commons\"");
    }

    #[test]
    fn empty_credentials_are_ignored() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        let repos = &configuration.organizations["zup"].repositories;
        assert!(repos[1].credentials().is_none());

        let (username, password) = repos[0].credentials().unwrap();
        assert_eq!(username, "reader");
        assert_eq!(
            password.map(|p| p.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        Ok(())
    }

    #[test]
    fn password_is_redacted_in_debug_output() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        let debug = format!("{:?}", configuration.organizations["zup"].repositories[0]);
        assert!(!debug.contains("s3cret"));
        Ok(())
    }

    #[test]
    fn loads_security_constraints_and_realms() -> Result<()> {
        let configuration = Configuration::from_json(DOCUMENT)?;
        assert!(
            configuration
                .security_constraints
                .is_public("/public", &Method::POST)
        );
        let realms = configuration.identity_realms();
        assert_eq!(realms.len(), 1);
        assert_eq!(realms["zup"].realm, "ritchie");
        assert_eq!(realms["zup"].client_secret.expose_secret(), "user-login");
        Ok(())
    }

    #[test]
    fn accepts_legacy_configs_key() -> Result<()> {
        let configuration = Configuration::from_json(
            r#"{ "configs": { "zup": { "repositoryConfig": [
                { "name": "commons", "treePath": "/tree/tree.json", "remote": "http://localhost:8882" }
            ] } } }"#,
        )?;
        assert_eq!(configuration.organizations["zup"].repositories.len(), 1);
        assert!(configuration.security_constraints.deny_matchers.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_policy_fails_to_load() {
        let result = Configuration::from_json(
            r#"{ "securityConstraints": { "constraints": [ { "pattern": "validate" } ] } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn reads_document_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(DOCUMENT.as_bytes())?;
        let configuration = Configuration::from_file(file.path())?;
        assert_eq!(configuration.organizations.len(), 2);
        Ok(())
    }

    #[test]
    fn bundled_example_is_valid() -> Result<()> {
        let configuration = Configuration::from_json(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/contrib/config.example.json"
        )))?;
        assert_eq!(configuration.identity_realms().len(), 1);
        assert_eq!(configuration.organizations["zup"].repositories[0].name, "commons");

        let constraints = &configuration.security_constraints;
        let roles = |names: &[&str]| -> std::collections::BTreeSet<String> {
            names.iter().map(ToString::to_string).collect()
        };
        assert!(!constraints.is_public("/tree", &Method::GET));
        assert!(constraints.evaluate("/tree", &Method::GET, &roles(&["user"])).allowed);
        assert!(!constraints.evaluate("/tree", &Method::GET, &roles(&["guest"])).allowed);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Configuration::from_file(Path::new("/nonexistent/ritchie.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
