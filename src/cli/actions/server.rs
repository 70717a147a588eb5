use crate::{
    api::{self, Policy},
    config::Configuration,
    identity::KeycloakGateway,
    tree::{HttpTreeFetcher, Timeouts, TreeResolver},
    vault::{self, SecretId},
};
use anyhow::{Context, Result};
use std::{fmt::Write, path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Vault {
        url: String,
        role_id: String,
        secret_id: SecretId,
        kv_mount: String,
        kv_path: String,
    },
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub source: ConfigSource,
    pub timeouts: Timeouts,
    pub conceal_denied: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let configuration = load_configuration(&args.source).await?;

    let realms = configuration.identity_realms();
    for org in configuration.organizations.keys() {
        if !realms.contains_key(org) {
            warn!("organization {} has no identity realm, non-public paths will answer 503", org);
        }
    }

    let constraints = Arc::new(configuration.security_constraints.clone());
    let identity = KeycloakGateway::new(realms, args.timeouts.identity)
        .context("Failed to build identity client")?;
    let fetcher =
        HttpTreeFetcher::new(args.timeouts.fetch).context("Failed to build repository client")?;

    let resolver = TreeResolver::new(
        Arc::new(configuration),
        Arc::new(identity),
        Arc::new(fetcher),
        constraints,
        args.timeouts,
    );

    let policy = Policy {
        conceal_denied: args.conceal_denied,
    };

    api::new(args.port, Arc::new(resolver), policy).await
}

/// Read the configuration document from its source.
/// # Errors
/// Returns an error if the file or Vault secret cannot be read or is invalid.
pub async fn load_configuration(source: &ConfigSource) -> Result<Configuration> {
    match source {
        ConfigSource::File(path) => Configuration::from_file(path)
            .with_context(|| format!("Could not load configuration from {}", path.display())),
        ConfigSource::Vault {
            url,
            role_id,
            secret_id,
            kv_mount,
            kv_path,
        } => {
            let token = vault::approle_login(url, role_id, secret_id)
                .await
                .context("Vault login failed")?;

            vault::kv::read_configuration(url, &token, kv_mount, kv_path)
                .await
                .context("Could not load configuration from Vault")
        }
    }
}

fn log_startup_args(args: &Args) {
    let source = match &args.source {
        ConfigSource::File(path) => format!("file:{}", path.display()),
        ConfigSource::Vault {
            kv_mount, kv_path, ..
        } => format!("vault:{kv_mount}/{kv_path}"),
    };

    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("config", source),
        (
            "identity_timeout",
            format!("{}ms", args.timeouts.identity.as_millis()),
        ),
        (
            "fetch_timeout",
            format!("{}ms", args.timeouts.fetch.as_millis()),
        ),
        ("conceal_denied", args.conceal_denied.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = write!(message, "\n  {key}:{padding} {value}");
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn loads_configuration_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(
            br#"{ "organizations": { "zup": { "repositoryConfig": [
                { "name": "commons", "treePath": "/tree/tree.json", "remote": "http://localhost:8882" }
            ] } } }"#,
        )?;

        let configuration =
            load_configuration(&ConfigSource::File(file.path().to_path_buf())).await?;
        assert!(configuration.organizations.contains_key("zup"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_file_names_the_path() {
        let err = load_configuration(&ConfigSource::File(PathBuf::from(
            "/nonexistent/ritchie.json",
        )))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ritchie.json"));
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }
}
