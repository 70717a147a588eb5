use crate::{
    cli::{
        actions::{
            Action,
            server::{Args, ConfigSource},
        },
        commands::{self, vault as vault_args},
    },
    tree::Timeouts,
    vault::SecretId,
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

fn config_source(matches: &clap::ArgMatches) -> Result<ConfigSource> {
    if let Some(path) = matches.get_one::<PathBuf>(commands::ARG_CONFIG) {
        return Ok(ConfigSource::File(path.clone()));
    }

    let url = matches
        .get_one::<String>(vault_args::ARG_VAULT_URL)
        .cloned()
        .context("missing required argument: --config or --vault-url")?;

    let role_id = matches
        .get_one::<String>(vault_args::ARG_VAULT_ROLE_ID)
        .cloned()
        .context("missing required argument: --vault-role-id")?;

    let secret_id = match (
        matches.get_one::<String>(vault_args::ARG_VAULT_SECRET_ID),
        matches.get_one::<String>(vault_args::ARG_VAULT_WRAPPED_TOKEN),
    ) {
        (Some(sid), _) => SecretId::Plain(SecretString::from(sid.clone())),
        (None, Some(wrapped)) => SecretId::Wrapped(SecretString::from(wrapped.clone())),
        (None, None) => {
            return Err(anyhow!(
                "missing required argument: --vault-secret-id or --vault-wrapped-token"
            ));
        }
    };

    let kv_mount = matches
        .get_one::<String>(vault_args::ARG_VAULT_KV_MOUNT)
        .cloned()
        .unwrap_or_else(|| "secret".to_string());
    let kv_path = matches
        .get_one::<String>(vault_args::ARG_VAULT_KV_PATH)
        .cloned()
        .unwrap_or_else(|| "ritchie".to_string());

    Ok(ConfigSource::Vault {
        url,
        role_id,
        secret_id,
        kv_mount,
        kv_path,
    })
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    commands::validate(matches).map_err(|e| anyhow!(e))?;

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(3000);

    let defaults = Timeouts::default();
    let timeouts = Timeouts {
        identity: matches
            .get_one::<u64>(commands::ARG_IDENTITY_TIMEOUT)
            .copied()
            .map_or(defaults.identity, Duration::from_millis),
        fetch: matches
            .get_one::<u64>(commands::ARG_FETCH_TIMEOUT)
            .copied()
            .map_or(defaults.fetch, Duration::from_millis),
    };

    Ok(Action::Server(Args {
        port,
        source: config_source(matches)?,
        timeouts,
        conceal_denied: matches.get_flag(commands::ARG_CONCEAL_DENIED),
    }))
}
