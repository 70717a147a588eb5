use clap::{Arg, ArgGroup, Command};

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_KV_MOUNT: &str = "vault-kv-mount";
pub const ARG_VAULT_KV_PATH: &str = "vault-kv-path";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault AppRole login URL, e.g. https://vault.tld:8200/v1/auth/approle/login")
                .env("RITCHIE_VAULT_URL"),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault role id")
                .env("RITCHIE_VAULT_ROLE_ID")
                .requires(ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault secret id")
                .env("RITCHIE_VAULT_SECRET_ID")
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN)
                .requires(ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Response-wrapped Vault secret id")
                .env("RITCHIE_VAULT_WRAPPED_TOKEN")
                .requires(ARG_VAULT_URL),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_MOUNT)
                .long(ARG_VAULT_KV_MOUNT)
                .help("KV v2 secrets engine mount path")
                .env("RITCHIE_VAULT_KV_MOUNT")
                .default_value("secret"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_PATH)
                .long(ARG_VAULT_KV_PATH)
                .help("Path of the secret holding the configuration document")
                .env("RITCHIE_VAULT_KV_PATH")
                .default_value("ritchie"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN])
                .multiple(true),
        )
}
