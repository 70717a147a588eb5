pub mod logging;
pub mod vault;

use clap::{
    Arg, ArgAction, ArgGroup, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_CONFIG: &str = "config";
pub const ARG_IDENTITY_TIMEOUT: &str = "identity-timeout-ms";
pub const ARG_FETCH_TIMEOUT: &str = "fetch-timeout-ms";
pub const ARG_CONCEAL_DENIED: &str = "conceal-denied";

/// Check the Vault credentials that clap cannot express as simple requirements.
///
/// # Errors
/// Returns an error string if `--vault-url` is set without a role id and a secret id or wrapped token.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    if !matches.contains_id(vault::ARG_VAULT_URL) {
        return Ok(());
    }

    if !matches.contains_id(vault::ARG_VAULT_ROLE_ID) {
        return Err("Missing required argument: --vault-role-id".to_string());
    }

    if !matches.contains_id(vault::ARG_VAULT_SECRET_ID)
        && !matches.contains_id(vault::ARG_VAULT_WRAPPED_TOKEN)
    {
        return Err(
            "Missing required argument: --vault-secret-id or --vault-wrapped-token".to_string(),
        );
    }

    Ok(())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("ritchie")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("3000")
                .env("RITCHIE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long(ARG_CONFIG)
                .help("Path to the JSON configuration document")
                .env("RITCHIE_CONFIG")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new(ARG_IDENTITY_TIMEOUT)
                .long(ARG_IDENTITY_TIMEOUT)
                .help("Identity provider request timeout in milliseconds")
                .default_value("5000")
                .env("RITCHIE_IDENTITY_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FETCH_TIMEOUT)
                .long(ARG_FETCH_TIMEOUT)
                .help("Repository remote request timeout in milliseconds")
                .default_value("10000")
                .env("RITCHIE_FETCH_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CONCEAL_DENIED)
                .long(ARG_CONCEAL_DENIED)
                .help("Answer 404 instead of 401/403 so denied callers cannot probe repositories")
                .env("RITCHIE_CONCEAL_DENIED")
                .action(ArgAction::SetTrue),
        );

    let command = vault::with_args(command).group(
        ArgGroup::new("config-source")
            .args([ARG_CONFIG, vault::ARG_VAULT_URL])
            .required(true)
            .multiple(false),
    );

    logging::with_args(command)
}
