use crate::{config::Configuration, vault};
use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{Instrument, info, info_span, instrument};

/// Secret field holding the configuration document.
pub const CONFIG_FIELD: &str = "config";

/// Read the configuration document from a KV v2 secret.
///
/// The `config` field may hold the document as a JSON string or as a nested
/// object.
/// # Errors
/// Returns an error if the Vault request fails, the field is missing, or the document is invalid.
#[instrument(skip(token))]
pub async fn read_configuration(
    vault_url: &str,
    token: &SecretString,
    kv_mount: &str,
    kv_path: &str,
) -> Result<Configuration> {
    let client = Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .build()?;
    let path = format!("/v1/{kv_mount}/data/{kv_path}");
    let url = vault::endpoint_url(vault_url, &path)?;

    let span = info_span!(
        "vault.kv.read",
        http.method = "GET",
        url = %url
    );
    let response = client
        .get(&url)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("vault kv read failed: {status} {body}"));
    }

    let json: Value = response.json().await?;
    let document = match json
        .get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(CONFIG_FIELD))
        .context("configuration missing from vault response")?
    {
        Value::String(document) => document.clone(),
        value @ Value::Object(_) => value.to_string(),
        _ => return Err(anyhow!("{CONFIG_FIELD} must be a JSON document")),
    };

    let configuration = Configuration::from_json(&document)
        .with_context(|| format!("invalid configuration in {kv_mount}/{kv_path}"))?;

    info!(
        "loaded {} organizations from vault",
        configuration.organizations.len()
    );

    Ok(configuration)
}
