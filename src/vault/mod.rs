//! Vault access used at startup to load the configuration document.

pub mod kv;

use anyhow::{Result, anyhow};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

fn vault_error_message(json_response: &Value) -> &str {
    json_response
        .get("errors")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(crate::APP_USER_AGENT).build()?)
}

/// AppRole secret id, given directly or as a response-wrapping token.
#[derive(Debug, Clone)]
pub enum SecretId {
    Plain(SecretString),
    Wrapped(SecretString),
}

/// Build `scheme://host:port{path}` from any URL on the Vault server.
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
#[instrument]
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("Error parsing URL: unsupported scheme {scheme}"))?;

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// Unwrap a response-wrapped AppRole secret id.
/// Create one with:
/// vault write -wrap-ttl=300s -f auth/approle/role/ritchie/secret-id
/// # Errors
/// Returns an error if Vault refuses the token or the response has no `secret_id`.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &SecretString) -> Result<SecretString> {
    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;

    let response = client()?
        .post(&unwrap_url)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await.unwrap_or_default();

        return Err(anyhow!(
            "{} - {}, {}",
            unwrap_url,
            status,
            vault_error_message(&json_response)
        ));
    }

    let json_response: Value = response.json().await?;
    json_response
        .get("data")
        .and_then(|v| v.get("secret_id"))
        .and_then(Value::as_str)
        .map(|sid| SecretString::from(sid.to_string()))
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))
}

/// Log in with `AppRole`; `url` is the full login endpoint,
/// e.g. `https://vault:8200/v1/auth/approle/login`.
/// # Errors
/// Returns an error if Vault refuses the credentials or the response has no `client_token`.
#[instrument(skip(secret_id))]
pub async fn approle_login(url: &str, role_id: &str, secret_id: &SecretId) -> Result<SecretString> {
    let secret_id = match secret_id {
        SecretId::Plain(sid) => sid.clone(),
        SecretId::Wrapped(token) => unwrap(url, token).await?,
    };

    let login_payload = json!({
        "role_id": role_id,
        "secret_id": secret_id.expose_secret()
    });

    debug!("login URL: {}, role ID: {}", url, role_id);

    let response = client()?.post(url).json(&login_payload).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await.unwrap_or_default();

        return Err(anyhow!(
            "{} - {}, {}",
            url,
            status,
            vault_error_message(&json_response)
        ));
    }

    let json_response: Value = response.json().await?;
    json_response
        .get("auth")
        .and_then(|v| v.get("client_token"))
        .and_then(Value::as_str)
        .map(|token| SecretString::from(token.to_string()))
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_PATH: &str = "/v1/auth/approle/login";

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn endpoint_url_fills_default_ports() -> Result<()> {
        assert_eq!(
            endpoint_url("https://vault.tld/v1/auth/approle/login", "/v1/kv/data/x")?,
            "https://vault.tld:443/v1/kv/data/x"
        );
        assert_eq!(
            endpoint_url("http://vault.tld:8200/anything", "/v1/sys/health")?,
            "http://vault.tld:8200/v1/sys/health"
        );
        Ok(())
    }

    #[test]
    fn endpoint_url_rejects_unknown_scheme() {
        assert!(endpoint_url("vault://vault.tld/", "/v1").is_err());
    }

    #[tokio::test]
    async fn login_with_plain_secret_id() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "role_id": "rid", "secret_id": "sid" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "vault-token", "lease_duration": 3600 }
            })))
            .mount(&server)
            .await;

        let url = format!("{}{LOGIN_PATH}", server.uri());
        let token = approle_login(
            &url,
            "rid",
            &SecretId::Plain(SecretString::from("sid".to_string())),
        )
        .await?;

        assert_eq!(token.expose_secret(), "vault-token");
        Ok(())
    }

    #[tokio::test]
    async fn login_unwraps_wrapped_secret_id() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/wrapping/unwrap"))
            .and(header("X-Vault-Token", "wrapping-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "secret_id": "unwrapped-sid" } })),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "role_id": "rid", "secret_id": "unwrapped-sid" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "vault-token" }
            })))
            .mount(&server)
            .await;

        let url = format!("{}{LOGIN_PATH}", server.uri());
        let token = approle_login(
            &url,
            "rid",
            &SecretId::Wrapped(SecretString::from("wrapping-token".to_string())),
        )
        .await?;

        assert_eq!(token.expose_secret(), "vault-token");
        Ok(())
    }

    #[tokio::test]
    async fn login_reports_vault_errors() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "errors": ["invalid role or secret ID"] })),
            )
            .mount(&server)
            .await;

        let url = format!("{}{LOGIN_PATH}", server.uri());
        let err = approle_login(
            &url,
            "rid",
            &SecretId::Plain(SecretString::from("bad".to_string())),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("invalid role or secret ID"));
        Ok(())
    }
}
