//! End-to-end `GET /tree` resolution against mocked Keycloak and repository
//! remotes.

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use ritchie::{
    api::{self, Policy},
    config::Configuration,
    identity::KeycloakGateway,
    tree::{HttpTreeFetcher, Timeouts, TreeResolver},
};
use serde_json::{Value, json};
use std::{net::TcpListener, sync::Arc, time::Duration};
use tower::ServiceExt;
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTROSPECT_PATH: &str = "/realms/ritchie/protocol/openid-connect/token/introspect";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn document(keycloak: &str, remote: &str) -> String {
    json!({
        "securityConstraints": {
            "constraints": [
                { "pattern": "/tree", "roleMappings": { "admin": ["GET"], "user": ["GET"] } }
            ],
            "publicConstraints": []
        },
        "organizations": {
            "zup": {
                "keycloakConfig": {
                    "url": keycloak,
                    "realm": "ritchie",
                    "clientId": "user-login",
                    "clientSecret": "user-login"
                },
                "repositoryConfig": [
                    {
                        "name": "commons",
                        "priority": 0,
                        "treePath": "/tree/tree.json",
                        "remote": remote,
                        "serverUrl": "http://localhost:3000",
                        "replaceRepoUrl": "http://localhost:3000/formulas"
                    },
                    {
                        "name": "private",
                        "priority": 1,
                        "treePath": "/tree/private.json",
                        "remote": remote,
                        "serverUrl": "http://localhost:3000",
                        "replaceRepoUrl": "http://localhost:3000/private",
                        "username": "reader",
                        "password": "s3cret"
                    }
                ]
            }
        }
    })
    .to_string()
}

async fn mount_keycloak(server: &MockServer) {
    for (token, roles) in [("admin-token", json!(["admin"])), ("user-token", json!(["user"]))] {
        Mock::given(method("POST"))
            .and(path(INTROSPECT_PATH))
            .and(basic_auth("user-login", "user-login"))
            .and(body_string_contains(format!("token={token}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "realm_access": { "roles": roles }
            })))
            .mount(server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path(INTROSPECT_PATH))
        .and(body_string_contains("token=expired-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": false })))
        .mount(server)
        .await;
}

async fn mount_remote(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/tree/tree.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "1.0.0",
            "commands": [
                { "usage": "rit", "parent": "root" },
                {
                    "usage": "coffee",
                    "parent": "root_scaffold",
                    "formula": { "path": "scaffold/coffee", "repoUrl": "http://localhost:3000/scaffold" }
                },
                { "usage": "deploy", "parent": "root", "roles": ["admin"] }
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tree/private.json"))
        .and(basic_auth("reader", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "commands": [ { "usage": "secret", "formula": { "path": "secret" } } ]
        })))
        .mount(server)
        .await;
}

async fn app(policy: Policy) -> Result<(Router, MockServer, MockServer)> {
    let keycloak = MockServer::start().await;
    let remote = MockServer::start().await;
    mount_keycloak(&keycloak).await;
    mount_remote(&remote).await;

    let configuration = Configuration::from_json(&document(&keycloak.uri(), &remote.uri()))?;
    let timeouts = Timeouts {
        identity: Duration::from_secs(2),
        fetch: Duration::from_secs(2),
    };

    let resolver = TreeResolver::new(
        Arc::new(configuration.clone()),
        Arc::new(KeycloakGateway::new(
            configuration.identity_realms(),
            timeouts.identity,
        )?),
        Arc::new(HttpTreeFetcher::new(timeouts.fetch)?),
        Arc::new(configuration.security_constraints.clone()),
        timeouts,
    );

    Ok((api::app(Arc::new(resolver), policy), keycloak, remote))
}

fn get_tree(repo: &str, token: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("GET")
        .uri("/tree")
        .header("x-org", "zup")
        .header("x-repo-name", repo)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?)
}

async fn json_body(response: axum::response::Response) -> Result<Value> {
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn admin_receives_full_shaped_tree() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, _remote) = app(Policy::default()).await?;

    let response = app.oneshot(get_tree("commons", "admin-token")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let tree = json_body(response).await?;
    assert_eq!(tree["version"], "1.0.0");
    let commands = tree["commands"].as_array().cloned().unwrap_or_default();
    assert_eq!(commands.len(), 3);
    assert!(commands.iter().all(|command| command["repo"] == "commons"));
    assert_eq!(
        commands[1]["formula"]["repoUrl"],
        "http://localhost:3000/formulas/scaffold"
    );
    Ok(())
}

#[tokio::test]
async fn user_does_not_see_admin_commands() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, _remote) = app(Policy::default()).await?;

    let response = app.oneshot(get_tree("commons", "user-token")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let tree = json_body(response).await?;
    let usages: Vec<&str> = tree["commands"]
        .as_array()
        .map(|commands| commands.iter().filter_map(|c| c["usage"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(usages, ["rit", "coffee"]);
    Ok(())
}

#[tokio::test]
async fn private_repository_is_fetched_with_credentials() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, _remote) = app(Policy::default()).await?;

    let response = app.oneshot(get_tree("private", "user-token")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let tree = json_body(response).await?;
    assert_eq!(tree["commands"][0]["repo"], "private");
    assert_eq!(
        tree["commands"][0]["formula"]["repoUrl"],
        "http://localhost:3000/private"
    );
    Ok(())
}

#[tokio::test]
async fn inactive_token_is_unauthorized() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, remote) = app(Policy::default()).await?;

    let response = app.oneshot(get_tree("commons", "expired-token")?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let fetched = remote.received_requests().await.unwrap_or_default();
    assert!(fetched.is_empty());
    Ok(())
}

#[tokio::test]
async fn concealed_denials_look_like_missing_repositories() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, _remote) = app(Policy {
        conceal_denied: true,
    })
    .await?;

    let denied = app
        .clone()
        .oneshot(get_tree("commons", "expired-token")?)
        .await?;
    let missing = app.oneshot(get_tree("nope", "admin-token")?).await?;

    assert_eq!(denied.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn identity_outage_is_service_unavailable() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, keycloak, _remote) = app(Policy::default()).await?;
    keycloak.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&keycloak)
        .await;

    let response = app.oneshot(get_tree("commons", "admin-token")?).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn missing_remote_tree_is_internal_error() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let (app, _keycloak, remote) = app(Policy::default()).await?;
    remote.reset().await;

    let response = app.oneshot(get_tree("commons", "admin-token")?).await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}
