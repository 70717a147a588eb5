use crate::{
    api::handlers::{health, tree},
    tree::TreeResolver,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::options,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

pub mod handlers;

pub use self::handlers::tree::Policy;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Routes documented in the `OpenAPI` document.
fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(tree::tree));

    let mut tag = Tag::new("tree");
    tag.description = Some("Formula repository trees".to_string());
    router.get_openapi_mut().tags = Some(vec![tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    let mut license = License::new(env!("CARGO_PKG_LICENSE"));
    license.identifier = Some(env!("CARGO_PKG_LICENSE").to_string());
    info.license = Some(license);

    OpenApiBuilder::new().info(info).build()
}

/// Application router with every layer applied.
///
/// Requests for known paths with an unsupported method answer `404`, the same
/// as unknown paths.
pub fn app(resolver: Arc<TreeResolver>, policy: Policy) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    let (router, _openapi) = api_router().split_for_parts();

    router
        .route("/health", options(health::health))
        .method_not_allowed_fallback(tree::not_found)
        .fallback(tree::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(resolver))
                .layer(Extension(policy)),
        )
}

/// Serve the API until ctrl-c.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, resolver: Arc<TreeResolver>, policy: Policy) -> Result<()> {
    let app = app(resolver, policy);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                info!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    // headers are not recorded, Authorization carries bearer tokens
    let org = headers
        .get("x-org")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, org, request_id)
}
