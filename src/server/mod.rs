//! HTTP entry point.
//!
//! Routes:
//! - `POST /notify`: push notification webhook
//! - `GET|POST /history`: manual reconciliation trigger
//! - `GET /health`: readiness probe
//! - `GET /debug`: request echo with build version, credentials redacted

mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::core::ServiceContext;

/// Default request body limit (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServiceContext>,
    pub build_version: Arc<str>,
}

/// Id assigned to each request by the logging middleware
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Build the router with security headers and request logging
pub fn router(
    context: Arc<ServiceContext>,
    max_body_bytes: usize,
    build_version: impl Into<String>,
) -> Router {
    let state = AppState {
        context,
        build_version: Arc::from(build_version.into()),
    };
    Router::new()
        .route("/notify", post(handlers::notify))
        .route("/history", get(handlers::history).post(handlers::history))
        .route("/health", get(handlers::health))
        .route("/debug", get(handlers::debug))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(request_context))
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    context: Arc<ServiceContext>,
    address: &str,
    max_body_bytes: usize,
    build_version: String,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, %build_version, "Listening");

    let app = router(context, max_body_bytes, build_version);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
        .await
}

/// Short request id: first 8 characters of a v4 uuid
fn request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

async fn request_context(mut request: Request, next: Next) -> Response {
    let id = request_id();
    request.extensions_mut().insert(RequestId(id.clone()));
    let started = Instant::now();
    let span = info_span!("request", request_id = %id);

    info!(parent: &span, method = %request.method(), path = %request.uri().path(), "Request started");
    let mut response = next.run(request).instrument(span.clone()).await;
    info!(
        parent: &span,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response
}
