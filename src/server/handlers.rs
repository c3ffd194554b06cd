use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::core::{Dispatch, PassError};
use crate::domain::MailboxNotification;

use super::{AppState, RequestId};

/// Headers never echoed back by `/debug`
fn is_redacted(name: &header::HeaderName) -> bool {
    name == header::AUTHORIZATION || name == header::COOKIE || name == header::PROXY_AUTHORIZATION
}

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.context.is_ready() {
        "ok"
    } else {
        "initializing"
    };
    Json(json!({
        "status": status,
        "time": Utc::now().to_rfc3339(),
    }))
}

pub(super) async fn debug(
    State(state): State<AppState>,
    Extension(RequestId(id)): Extension<RequestId>,
    remote: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut echoed: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        let value = if is_redacted(name) {
            "[redacted]".to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        echoed.entry(name.as_str().to_string()).or_default().push(value);
    }

    Json(json!({
        "id": id,
        "ready": state.context.is_ready(),
        "timestamp": Utc::now().to_rfc3339(),
        "build_version": &*state.build_version,
        "request": {
            "method": method.as_str(),
            "uri": uri.to_string(),
            "proto": format!("{:?}", version),
            "headers": echoed,
            "remote_addr": remote.map(|ConnectInfo(addr)| addr.to_string()),
        },
    }))
}

pub(super) async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.contains("application/json") {
        warn!(content_type, "Invalid content type");
        return (StatusCode::BAD_REQUEST, "Invalid content type").into_response();
    }

    if !state.context.is_ready() {
        warn!("Notification before service ready");
        return (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable").into_response();
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };
    if body.is_empty() {
        warn!("Empty request body");
        return (StatusCode::BAD_REQUEST, "Empty request body").into_response();
    }

    let notification = match MailboxNotification::decode(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Invalid notification");
            return (StatusCode::BAD_REQUEST, format!("Invalid notification: {}", e))
                .into_response();
        }
    };

    match state.context.notify(&notification).await {
        Ok(Dispatch::Ran(report)) => {
            info!(%report, "Notification processed");
            (StatusCode::OK, "OK").into_response()
        }
        Ok(Dispatch::Coalesced) => (StatusCode::OK, "Coalesced into running pass").into_response(),
        Ok(Dispatch::Ignored) => (StatusCode::OK, "Ignored").into_response(),
        Err(e) => pass_failure(e),
    }
}

pub(super) async fn history(State(state): State<AppState>) -> Response {
    match state.context.trigger().await {
        Ok(report) => {
            info!(%report, "Manual reconciliation finished");
            (StatusCode::OK, format!("History processed: {}\n", report)).into_response()
        }
        Err(e) => pass_failure(e),
    }
}

/// Pass-level failures are retryable by the push system, except an
/// expired cursor, which needs a re-seed first.
fn pass_failure(e: PassError) -> Response {
    let status = match &e {
        PassError::CursorExpired(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PassError::NotReady | PassError::Mailbox(_) | PassError::Checkpoint(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    error!(error = %e, status = status.as_u16(), "Reconciliation pass failed");
    (status, e.to_string()).into_response()
}
