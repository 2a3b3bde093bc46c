use crate::server::state::CoreServices;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or(Some(s)))
        .or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|h| h.to_str().ok())
        })
}

/// Bearer verification for the authenticated surface. On success the
/// caller identity rides in request extensions and the response gains
/// the quota observability headers.
pub async fn auth_middleware(
    State(core): State<Arc<CoreServices>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::info!("Request: {} {}", method, path);

    let Some(token) = bearer_token(&request) else {
        return unauthorized("invalid");
    };
    let identity = match core.authority.verify(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!("Rejected bearer credential on {}: {}", path, e);
            return unauthorized(e.code());
        }
    };

    let (mut parts, body) = request.into_parts();
    parts.extensions.insert(identity.clone());
    let request = Request::from_parts(parts, body);

    let mut response = next.run(request).await;
    // Snapshot after the handler so a reservation made by this very
    // request is already reflected in the headers.
    let snapshot = core.ledger.snapshot(&identity.account_id, identity.tier);
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&snapshot.limit.to_string()) {
        headers.insert("x-quota-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&snapshot.remaining.to_string()) {
        headers.insert("x-quota-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&snapshot.reset_at.to_string()) {
        headers.insert("x-quota-reset", value);
    }
    response
}

fn unauthorized(code: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
