use crate::auth::{hash_password, password_matches};
use crate::models::{Account, AccountIdentity, Tier};
use crate::server::state::CoreServices;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn signup(
    State(core): State<Arc<CoreServices>>,
    Json(body): Json<SignupRequest>,
) -> Response {
    let email = body.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') || body.password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_signup" })),
        )
            .into_response();
    }

    let account = Account::new(
        uuid::Uuid::new_v4().to_string(),
        email,
        hash_password(&body.password),
        Tier::Starter,
    );
    match core.store.create_account(&account) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({
                "id": account.id,
                "email": account.email,
                "tier": account.tier.as_str(),
            })),
        )
            .into_response(),
        Err(crate::error::AppError::Account(e)) => {
            tracing::debug!("Signup rejected: {}", e);
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": "email_taken" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Signup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn login(
    State(core): State<Arc<CoreServices>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let email = body.email.trim().to_ascii_lowercase();
    let account = match core.store.find_account_by_email(&email) {
        Ok(Some(account)) if password_matches(&body.password, &account.password_hash) => account,
        Ok(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid_credentials" })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("Login lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match core.authority.issue(&account.id, account.tier) {
        Ok(pair) => Json(pair).into_response(),
        Err(e) => {
            tracing::error!("Credential issue failed for {}: {}", account.id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn refresh(
    State(core): State<Arc<CoreServices>>,
    Json(body): Json<RefreshRequest>,
) -> Response {
    match core.authority.refresh(&body.refresh_token) {
        Ok(pair) => Json(pair).into_response(),
        Err(e) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": e.code() })),
        )
            .into_response(),
    }
}

pub async fn logout(
    State(core): State<Arc<CoreServices>>,
    Extension(identity): Extension<AccountIdentity>,
) -> Response {
    core.authority.revoke_account(&identity.account_id);
    Json(json!({ "message": "logged out" })).into_response()
}

/// One-time exchange ticket for the WebSocket handshake; the bearer
/// credential stays out of the socket URL.
pub async fn stream_ticket(
    State(core): State<Arc<CoreServices>>,
    Extension(identity): Extension<AccountIdentity>,
) -> Response {
    let ticket = core.tickets.issue(&identity);
    Json(json!({ "ticket": ticket })).into_response()
}
