use crate::generation::GenerationParams;
use crate::jobs::SubmitError;
use crate::models::AccountIdentity;
use crate::server::state::CoreServices;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

pub async fn generate(
    State(core): State<Arc<CoreServices>>,
    Extension(identity): Extension<AccountIdentity>,
    Json(params): Json<GenerationParams>,
) -> Response {
    if !crate::generation::is_supported_content_type(&params.content_type)
        || params.prompt.trim().is_empty()
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_request" })),
        )
            .into_response();
    }
    match core.orchestrator.submit(&identity, params).await {
        Ok(job_id) => Json(json!({ "job_id": job_id })).into_response(),
        Err(SubmitError::Quota(_)) => {
            let snapshot = core.ledger.snapshot(&identity.account_id, identity.tier);
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "quota_exceeded",
                    "limit": snapshot.limit,
                    "remaining": snapshot.remaining,
                    "reset_at": snapshot.reset_at,
                })),
            )
                .into_response()
        }
        Err(SubmitError::ConcurrencyLimit) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "concurrent_limit" })),
        )
            .into_response(),
        Err(SubmitError::Job(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.code() })),
        )
            .into_response(),
    }
}

/// Poll path: a client that lost its socket entirely still gets the
/// job's terminal outcome here.
pub async fn job_status(
    State(core): State<Arc<CoreServices>>,
    Extension(identity): Extension<AccountIdentity>,
    Path(job_id): Path<String>,
) -> Response {
    match core
        .orchestrator
        .status(&job_id, Some(&identity.account_id))
    {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job_not_found" })),
        )
            .into_response(),
    }
}

pub async fn cancel(
    State(core): State<Arc<CoreServices>>,
    Extension(identity): Extension<AccountIdentity>,
    Path(job_id): Path<String>,
) -> Response {
    match core
        .orchestrator
        .cancel(&job_id, Some(&identity.account_id))
        .await
    {
        Some(state) => Json(json!({ "job_id": job_id, "state": state.name() })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job_not_found" })),
        )
            .into_response(),
    }
}
