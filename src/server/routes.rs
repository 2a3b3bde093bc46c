use crate::server::handlers;
use crate::server::middleware::{auth_middleware, cors_layer};
use crate::server::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

const MAX_BODY_SIZE: usize = 1024 * 1024;

pub fn build_routes(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/auth/signup", post(handlers::auth::signup))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/ws/generate", get(handlers::stream::ws_generate));

    let authed = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/stream-ticket", post(handlers::auth::stream_ticket))
        .route("/content/generate", post(handlers::content::generate))
        .route("/content/jobs/{id}", get(handlers::content::job_status))
        .route("/content/jobs/{id}/cancel", post(handlers::content::cancel))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(authed)
        .layer(cors_layer())
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}
