pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use state::{AppState, CoreServices};

use crate::error::AppResult;

pub async fn serve(state: AppState) -> AppResult<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let app = routes::build_routes(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("copyforge listening at http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
