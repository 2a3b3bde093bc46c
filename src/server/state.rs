use crate::auth::{TicketIssuer, TokenAuthority};
use crate::delivery::DeliveryHub;
use crate::jobs::Orchestrator;
use crate::models::AppConfig;
use crate::persistence::Store;
use crate::quota::QuotaLedger;
use std::sync::Arc;

#[derive(Clone)]
pub struct CoreServices {
    pub authority: Arc<TokenAuthority>,
    pub tickets: Arc<TicketIssuer>,
    pub ledger: Arc<QuotaLedger>,
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<DeliveryHub>,
    pub store: Arc<Store>,
}

// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<CoreServices>,
    pub config: Arc<AppConfig>,
}

impl axum::extract::FromRef<AppState> for Arc<CoreServices> {
    fn from_ref(state: &AppState) -> Self {
        state.core.clone()
    }
}

impl axum::extract::FromRef<AppState> for CoreServices {
    fn from_ref(state: &AppState) -> Self {
        state.core.as_ref().clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<TokenAuthority> {
    fn from_ref(state: &AppState) -> Self {
        state.core.authority.clone()
    }
}
