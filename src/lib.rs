pub mod auth;
pub mod delivery;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod models;
pub mod persistence;
pub mod quota;
pub mod server;

#[cfg(test)]
pub(crate) mod test_utils;
#[cfg(test)]
mod tests;

use crate::auth::{TicketIssuer, TokenAuthority};
use crate::delivery::DeliveryHub;
use crate::error::AppResult;
use crate::generation::{Generator, ScriptedGenerator, UpstreamGenerator};
use crate::jobs::{reconcile, Orchestrator};
use crate::models::AppConfig;
use crate::persistence::Store;
use crate::quota::QuotaLedger;
use crate::server::{AppState, CoreServices};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

fn signing_secret(config: &AppConfig) -> Vec<u8> {
    if !config.auth.secret.trim().is_empty() {
        return config.auth.secret.as_bytes().to_vec();
    }
    tracing::warn!(
        "No auth secret configured; using an ephemeral one. All credentials die with this process."
    );
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

pub fn build_services(config: &AppConfig, store: Arc<Store>) -> Arc<CoreServices> {
    let secret = signing_secret(config);
    let authority = Arc::new(TokenAuthority::new(
        &secret,
        config.auth.access_ttl_minutes * 60,
        config.auth.refresh_ttl_days * 86_400,
        store.clone(),
    ));
    let tickets = Arc::new(TicketIssuer::new(config.auth.stream_ticket_ttl_secs));
    let ledger = Arc::new(QuotaLedger::new(config.quota.clone()));
    let hub = Arc::new(DeliveryHub::new(config.delivery.live_window));

    let generator: Arc<dyn Generator> = if config.upstream.api_key.trim().is_empty() {
        tracing::warn!("No upstream API key configured; generation runs in placeholder mode");
        Arc::new(ScriptedGenerator::placeholder())
    } else {
        Arc::new(UpstreamGenerator::new(config.upstream.clone()))
    };

    let orchestrator = Orchestrator::new(
        ledger.clone(),
        hub.clone(),
        store.clone(),
        generator,
        config.jobs.clone(),
        config.delivery.clone(),
        config.quota.clone(),
    );

    Arc::new(CoreServices {
        authority,
        tickets,
        ledger,
        orchestrator,
        hub,
        store,
    })
}

pub async fn run(config: AppConfig) -> AppResult<()> {
    let store = match &config.server.db_path {
        Some(path) => Arc::new(Store::open(path)?),
        None => Arc::new(Store::open(std::path::Path::new("copyforge.db"))?),
    };
    let core = build_services(&config, store);

    reconcile::spawn_reconciler(
        core.orchestrator.clone(),
        Duration::from_secs(config.jobs.reconcile_interval_secs),
    );
    reconcile::spawn_quota_rollover(core.ledger.clone(), Duration::from_secs(300));
    reconcile::spawn_auth_maintenance(
        core.authority.clone(),
        core.tickets.clone(),
        Duration::from_secs(600),
    );

    let state = AppState {
        core,
        config: Arc::new(config),
    };
    server::serve(state).await
}
