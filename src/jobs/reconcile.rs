use crate::auth::TokenAuthority;
use crate::auth::TicketIssuer;
use crate::jobs::Orchestrator;
use crate::quota::QuotaLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodic recovery: a crash or hung worker anywhere between a
/// reservation and a terminal state is repaired here, so quota can
/// never leak permanently.
pub fn spawn_reconciler(orchestrator: Arc<Orchestrator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let forced = orchestrator.reconcile_pass();
            if forced > 0 {
                tracing::warn!("Reconciliation forced {} stalled job(s) to Failed", forced);
            }
        }
    })
}

/// Scheduled idempotent reset of per-account counters at the period
/// boundary.
pub fn spawn_quota_rollover(ledger: Arc<QuotaLedger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            ledger.roll_over();
        }
    })
}

/// Ages out denylist entries whose tokens have expired on their own,
/// and stream tickets nobody redeemed.
pub fn spawn_auth_maintenance(
    authority: Arc<TokenAuthority>,
    tickets: Arc<TicketIssuer>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            authority.denylist().purge_expired();
            tickets.purge_expired();
        }
    })
}
