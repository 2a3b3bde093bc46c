use crate::delivery::DeliveryHub;
use crate::generation::{GenerationParams, Generator};
use crate::jobs::Orchestrator;
use crate::models::config::{DeliveryConfig, JobConfig, QuotaConfig};
use crate::models::{AccountIdentity, Tier};
use crate::persistence::Store;
use crate::quota::QuotaLedger;
use std::sync::Arc;

pub(crate) struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub ledger: Arc<QuotaLedger>,
    pub hub: Arc<DeliveryHub>,
    pub store: Arc<Store>,
}

/// Job timings shrunk to test scale; semantics unchanged.
pub(crate) fn fast_job_config() -> JobConfig {
    JobConfig {
        pool_size: 4,
        dispatch_wait_ms: 100,
        max_duration_secs: 5,
        forced_stop_ms: 200,
        stall_timeout_secs: 60,
        reconcile_interval_secs: 1,
        terminal_retention_secs: 3600,
        retry_transient: true,
    }
}

pub(crate) fn harness_with(generator: Arc<dyn Generator>, jobs: JobConfig) -> TestHarness {
    harness_full(generator, jobs, DeliveryConfig::default())
}

pub(crate) fn harness_full(
    generator: Arc<dyn Generator>,
    jobs: JobConfig,
    delivery: DeliveryConfig,
) -> TestHarness {
    let quota = QuotaConfig::default();
    let ledger = Arc::new(QuotaLedger::new(quota.clone()));
    let hub = Arc::new(DeliveryHub::new(delivery.live_window));
    let store = Arc::new(Store::open_in_memory().unwrap());
    let orchestrator = Orchestrator::new(
        ledger.clone(),
        hub.clone(),
        store.clone(),
        generator,
        jobs,
        delivery,
        quota,
    );
    TestHarness {
        orchestrator,
        ledger,
        hub,
        store,
    }
}

pub(crate) fn identity(account_id: &str, tier: Tier) -> AccountIdentity {
    AccountIdentity {
        account_id: account_id.to_string(),
        tier,
    }
}

pub(crate) fn params() -> GenerationParams {
    GenerationParams {
        content_type: "blog_post".to_string(),
        prompt: "write a launch announcement".to_string(),
        title: Some("Launch".to_string()),
        campaign_id: None,
    }
}

/// Polls until the job reaches a terminal state or the deadline
/// passes; returns the final state name.
pub(crate) async fn wait_terminal(orchestrator: &Arc<Orchestrator>, job_id: &str) -> String {
    let result = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            if let Some(status) = orchestrator.status(job_id, None) {
                if matches!(status.state, "completed" | "failed" | "canceled") {
                    return status.state.to_string();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    result.expect("job did not reach a terminal state in time")
}
