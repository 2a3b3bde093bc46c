use crate::generation::scripted::{ScriptStep, ScriptedGenerator};
use crate::generation::{GenStream, GenerationRequest, Generator};
use crate::jobs::SubmitError;
use crate::models::config::DeliveryConfig;
use crate::models::Tier;
use crate::test_utils::{fast_job_config, harness_full, harness_with, identity, params, wait_terminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn completed_job_commits_and_persists() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::chunks(["Hello ", "world"])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "completed");

    let artifact = harness.store.get_artifact(&job_id).unwrap().unwrap();
    assert_eq!(artifact.content, "Hello world");
    assert_eq!(artifact.status, "completed");
    assert_eq!(artifact.account_id, "acc-1");

    // Committed: the unit stays consumed.
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 1);
    assert_eq!(harness.orchestrator.active_jobs("acc-1"), 0);
}

#[tokio::test(start_paused = true)]
async fn worker_failure_releases_and_discards_partial() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![
            ScriptStep::Chunk("half-finished".to_string()),
            ScriptStep::Fail {
                message: "provider exploded".to_string(),
                transient: false,
            },
        ])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "failed");

    let status = harness.orchestrator.status(&job_id, None).unwrap();
    assert_eq!(status.error.as_deref(), Some("worker_failure"));
    // No artifact boundary was reached: nothing persists.
    assert!(harness.store.get_artifact(&job_id).unwrap().is_none());
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 0);
}

#[tokio::test(start_paused = true)]
async fn failure_after_artifact_boundary_persists_degraded() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![
            ScriptStep::Chunk("finished part".to_string()),
            ScriptStep::ArtifactEnd,
            ScriptStep::Chunk("half of the next".to_string()),
            ScriptStep::Fail {
                message: "provider exploded".to_string(),
                transient: false,
            },
        ])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Professional);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "failed");

    let artifact = harness.store.get_artifact(&job_id).unwrap().unwrap();
    assert_eq!(artifact.content, "finished part");
    assert_eq!(artifact.status, "degraded");
    // Failed jobs release even when a degraded artifact persists.
    assert_eq!(
        harness.ledger.snapshot("acc-1", Tier::Professional).consumed,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn job_times_out_releases_and_persists_nothing() {
    let mut jobs = fast_job_config();
    jobs.max_duration_secs = 2;
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![
            ScriptStep::Chunk("dribble".to_string()),
            ScriptStep::Hang,
        ])),
        jobs,
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "failed");

    let status = harness.orchestrator.status(&job_id, None).unwrap();
    assert_eq!(status.error.as_deref(), Some("timeout"));
    assert!(harness.store.get_artifact(&job_id).unwrap().is_none());
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_stream_frees_the_full_quota() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![
            ScriptStep::Chunk("a".to_string()),
            ScriptStep::Chunk("b".to_string()),
            ScriptStep::Hang,
        ])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();

    // Let it get into streaming.
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let status = harness.orchestrator.status(&job_id, None).unwrap();
            if status.chunks >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let state = harness
        .orchestrator
        .cancel(&job_id, Some("acc-1"))
        .await
        .unwrap();
    assert_eq!(state.name(), "canceled");

    // The reservation came back: the account can fill its whole limit.
    for _ in 0..50 {
        harness.ledger.reserve("acc-1", Tier::Starter, 1).unwrap();
    }
    assert!(harness.ledger.reserve("acc-1", Tier::Starter, 1).is_err());
    assert!(harness.store.get_artifact(&job_id).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn exhausted_quota_rejects_without_creating_a_job() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::chunks(["never runs"])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);
    for _ in 0..50 {
        harness.ledger.reserve("acc-1", Tier::Starter, 1).unwrap();
    }

    let result = harness.orchestrator.submit(&account, params()).await;
    assert!(matches!(result, Err(SubmitError::Quota(_))));
    assert_eq!(harness.orchestrator.active_jobs("acc-1"), 0);
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 50);
}

#[tokio::test(start_paused = true)]
async fn full_pool_fails_with_unavailable_and_releases() {
    let mut jobs = fast_job_config();
    jobs.pool_size = 1;
    jobs.dispatch_wait_ms = 50;
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![ScriptStep::Hang])),
        jobs,
    );

    let first = harness
        .orchestrator
        .submit(&identity("acc-1", Tier::Starter), params())
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .submit(&identity("acc-2", Tier::Starter), params())
        .await;
    assert!(matches!(
        second,
        Err(SubmitError::Job(crate::error::JobError::Unavailable))
    ));

    // Only the dispatched job still holds quota.
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 1);
    assert_eq!(harness.ledger.snapshot("acc-2", Tier::Starter).consumed, 0);

    harness.orchestrator.cancel(&first, None).await;
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_bounds_active_jobs_per_tier() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![ScriptStep::Hang])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let first = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    let second = harness.orchestrator.submit(&account, params()).await;
    assert!(matches!(second, Err(SubmitError::ConcurrencyLimit)));

    harness.orchestrator.cancel(&first, None).await;
    assert!(harness.orchestrator.submit(&account, params()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn transient_startup_failure_retries_once_and_completes() {
    struct FlakyOnce {
        tripped: AtomicBool,
    }
    impl Generator for FlakyOnce {
        fn generate(&self, request: &GenerationRequest) -> GenStream {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                ScriptedGenerator::new(vec![ScriptStep::Fail {
                    message: "upstream connect timeout".to_string(),
                    transient: true,
                }])
                .generate(request)
            } else {
                ScriptedGenerator::chunks(["recovered"]).generate(request)
            }
        }
    }

    let harness = harness_with(
        Arc::new(FlakyOnce {
            tripped: AtomicBool::new(false),
        }),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "completed");

    let artifact = harness.store.get_artifact(&job_id).unwrap().unwrap();
    assert_eq!(artifact.content, "recovered");
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_failure_fails_after_one_retry() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![ScriptStep::Fail {
            message: "upstream connect timeout".to_string(),
            transient: true,
        }])),
        fast_job_config(),
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "failed");
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 0);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_forces_stalled_jobs_to_failed() {
    let mut jobs = fast_job_config();
    jobs.stall_timeout_secs = 0;
    let harness = harness_with(
        Arc::new(ScriptedGenerator::new(vec![ScriptStep::Hang])),
        jobs,
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 1);

    let forced = harness.orchestrator.reconcile_pass();
    assert_eq!(forced, 1);

    let status = harness.orchestrator.status(&job_id, None).unwrap();
    assert_eq!(status.state, "failed");
    // No leaked reservation after the sweep.
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 0);

    // A second pass finds nothing to force.
    assert_eq!(harness.orchestrator.reconcile_pass(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_viewer_cancels_after_grace() {
    let delivery = DeliveryConfig {
        live_window: 64,
        grace_ms: 30,
        cancel_on_abandon: true,
    };
    let harness = harness_full(
        Arc::new(ScriptedGenerator::new(vec![
            ScriptStep::Chunk("a".to_string()),
            ScriptStep::Hang,
        ])),
        fast_job_config(),
        delivery,
    );
    let account = identity("acc-1", Tier::Starter);

    let job_id = harness
        .orchestrator
        .submit(&account, params())
        .await
        .unwrap();

    let mut feed = harness.hub.attach("sess-1", &job_id, 0).unwrap();
    let first = feed.next().await.unwrap();
    assert!(matches!(
        first,
        crate::delivery::ServerFrame::Chunk { seq: 1, .. }
    ));

    drop(feed);
    harness.hub.detach(&job_id, "sess-1");
    harness.orchestrator.on_viewer_lost(&job_id);

    assert_eq!(wait_terminal(&harness.orchestrator, &job_id).await, "canceled");
    assert_eq!(harness.ledger.snapshot("acc-1", Tier::Starter).consumed, 0);
}

#[tokio::test(start_paused = true)]
async fn status_is_scoped_to_the_owning_account() {
    let harness = harness_with(
        Arc::new(ScriptedGenerator::chunks(["x"])),
        fast_job_config(),
    );
    let job_id = harness
        .orchestrator
        .submit(&identity("acc-1", Tier::Starter), params())
        .await
        .unwrap();

    assert!(harness.orchestrator.status(&job_id, Some("acc-1")).is_some());
    assert!(harness.orchestrator.status(&job_id, Some("acc-2")).is_none());
    assert!(harness
        .orchestrator
        .cancel(&job_id, Some("acc-2"))
        .await
        .is_none());
}
