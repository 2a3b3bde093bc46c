use crate::delivery::{ChunkBuffer, DeliveryHub, ServerFrame};
use crate::error::{JobError, QuotaError};
use crate::generation::{GenEvent, GenerationParams, GenerationRequest, Generator};
use crate::jobs::state::{JobRecord, JobState};
use crate::jobs::worker::{StopSignal, WorkerPool};
use crate::models::config::{DeliveryConfig, JobConfig, QuotaConfig};
use crate::models::AccountIdentity;
use crate::persistence::{ArtifactStatus, Store};
use crate::quota::QuotaLedger;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("account has reached its concurrent job cap")]
    ConcurrencyLimit,
    #[error(transparent)]
    Job(#[from] JobError),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub chunks: u64,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<i64>,
}

enum Settle {
    Completed,
    Failed(JobError),
    Canceled,
}

/// Drives every job from request to terminal state. The one invariant
/// everything here serves: a reservation is settled exactly once,
/// commit on Completed, release on every other exit. The transition
/// table refuses double terminals and the handle's one-way state cell
/// absorbs whatever still races.
pub struct Orchestrator {
    jobs: DashMap<String, Arc<Mutex<JobRecord>>>,
    stops: DashMap<String, StopSignal>,
    active: DashMap<String, u32>,
    ledger: Arc<QuotaLedger>,
    pool: WorkerPool,
    hub: Arc<DeliveryHub>,
    store: Arc<Store>,
    generator: Arc<dyn Generator>,
    jobs_config: JobConfig,
    delivery_config: DeliveryConfig,
    quota_config: QuotaConfig,
    // Handle to ourselves for the tasks run_job/on_viewer_lost spawn.
    weak_self: std::sync::Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<QuotaLedger>,
        hub: Arc<DeliveryHub>,
        store: Arc<Store>,
        generator: Arc<dyn Generator>,
        jobs_config: JobConfig,
        delivery_config: DeliveryConfig,
        quota_config: QuotaConfig,
    ) -> Arc<Self> {
        let pool = WorkerPool::new(
            jobs_config.pool_size,
            Duration::from_millis(jobs_config.dispatch_wait_ms),
        );
        Arc::new_cyclic(|weak| Self {
            jobs: DashMap::new(),
            stops: DashMap::new(),
            active: DashMap::new(),
            ledger,
            pool,
            hub,
            store,
            generator,
            jobs_config,
            delivery_config,
            quota_config,
            weak_self: weak.clone(),
        })
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Request -> Reserved -> Dispatched, or an error the HTTP layer
    /// maps straight through (429 for quota, 503 for capacity). A job
    /// that fails reservation leaves no record behind.
    pub async fn submit(
        &self,
        identity: &AccountIdentity,
        params: GenerationParams,
    ) -> Result<String, SubmitError> {
        let cap = self.quota_config.policy(identity.tier).max_concurrent_jobs;
        {
            let mut active = self
                .active
                .entry(identity.account_id.clone())
                .or_insert(0);
            if *active >= cap {
                return Err(SubmitError::ConcurrencyLimit);
            }
            *active += 1;
        }

        let handle = match self.ledger.reserve(&identity.account_id, identity.tier, 1) {
            Ok(handle) => handle,
            Err(e) => {
                self.dec_active(&identity.account_id);
                return Err(SubmitError::Quota(e));
            }
        };

        let job_id = uuid::Uuid::new_v4().to_string();
        let buffer = Arc::new(ChunkBuffer::new());
        let request = GenerationRequest {
            job_id: job_id.clone(),
            account_id: identity.account_id.clone(),
            params,
        };
        let mut record = JobRecord::new(
            job_id.clone(),
            identity.account_id.clone(),
            identity.tier,
            request,
            buffer.clone(),
        );
        record.reservation = Some(handle);
        record.transition(JobState::Reserved);

        let job = Arc::new(Mutex::new(record));
        self.jobs.insert(job_id.clone(), job.clone());
        self.hub.register(&job_id, buffer);

        let permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.settle(&job_id, Settle::Failed(JobError::Unavailable));
                return Err(SubmitError::Job(e));
            }
        };

        let (stop, stop_rx) = StopSignal::new();
        self.stops.insert(job_id.clone(), stop);
        job.lock().transition(JobState::Dispatched);

        let Some(orchestrator) = self.weak_self.upgrade() else {
            self.settle(&job_id, Settle::Failed(JobError::Unavailable));
            return Err(SubmitError::Job(JobError::Unavailable));
        };
        let spawned_job = job.clone();
        tokio::spawn(async move {
            orchestrator.run_job(spawned_job, permit, stop_rx).await;
        });

        Ok(job_id)
    }

    async fn run_job(
        self: Arc<Self>,
        job: Arc<Mutex<JobRecord>>,
        permit: tokio::sync::OwnedSemaphorePermit,
        mut stop_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let _permit = permit;
        let (job_id, request, reservation) = {
            let record = job.lock();
            (
                record.id.clone(),
                record.request.clone(),
                record.reservation.clone(),
            )
        };
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.jobs_config.max_duration_secs);
        let mut attempt = 0u32;

        'attempts: loop {
            if job.lock().state.is_terminal() {
                return;
            }
            attempt += 1;
            let mut stream = self.generator.generate(&request);
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            self.settle(&job_id, Settle::Canceled);
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        self.settle(&job_id, Settle::Failed(JobError::Timeout));
                        return;
                    }
                    event = stream.next() => match event {
                        Some(Ok(GenEvent::Delta(text))) => {
                            {
                                let mut record = job.lock();
                                if record.state.is_terminal() {
                                    // Reconciliation or a forced cancel
                                    // already settled this job.
                                    return;
                                }
                                if record.state == JobState::Dispatched {
                                    record.transition(JobState::Streaming);
                                }
                                record.touch();
                            }
                            self.hub.push(&job_id, text);
                        }
                        Some(Ok(GenEvent::ArtifactEnd)) => {
                            let mut record = job.lock();
                            record.artifact_mark = record.buffer.len();
                            record.touch();
                        }
                        Some(Err(failure)) => {
                            // Retry only startup failures: once output
                            // exists, a second attempt would duplicate
                            // chunks in the buffer.
                            let retryable = failure.transient
                                && attempt == 1
                                && self.jobs_config.retry_transient
                                && job.lock().buffer.is_empty()
                                && reservation
                                    .as_ref()
                                    .is_some_and(|h| self.ledger.reservation_valid(h));
                            if retryable {
                                tracing::warn!(
                                    "Job {} transient worker failure, retrying once: {}",
                                    job_id,
                                    failure
                                );
                                continue 'attempts;
                            }
                            self.settle(
                                &job_id,
                                Settle::Failed(JobError::WorkerFailure(failure.message)),
                            );
                            return;
                        }
                        None => {
                            self.settle(&job_id, Settle::Completed);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// The single exit path. Applies the terminal transition (refused
    /// if some other path won the race), settles the reservation, and
    /// hands the artifact to the content store.
    fn settle(&self, job_id: &str, outcome: Settle) -> bool {
        let Some(job) = self.jobs.get(job_id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let (account_id, reservation, content) = {
            let mut record = job.lock();
            let target = match &outcome {
                Settle::Completed => JobState::Completed,
                Settle::Failed(e) => JobState::Failed(e.clone()),
                Settle::Canceled => JobState::Canceled,
            };
            if !record.transition(target) {
                return false;
            }
            let content = match &outcome {
                Settle::Completed => Some((record.buffer.assembled(), ArtifactStatus::Completed)),
                // A failure after a complete artifact boundary keeps
                // the finished part, flagged degraded.
                Settle::Failed(JobError::WorkerFailure(_)) if record.artifact_mark > 0 => Some((
                    record.buffer.assembled_upto(record.artifact_mark),
                    ArtifactStatus::Degraded,
                )),
                _ => None,
            };
            (
                record.account_id.clone(),
                record.reservation.clone(),
                content,
            )
        };

        if let Some(handle) = &reservation {
            match &outcome {
                Settle::Completed => self.ledger.commit(handle),
                _ => self.ledger.release(handle),
            }
        }

        if let Some((text, status)) = content {
            if let Err(e) = self.store.save_artifact(&account_id, job_id, &text, status) {
                tracing::error!("Failed to persist artifact for job {}: {}", job_id, e);
            }
        }

        let frame = match &outcome {
            Settle::Completed => ServerFrame::Complete {
                job_id: job_id.to_string(),
            },
            Settle::Failed(e) => ServerFrame::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
            Settle::Canceled => ServerFrame::Canceled {
                job_id: job_id.to_string(),
            },
        };
        self.hub.finish(job_id, frame);

        self.dec_active(&account_id);
        self.stops.remove(job_id);
        true
    }

    /// Cooperative cancel: raise the stop flag, give the worker the
    /// forced-stop window to acknowledge, then settle it ourselves.
    pub async fn cancel(&self, job_id: &str, account_id: Option<&str>) -> Option<JobState> {
        let job = self.jobs.get(job_id).map(|entry| entry.value().clone())?;
        {
            let record = job.lock();
            if let Some(expected) = account_id {
                if record.account_id != expected {
                    return None;
                }
            }
            if record.state.is_terminal() {
                return Some(record.state.clone());
            }
        }

        if let Some(stop) = self.stops.get(job_id) {
            stop.raise();
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.jobs_config.forced_stop_ms);
        loop {
            if job.lock().state.is_terminal() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Job {} did not acknowledge stop in time, forcing cancellation",
                    job_id
                );
                self.settle(job_id, Settle::Canceled);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let final_state = job.lock().state.clone();
        Some(final_state)
    }

    /// Called when the attached viewer detaches. After the grace
    /// window an abandoned streaming job is canceled; a job nobody
    /// ever watched is left to finish and persist.
    pub fn on_viewer_lost(&self, job_id: &str) {
        if !self.delivery_config.cancel_on_abandon {
            return;
        }
        let Some(orchestrator) = self.weak_self.upgrade() else {
            return;
        };
        let job_id = job_id.to_string();
        let grace = Duration::from_millis(self.delivery_config.grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if orchestrator.hub.has_session(&job_id) {
                return;
            }
            let Some(job) = orchestrator
                .jobs
                .get(&job_id)
                .map(|entry| entry.value().clone())
            else {
                return;
            };
            if job.lock().state.is_terminal() {
                return;
            }
            tracing::info!("Job {} abandoned by its viewer, canceling", job_id);
            orchestrator.cancel(&job_id, None).await;
        });
    }

    pub fn status(&self, job_id: &str, account_id: Option<&str>) -> Option<JobStatus> {
        let job = self.jobs.get(job_id)?;
        let record = job.lock();
        if let Some(expected) = account_id {
            if record.account_id != expected {
                return None;
            }
        }
        let error = match &record.state {
            JobState::Failed(e) => Some(e.code().to_string()),
            _ => None,
        };
        Some(JobStatus {
            job_id: record.id.clone(),
            state: record.state.name(),
            error,
            chunks: record.buffer.len(),
            created_at: record.created_at,
            started_at: record.started_at,
            terminal_at: record.terminal_at,
        })
    }

    pub fn owns_job(&self, job_id: &str, account_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .is_some_and(|job| job.lock().account_id == account_id)
    }

    /// Recovery sweep: force-fail jobs with no forward progress past
    /// the stall timeout (their reservations are released through the
    /// same settle path), and purge terminal records past retention.
    pub fn reconcile_pass(&self) -> usize {
        let stall = Duration::from_secs(self.jobs_config.stall_timeout_secs);
        let retention = self.jobs_config.terminal_retention_secs as i64;
        let now = chrono::Utc::now().timestamp();

        let snapshot: Vec<(String, Arc<Mutex<JobRecord>>)> = self
            .jobs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut forced = 0;
        let mut purge = Vec::new();
        for (job_id, job) in snapshot {
            let (terminal, stalled, terminal_at) = {
                let record = job.lock();
                (
                    record.state.is_terminal(),
                    record.last_progress.elapsed() > stall,
                    record.terminal_at,
                )
            };
            if !terminal && stalled {
                tracing::warn!(
                    "Job {} made no progress past the stall timeout, forcing failure",
                    job_id
                );
                if let Some(stop) = self.stops.get(&job_id) {
                    stop.raise();
                }
                if self.settle(
                    &job_id,
                    Settle::Failed(JobError::WorkerFailure("job stalled".to_string())),
                ) {
                    forced += 1;
                }
            } else if terminal && terminal_at.is_some_and(|at| now - at > retention) {
                purge.push(job_id);
            }
        }

        for job_id in purge {
            self.jobs.remove(&job_id);
            self.hub.remove(&job_id);
            self.stops.remove(&job_id);
        }
        forced
    }

    pub fn active_jobs(&self, account_id: &str) -> u32 {
        self.active
            .get(account_id)
            .map(|count| *count)
            .unwrap_or(0)
    }

    fn dec_active(&self, account_id: &str) {
        if let Some(mut count) = self.active.get_mut(account_id) {
            *count = count.saturating_sub(1);
        }
    }
}
