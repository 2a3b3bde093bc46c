use crate::delivery::ChunkBuffer;
use crate::error::JobError;
use crate::generation::GenerationRequest;
use crate::models::Tier;
use crate::quota::ReservationHandle;
use std::sync::Arc;
use std::time::Instant;

/// Job lifecycle. Commit and release are the only exits from a held
/// reservation, and every terminal transition settles exactly one of
/// them; the transition table below is what makes that checkable.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Requested,
    Reserved,
    Dispatched,
    Streaming,
    Completed,
    Failed(JobError),
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed(_) | JobState::Canceled
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Requested => "requested",
            JobState::Reserved => "reserved",
            JobState::Dispatched => "dispatched",
            JobState::Streaming => "streaming",
            JobState::Completed => "completed",
            JobState::Failed(_) => "failed",
            JobState::Canceled => "canceled",
        }
    }

    pub fn can_transition(from: &JobState, to: &JobState) -> bool {
        use JobState::*;
        match (from, to) {
            (Requested, Reserved) => true,
            (Reserved, Dispatched) | (Reserved, Failed(_)) | (Reserved, Canceled) => true,
            (Dispatched, Streaming)
            | (Dispatched, Completed)
            | (Dispatched, Failed(_))
            | (Dispatched, Canceled) => true,
            (Streaming, Completed) | (Streaming, Failed(_)) | (Streaming, Canceled) => true,
            _ => false,
        }
    }
}

pub struct JobRecord {
    pub id: String,
    pub account_id: String,
    pub tier: Tier,
    pub request: GenerationRequest,
    pub state: JobState,
    pub reservation: Option<Arc<ReservationHandle>>,
    pub buffer: Arc<ChunkBuffer>,
    /// Chunk count at the most recent complete-artifact boundary.
    pub artifact_mark: u64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub terminal_at: Option<i64>,
    pub last_progress: Instant,
}

impl JobRecord {
    pub fn new(
        id: String,
        account_id: String,
        tier: Tier,
        request: GenerationRequest,
        buffer: Arc<ChunkBuffer>,
    ) -> Self {
        Self {
            id,
            account_id,
            tier,
            request,
            state: JobState::Requested,
            reservation: None,
            buffer,
            artifact_mark: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            terminal_at: None,
            last_progress: Instant::now(),
        }
    }

    /// Applies a transition if the table allows it. Refusals are the
    /// guard against double-settling a job from racing exits.
    pub fn transition(&mut self, to: JobState) -> bool {
        if !JobState::can_transition(&self.state, &to) {
            tracing::debug!(
                "Job {} refused transition {} -> {}",
                self.id,
                self.state.name(),
                to.name()
            );
            return false;
        }
        tracing::debug!(
            "Job {} transition {} -> {}",
            self.id,
            self.state.name(),
            to.name()
        );
        if matches!(to, JobState::Streaming) && self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
        if to.is_terminal() {
            self.terminal_at = Some(chrono::Utc::now().timestamp());
        }
        self.state = to;
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.last_progress = Instant::now();
    }
}
