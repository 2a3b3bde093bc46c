pub mod orchestrator;
pub mod reconcile;
pub mod state;
pub mod worker;

pub use orchestrator::{JobStatus, Orchestrator, SubmitError};
pub use state::{JobRecord, JobState};
pub use worker::WorkerPool;
