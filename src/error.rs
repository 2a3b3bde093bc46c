use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Credential verification and rotation failures. Surfaced to the
/// caller as-is, never retried internally.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("credential expired")]
    Expired,
    #[error("credential invalid")]
    Invalid,
    #[error("credential revoked")]
    Revoked,
    #[error("refresh credential already rotated")]
    Reused,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Expired => "expired",
            AuthError::Invalid => "invalid",
            AuthError::Revoked => "revoked",
            AuthError::Reused => "reused",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaError {
    #[error("quota exceeded for the current period")]
    Exceeded,
}

/// Terminal job failures. Carried in the Failed state and on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("no worker capacity available")]
    Unavailable,
    #[error("job exceeded its maximum duration")]
    Timeout,
    #[error("worker failure: {0}")]
    WorkerFailure(String),
    #[error("job canceled")]
    Canceled,
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Unavailable => "unavailable",
            JobError::Timeout => "timeout",
            JobError::WorkerFailure(_) => "worker_failure",
            JobError::Canceled => "canceled",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery session lost")]
    SessionLost,
}
