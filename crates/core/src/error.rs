use thiserror::Error;

use crate::types::{EnrollmentKey, EnrollmentStatus};

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Enrollment already live for {0}")]
    DuplicateEnrollment(EnrollmentKey),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid enrollment transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },

    #[error("Claim superseded for enrollment {0}")]
    StaleClaim(String),

    #[error("Lock contention on {0}")]
    LockContention(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Campaign unavailable: {0}")]
    CampaignUnavailable(String),

    #[error("Enrollment store error: {0}")]
    Store(String),

    #[error("Lock backend error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DripError {
    /// Errors that bulk enrollment paths treat as a successful no-op.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DripError::DuplicateEnrollment(_))
    }
}
