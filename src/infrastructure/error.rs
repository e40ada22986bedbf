use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transient service error: {0}")]
    Transient(String),
    #[error("Permanent service error: {0}")]
    Permanent(String),
}

impl SyncError {
    /// Transient errors are eligible for a bounded retry before the event
    /// they belong to is recorded as failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}
