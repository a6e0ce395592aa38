use domain::OrderNumber;
use thiserror::Error;

/// Errors that can occur when interacting with the repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A row changed underneath the transaction; its expected version did
    /// not match the committed one.
    #[error("Concurrent update of {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    /// The order number is already taken.
    #[error("Duplicate order number: {0}")]
    DuplicateOrderNumber(OrderNumber),

    /// The row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A row lock could not be acquired in time.
    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// The per-year order number sequence has no values left.
    #[error("Order number sequence exhausted for {0}")]
    SequenceExhausted(i32),

    /// Unexpected storage failure.
    #[error("Storage error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::DuplicateOrderNumber(_)
        )
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;
