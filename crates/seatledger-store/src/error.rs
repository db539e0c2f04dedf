//! Error types for seatledger storage.

use seatledger_core::{BuyerId, CoreError, CourseId, RefundIneligibility};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Waiting for the course lock exceeded the configured ceiling.
    #[error("lock wait timed out for course {course_id} after {waited_ms}ms")]
    LockTimeout {
        /// The contended course.
        course_id: CourseId,
        /// Configured wait ceiling.
        waited_ms: u64,
    },

    /// No inventory row for the course.
    #[error("course not found: {0}")]
    CourseNotFound(CourseId),

    /// An inventory row already exists for the course.
    #[error("course already exists: {0}")]
    CourseExists(CourseId),

    /// The buyer already holds an active purchase.
    #[error("course {course_id} already purchased by {buyer_id}")]
    AlreadyPurchased {
        /// The course.
        course_id: CourseId,
        /// The buyer.
        buyer_id: BuyerId,
    },

    /// No seats left.
    #[error("course sold out: {0}")]
    SoldOut(CourseId),

    /// The buyer holds no active purchase.
    #[error("no active purchase of course {course_id} by {buyer_id}")]
    NoActivePurchase {
        /// The course.
        course_id: CourseId,
        /// The buyer.
        buyer_id: BuyerId,
    },

    /// Refund refused by the eligibility check.
    #[error("refund not eligible: {0}")]
    NotEligible(RefundIneligibility),

    /// Input rejected before touching storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored state broke an invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl StoreError {
    /// Whether the failed operation may succeed if repeated unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LockTimeout { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SeatInvariant { .. } => Self::InvariantViolation(err.to_string()),
            CoreError::InvalidCapacity(_)
            | CoreError::InvalidPrice(_)
            | CoreError::InvalidRefundWindow(_)
            | CoreError::InvalidId(_) => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(StoreError::Database("connection reset".into()).is_retryable());
        assert!(StoreError::LockTimeout {
            course_id: CourseId::generate(),
            waited_ms: 10
        }
        .is_retryable());
        assert!(!StoreError::SoldOut(CourseId::generate()).is_retryable());
        assert!(!StoreError::InvariantViolation("x".into()).is_retryable());
    }

    #[test]
    fn seat_invariant_maps_to_violation() {
        let err: StoreError = CoreError::SeatInvariant {
            course_id: CourseId::generate(),
            seats_remaining: -1,
            capacity: 1,
        }
        .into();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }
}
