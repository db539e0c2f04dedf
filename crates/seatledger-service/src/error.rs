//! Service error types and their mapping to operation failures.

use seatledger_core::{Failure, FailureKind};
use seatledger_store::StoreError;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::payment_log::PaymentLogError;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service error type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Storage operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller could not be identified.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Payment log delivery failed.
    #[error(transparent)]
    PaymentLog(#[from] PaymentLogError),
}

impl ServiceError {
    /// Whether the failed operation may succeed if repeated unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::PaymentLog(err) => err.is_retryable(),
            Self::Auth(_) | Self::Config(_) => false,
        }
    }
}

/// Convert a store error that is not a business rejection into a
/// [`Failure`], logging it at the level its kind calls for.
///
/// Invariant violations are logged at error level and reported as
/// non-retryable; they are never repaired here.
pub(crate) fn failure_from_store(err: &StoreError, operation: &'static str) -> Failure {
    let kind = match err {
        StoreError::Database(_) | StoreError::LockTimeout { .. } => FailureKind::Transient,
        StoreError::CourseNotFound(_) => FailureKind::UnknownCourse,
        StoreError::InvariantViolation(_) | StoreError::Serialization(_) => {
            FailureKind::InvariantViolation
        }
        StoreError::InvalidInput(_)
        | StoreError::CourseExists(_)
        | StoreError::AlreadyPurchased { .. }
        | StoreError::SoldOut(_)
        | StoreError::NoActivePurchase { .. }
        | StoreError::NotEligible(_) => FailureKind::InvalidInput,
    };

    match kind {
        FailureKind::Transient => {
            tracing::warn!(operation, error = %err, "Retryable storage failure");
        }
        FailureKind::InvariantViolation => {
            tracing::error!(operation, error = %err, "Stored state violates an invariant");
        }
        FailureKind::UnknownCourse | FailureKind::InvalidInput => {
            tracing::debug!(operation, error = %err, "Operation rejected");
        }
    }

    Failure::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatledger_core::CourseId;

    #[test]
    fn store_errors_map_to_failure_kinds() {
        let course_id = CourseId::generate();

        let lock = StoreError::LockTimeout {
            course_id,
            waited_ms: 5000,
        };
        assert!(failure_from_store(&lock, "purchase").is_retryable());

        let missing = failure_from_store(&StoreError::CourseNotFound(course_id), "purchase");
        assert_eq!(missing.kind, FailureKind::UnknownCourse);
        assert!(!missing.is_retryable());

        let broken = failure_from_store(
            &StoreError::InvariantViolation("seats_remaining=-1".into()),
            "refund",
        );
        assert_eq!(broken.kind, FailureKind::InvariantViolation);
        assert!(!broken.is_retryable());
    }

    #[test]
    fn retryable_follows_source() {
        assert!(ServiceError::from(StoreError::Database("reset".into())).is_retryable());
        assert!(!ServiceError::from(ConfigError::ZeroLockWait).is_retryable());
        assert!(!ServiceError::from(AuthError::MissingToken).is_retryable());
    }
}
