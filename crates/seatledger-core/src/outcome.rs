//! Result codes returned by purchase and refund.
//!
//! Every outcome maps to a stable string code via `code()`; callers report
//! business rejections verbatim and may retry only retryable failures.

use serde::{Deserialize, Serialize};

use crate::{LedgerEntry, PurchaseRecord, RefundIneligibility};

/// Stable result code strings.
pub mod codes {
    /// Operation committed.
    pub const SUCCESS: &str = "success";
    /// Buyer already holds an active seat.
    pub const ALREADY_PURCHASED: &str = "already_purchased";
    /// No seats left.
    pub const SOLD_OUT: &str = "sold_out";
    /// Refund conditions not met.
    pub const NOT_ELIGIBLE: &str = "not_eligible";
    /// No active purchase to act on.
    pub const NOT_FOUND: &str = "not_found";
    /// Caller could not be identified.
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    /// Persistence failure or invariant violation.
    pub const FAILURE: &str = "failure";
}

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Lock timeout, connection or database error. Safe to retry.
    Transient,
    /// The course has no inventory row.
    UnknownCourse,
    /// Stored state broke an invariant. Never retried, never repaired.
    InvariantViolation,
    /// The request itself was rejected.
    InvalidInput,
}

/// A failed purchase or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Diagnostic message.
    pub message: String,
}

impl Failure {
    /// Build a failure.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether repeating the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Transient)
    }
}

/// Receipt for a committed purchase or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// The purchase record as committed.
    pub record: PurchaseRecord,
    /// The ledger entry written in the same unit.
    pub entry: LedgerEntry,
    /// Seats left after the commit.
    pub seats_remaining: i32,
}

/// Result of `purchase`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Seat taken.
    Success(Receipt),
    /// Buyer already holds an active seat; nothing changed.
    AlreadyPurchased,
    /// No seats left; nothing changed.
    SoldOut,
    /// Operation aborted; nothing changed.
    Failure(Failure),
}

impl PurchaseOutcome {
    /// Stable result code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Success(_) => codes::SUCCESS,
            Self::AlreadyPurchased => codes::ALREADY_PURCHASED,
            Self::SoldOut => codes::SOLD_OUT,
            Self::Failure(_) => codes::FAILURE,
        }
    }

    /// Whether the purchase committed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Result of `refund`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundOutcome {
    /// Seat released.
    Success(Receipt),
    /// A condition failed; nothing changed.
    NotEligible(RefundIneligibility),
    /// No active purchase (never bought, or already refunded).
    NotFound,
    /// Operation aborted; nothing changed.
    Failure(Failure),
}

impl RefundOutcome {
    /// Stable result code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Success(_) => codes::SUCCESS,
            Self::NotEligible(_) => codes::NOT_ELIGIBLE,
            Self::NotFound => codes::NOT_FOUND,
            Self::Failure(_) => codes::FAILURE,
        }
    }

    /// Whether the refund committed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Result of marking a purchase non-refundable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RevokeOutcome {
    /// The flag was cleared.
    Revoked,
    /// The flag was already clear.
    AlreadyNonRefundable,
    /// No active purchase.
    NotFound,
    /// Operation aborted; nothing changed.
    Failure(Failure),
}
