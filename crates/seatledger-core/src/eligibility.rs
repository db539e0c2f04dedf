//! Refund eligibility rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CourseTerms, PurchaseRecord};

/// Why a refund was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RefundIneligibility {
    /// The purchase was marked non-refundable.
    #[error("purchase is not refundable")]
    NotRefundable,

    /// The refund window closed.
    #[error("refund window closed at {deadline}")]
    WindowElapsed {
        /// End of the refund window.
        deadline: DateTime<Utc>,
    },

    /// The buyer attended too many sessions.
    #[error("attended {attended} sessions, refunds stop at {limit}")]
    AttendanceExceeded {
        /// Sessions attended.
        attended: u32,
        /// Threshold from the course policy.
        limit: u32,
    },
}

/// Evaluate every refund condition for `record` at `now`.
///
/// # Errors
///
/// Returns the first failed condition: refundable flag, then window, then
/// attendance.
pub fn check_refund(
    record: &PurchaseRecord,
    terms: &CourseTerms,
    attended_sessions: u32,
    now: DateTime<Utc>,
) -> Result<(), RefundIneligibility> {
    if !record.refundable {
        return Err(RefundIneligibility::NotRefundable);
    }

    let deadline = terms.refund_deadline();
    if now > deadline {
        return Err(RefundIneligibility::WindowElapsed { deadline });
    }

    let limit = terms.refund_policy.max_attended_sessions;
    if attended_sessions >= limit {
        return Err(RefundIneligibility::AttendanceExceeded {
            attended: attended_sessions,
            limit,
        });
    }

    Ok(())
}
