//! Error types for seatledger core.

use crate::ids::IdError;
use crate::CourseId;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core domain checks.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Capacity must not be negative.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(i32),

    /// Price must not be negative.
    #[error("invalid price: {0} cents")]
    InvalidPrice(i64),

    /// Refund window must lie in `[0, MAX_REFUND_WINDOW_DAYS]` days.
    #[error("invalid refund window: {0} seconds")]
    InvalidRefundWindow(i64),

    /// A seat count was found outside `[0, capacity]`.
    #[error(
        "seat invariant violated for course {course_id}: seats_remaining={seats_remaining}, capacity={capacity}"
    )]
    SeatInvariant {
        /// The affected course.
        course_id: CourseId,
        /// The stored seat count.
        seats_remaining: i32,
        /// The stored capacity.
        capacity: i32,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
