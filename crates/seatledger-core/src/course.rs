//! Course inventory and course terms.
//!
//! The inventory row is the single piece of shared mutable state in the
//! system. It is only ever changed inside the store's locked unit; the
//! helpers here compute the next value and validate the seat invariant but
//! never persist anything.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::CourseId;

/// Default refund window after course start (7 days).
pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 7;

/// Longest refund window a course may declare (10 years).
pub const MAX_REFUND_WINDOW_DAYS: i64 = 3650;

/// Default number of attended sessions at which refunds stop (1 session).
pub const DEFAULT_MAX_ATTENDED_SESSIONS: u32 = 1;

/// Seat inventory for a single course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInventory {
    /// The course this inventory belongs to.
    pub course_id: CourseId,

    /// Enrollment capacity, fixed at creation.
    pub capacity: i32,

    /// Seats still available for purchase.
    pub seats_remaining: i32,

    /// When the inventory row was created.
    pub created_at: DateTime<Utc>,

    /// When the seat count last changed.
    pub updated_at: DateTime<Utc>,
}

impl CourseInventory {
    /// Create a full inventory (`seats_remaining == capacity`).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidCapacity` if `capacity` is negative.
    pub fn new(course_id: CourseId, capacity: i32) -> Result<Self> {
        if capacity < 0 {
            return Err(CoreError::InvalidCapacity(capacity));
        }
        let now = Utc::now();
        Ok(Self {
            course_id,
            capacity,
            seats_remaining: capacity,
            created_at: now,
            updated_at: now,
        })
    }

    /// Check `0 <= seats_remaining <= capacity`.
    ///
    /// A violation means the row was corrupted outside the locked unit; it
    /// is reported, never repaired.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SeatInvariant` when the row is out of bounds.
    pub fn check_invariant(&self) -> Result<()> {
        if self.seats_remaining < 0 || self.seats_remaining > self.capacity {
            return Err(CoreError::SeatInvariant {
                course_id: self.course_id,
                seats_remaining: self.seats_remaining,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Whether at least one seat can be sold.
    #[must_use]
    pub const fn has_seat(&self) -> bool {
        self.seats_remaining > 0
    }

    /// Take one seat. Returns `false` (and changes nothing) when sold out.
    pub fn take_seat(&mut self) -> bool {
        if !self.has_seat() {
            return false;
        }
        self.seats_remaining -= 1;
        self.updated_at = Utc::now();
        true
    }

    /// Give one seat back, capped at `capacity`.
    pub fn release_seat(&mut self) {
        self.seats_remaining = (self.seats_remaining + 1).min(self.capacity);
        self.updated_at = Utc::now();
    }

    /// Number of seats currently sold.
    #[must_use]
    pub const fn seats_sold(&self) -> i32 {
        self.capacity - self.seats_remaining
    }
}

/// Read-only commercial terms of a course, consumed by purchase pricing and
/// refund eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTerms {
    /// The course these terms belong to.
    pub course_id: CourseId,

    /// Price charged per seat, in cents.
    pub price_cents: i64,

    /// When the course starts.
    pub starts_at: DateTime<Utc>,

    /// Refund rules for this course.
    pub refund_policy: RefundPolicy,
}

impl CourseTerms {
    /// Terms with the default refund policy.
    #[must_use]
    pub fn new(course_id: CourseId, price_cents: i64, starts_at: DateTime<Utc>) -> Self {
        Self {
            course_id,
            price_cents,
            starts_at,
            refund_policy: RefundPolicy::default(),
        }
    }

    /// Check the price and the refund window before the terms are stored.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPrice` for a negative price and
    /// `CoreError::InvalidRefundWindow` for a window outside
    /// `[0, MAX_REFUND_WINDOW_DAYS]` days.
    pub fn validate(&self) -> Result<()> {
        if self.price_cents < 0 {
            return Err(CoreError::InvalidPrice(self.price_cents));
        }
        let window = self.refund_policy.window_seconds;
        if !(0..=MAX_REFUND_WINDOW_DAYS * 24 * 60 * 60).contains(&window) {
            return Err(CoreError::InvalidRefundWindow(window));
        }
        Ok(())
    }

    /// The last instant at which a refund is still accepted.
    #[must_use]
    pub fn refund_deadline(&self) -> DateTime<Utc> {
        self.starts_at + self.refund_policy.window()
    }
}

/// Refund rules attached to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    /// How long after the course start refunds remain open, in seconds.
    /// Zero closes refunds at the start itself.
    pub window_seconds: i64,

    /// Refunds are refused once the buyer attended this many sessions.
    pub max_attended_sessions: u32,
}

impl RefundPolicy {
    /// The refund window as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds)
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_REFUND_WINDOW_DAYS * 24 * 60 * 60,
            max_attended_sessions: DEFAULT_MAX_ATTENDED_SESSIONS,
        }
    }
}
