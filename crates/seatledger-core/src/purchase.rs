//! Purchase records and payment ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuyerId, CourseId, LedgerEntryId, PurchaseId};

/// One buyer's seat in one course.
///
/// Created by a successful purchase and never deleted. A refund flips
/// `refunded` and stamps `refunded_at`; the record then stops counting as
/// the buyer's active purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Unique purchase ID (ULID for time-ordering).
    pub purchase_id: PurchaseId,

    /// The purchased course.
    pub course_id: CourseId,

    /// The buyer.
    pub buyer_id: BuyerId,

    /// Amount charged, in cents.
    pub amount_cents: i64,

    /// When the purchase committed.
    pub purchased_at: DateTime<Utc>,

    /// Whether a refund may still be requested. Cleared by the course owner.
    pub refundable: bool,

    /// Whether the purchase has been refunded.
    pub refunded: bool,

    /// When the refund committed.
    pub refunded_at: Option<DateTime<Utc>>,
}

impl PurchaseRecord {
    /// Build a fresh, refundable, unrefunded record.
    #[must_use]
    pub fn new(course_id: CourseId, buyer_id: BuyerId, amount_cents: i64) -> Self {
        Self {
            purchase_id: PurchaseId::generate(),
            course_id,
            buyer_id,
            amount_cents,
            purchased_at: Utc::now(),
            refundable: true,
            refunded: false,
            refunded_at: None,
        }
    }

    /// Whether this record is the buyer's active seat.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.refunded
    }

    /// Mark as refunded at `at`.
    pub fn mark_refunded(&mut self, at: DateTime<Utc>) {
        self.refunded = true;
        self.refunded_at = Some(at);
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Seat purchased.
    Purchase,
    /// Seat refunded.
    Refund,
}

/// An append-only payment log entry.
///
/// Written inside the same atomic unit as the seat change it records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: LedgerEntryId,

    /// The purchase this entry belongs to.
    pub purchase_id: PurchaseId,

    /// The course.
    pub course_id: CourseId,

    /// The buyer.
    pub buyer_id: BuyerId,

    /// Amount in cents. Positive for purchases, negative for refunds.
    pub amount_cents: i64,

    /// Entry kind.
    pub kind: LedgerKind,

    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Entry for a committed purchase.
    #[must_use]
    pub fn purchase(record: &PurchaseRecord) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            purchase_id: record.purchase_id,
            course_id: record.course_id,
            buyer_id: record.buyer_id,
            amount_cents: record.amount_cents,
            kind: LedgerKind::Purchase,
            recorded_at: record.purchased_at,
        }
    }

    /// Entry for a committed refund.
    #[must_use]
    pub fn refund(record: &PurchaseRecord, at: DateTime<Utc>) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            purchase_id: record.purchase_id,
            course_id: record.course_id,
            buyer_id: record.buyer_id,
            amount_cents: -record.amount_cents,
            kind: LedgerKind::Refund,
            recorded_at: at,
        }
    }
}
