//! Refunds and refund-status changes.

use std::sync::Arc;

use chrono::Utc;

use seatledger_core::{
    check_refund, BuyerId, CourseId, Failure, FailureKind, PurchaseRecord, RefundOutcome,
    RevokeOutcome,
};
use seatledger_store::{CourseMetadataSource, Store, StoreError};

use crate::error::failure_from_store;
use crate::payment_log::{self, PaymentLogSink};

/// Releases seats of eligible purchases.
#[derive(Clone)]
pub struct RefundService {
    store: Arc<dyn Store>,
    metadata: Arc<dyn CourseMetadataSource>,
    payment_log: Arc<dyn PaymentLogSink>,
}

impl RefundService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        metadata: Arc<dyn CourseMetadataSource>,
        payment_log: Arc<dyn PaymentLogSink>,
    ) -> Self {
        Self {
            store,
            metadata,
            payment_log,
        }
    }

    /// Refund the buyer's active purchase of `course_id`.
    ///
    /// Eligibility is evaluated against the record read inside the course
    /// lock, using the course terms and attendance count fetched before the
    /// lock is taken. Attendance recorded in between is not considered.
    pub async fn refund(&self, course_id: CourseId, buyer_id: BuyerId) -> RefundOutcome {
        match self.store.get_active_purchase(&course_id, &buyer_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(course_id = %course_id, buyer_id = %buyer_id, "No purchase to refund");
                return RefundOutcome::NotFound;
            }
            Err(e) => return RefundOutcome::Failure(failure_from_store(&e, "refund")),
        }

        let terms = match self.metadata.course_terms(&course_id).await {
            Ok(Some(terms)) => terms,
            Ok(None) => {
                tracing::error!(
                    course_id = %course_id,
                    buyer_id = %buyer_id,
                    "Active purchase of course without terms"
                );
                return RefundOutcome::Failure(Failure::new(
                    FailureKind::UnknownCourse,
                    format!("no terms for course {course_id}"),
                ));
            }
            Err(e) => return RefundOutcome::Failure(failure_from_store(&e, "refund")),
        };

        let attended = match self.metadata.attended_sessions(&course_id, &buyer_id).await {
            Ok(attended) => attended,
            Err(e) => return RefundOutcome::Failure(failure_from_store(&e, "refund")),
        };

        let now = Utc::now();
        let check = |record: &PurchaseRecord| check_refund(record, &terms, attended, now);

        match self
            .store
            .process_refund(&course_id, &buyer_id, now, &check)
            .await
        {
            Ok(receipt) => {
                tracing::info!(
                    course_id = %course_id,
                    buyer_id = %buyer_id,
                    purchase_id = %receipt.record.purchase_id,
                    amount_cents = receipt.entry.amount_cents,
                    seats_remaining = receipt.seats_remaining,
                    "Seat refunded"
                );
                payment_log::notify(&self.payment_log, receipt.entry.clone());
                RefundOutcome::Success(receipt)
            }
            Err(StoreError::NoActivePurchase { .. }) => {
                tracing::debug!(course_id = %course_id, buyer_id = %buyer_id, "No purchase to refund");
                RefundOutcome::NotFound
            }
            Err(StoreError::NotEligible(reason)) => {
                tracing::debug!(
                    course_id = %course_id,
                    buyer_id = %buyer_id,
                    reason = %reason,
                    "Refund not eligible"
                );
                RefundOutcome::NotEligible(reason)
            }
            Err(e) => RefundOutcome::Failure(failure_from_store(&e, "refund")),
        }
    }

    /// Mark the buyer's active purchase non-refundable.
    pub async fn revoke_refundable(&self, course_id: CourseId, buyer_id: BuyerId) -> RevokeOutcome {
        match self.store.set_refundable(&course_id, &buyer_id, false).await {
            Ok(true) => {
                tracing::info!(course_id = %course_id, buyer_id = %buyer_id, "Refund revoked");
                RevokeOutcome::Revoked
            }
            Ok(false) => RevokeOutcome::AlreadyNonRefundable,
            Err(StoreError::NoActivePurchase { .. }) => RevokeOutcome::NotFound,
            Err(e) => RevokeOutcome::Failure(failure_from_store(&e, "revoke_refundable")),
        }
    }
}
