//! Seat purchases.

use std::sync::Arc;

use seatledger_core::{
    BuyerId, CourseId, Failure, FailureKind, LedgerEntry, PurchaseOutcome, PurchaseRecord,
};
use seatledger_store::{CourseMetadataSource, Store, StoreError};

use crate::error::{failure_from_store, Result};
use crate::payment_log::{self, PaymentLogSink};

/// Default page size for payment history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Purchases seats and answers ownership queries.
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn Store>,
    metadata: Arc<dyn CourseMetadataSource>,
    payment_log: Arc<dyn PaymentLogSink>,
}

impl EnrollmentService {
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

    /// Buy one seat of `course_id` for `buyer_id`.
    ///
    /// An existing active purchase short-circuits to `AlreadyPurchased`
    /// before the course lock is requested. The check is repeated inside the
    /// locked unit, so concurrent attempts by one buyer commit at most once.
    pub async fn purchase(&self, course_id: CourseId, buyer_id: BuyerId) -> PurchaseOutcome {
        match self.store.get_active_purchase(&course_id, &buyer_id).await {
            Ok(Some(_)) => {
                tracing::debug!(course_id = %course_id, buyer_id = %buyer_id, "Already purchased");
                return PurchaseOutcome::AlreadyPurchased;
            }
            Ok(None) => {}
            Err(e) => return PurchaseOutcome::Failure(failure_from_store(&e, "purchase")),
        }

        let terms = match self.metadata.course_terms(&course_id).await {
            Ok(Some(terms)) => terms,
            Ok(None) => {
                tracing::debug!(course_id = %course_id, "Purchase of course without terms");
                return PurchaseOutcome::Failure(Failure::new(
                    FailureKind::UnknownCourse,
                    format!("course not found: {course_id}"),
                ));
            }
            Err(e) => return PurchaseOutcome::Failure(failure_from_store(&e, "purchase")),
        };

        let record = PurchaseRecord::new(course_id, buyer_id, terms.price_cents);
        let entry = LedgerEntry::purchase(&record);

        match self.store.process_purchase(&record, &entry).await {
            Ok(receipt) => {
                tracing::info!(
                    course_id = %course_id,
                    buyer_id = %buyer_id,
                    purchase_id = %receipt.record.purchase_id,
                    amount_cents = receipt.record.amount_cents,
                    seats_remaining = receipt.seats_remaining,
                    "Seat purchased"
                );
                payment_log::notify(&self.payment_log, receipt.entry.clone());
                PurchaseOutcome::Success(receipt)
            }
            Err(StoreError::AlreadyPurchased { .. }) => {
                tracing::debug!(course_id = %course_id, buyer_id = %buyer_id, "Already purchased");
                PurchaseOutcome::AlreadyPurchased
            }
            Err(StoreError::SoldOut(_)) => {
                tracing::debug!(course_id = %course_id, buyer_id = %buyer_id, "Sold out");
                PurchaseOutcome::SoldOut
            }
            Err(e) => PurchaseOutcome::Failure(failure_from_store(&e, "purchase")),
        }
    }

    /// Whether the buyer currently holds a seat in the course.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub async fn has_active_purchase(&self, course_id: CourseId, buyer_id: BuyerId) -> Result<bool> {
        Ok(self
            .store
            .get_active_purchase(&course_id, &buyer_id)
            .await?
            .is_some())
    }

    /// Ledger entries of a buyer across all courses, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub async fn payment_history(
        &self,
        buyer_id: BuyerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .store
            .list_ledger_by_buyer(&buyer_id, limit, offset)
            .await?)
    }
}
