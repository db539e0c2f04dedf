//! Storage layer for seatledger.
//!
//! This crate owns course inventory, purchase records, the payment ledger
//! and tag associations, and provides the per-course locking that makes
//! purchases and refunds safe under concurrency.
//!
//! # Backends
//!
//! - [`RocksStore`] (feature `rocksdb-backend`, default): column families plus
//!   an in-process per-course lock table. Every locked unit commits as a
//!   single `WriteBatch`.
//! - [`PgStore`]: one transaction per unit holding the inventory row lock
//!   (`SELECT ... FOR UPDATE`) under `SET LOCAL lock_timeout`.
//!
//! # Locked Units
//!
//! [`Store::process_purchase`], [`Store::process_refund`] and
//! [`Store::set_refundable`] acquire the course lock, re-read all state they
//! depend on, and commit all-or-nothing. Seat counts are never cached
//! between calls.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> seatledger_store::Result<()> {
//! use seatledger_core::{CourseId, CourseInventory};
//! use seatledger_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/seatledger-db")?;
//! let inventory = CourseInventory::new(CourseId::generate(), 30)?;
//! store.create_course(&inventory).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod lock;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use seatledger_core::{
    BuyerId, CourseId, CourseInventory, CourseTerms, LedgerEntry, PurchaseRecord, Receipt,
    RefundIneligibility, TagId,
};

pub use error::{Result, StoreError};
pub use lock::{KeyGuard, KeyLocks, LockTimeout, DEFAULT_LOCK_WAIT};
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

/// Eligibility callback evaluated against the active record inside the
/// refund's locked unit.
pub type RefundCheck<'a> =
    dyn Fn(&PurchaseRecord) -> std::result::Result<(), RefundIneligibility> + Send + Sync + 'a;

/// Tuning shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Ceiling for waiting on a course lock. Must be non-zero.
    pub lock_wait: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }
}

/// The storage trait defining all inventory operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (`RocksDB`, `PostgreSQL`).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Course Operations
    // =========================================================================

    /// Insert a new inventory row.
    ///
    /// # Errors
    ///
    /// - `StoreError::CourseExists` if the course already has inventory.
    /// - `StoreError::InvariantViolation` if the row is out of bounds.
    async fn create_course(&self, inventory: &CourseInventory) -> Result<()>;

    /// Read an inventory row without locking. For display only; purchase and
    /// refund never rely on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_course(&self, course_id: &CourseId) -> Result<Option<CourseInventory>>;

    // =========================================================================
    // Purchase Queries
    // =========================================================================

    /// Get the buyer's active (non-refunded) purchase of a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_active_purchase(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseRecord>>;

    /// List every purchase record of a buyer in a course, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_purchases(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Vec<PurchaseRecord>>;

    /// List ledger entries of a buyer, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_by_buyer(
        &self,
        buyer_id: &BuyerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Locked Units
    // =========================================================================

    /// Take one seat, insert `record` and append `entry`, atomically under
    /// the course lock.
    ///
    /// The duplicate check is repeated inside the unit, so concurrent
    /// attempts by one buyer commit at most once.
    ///
    /// # Errors
    ///
    /// - `StoreError::LockTimeout` if the lock wait ceiling elapsed.
    /// - `StoreError::CourseNotFound` if the course has no inventory.
    /// - `StoreError::AlreadyPurchased` if an active purchase exists.
    /// - `StoreError::SoldOut` if no seats remain.
    /// - `StoreError::InvariantViolation` if the stored row is out of bounds.
    async fn process_purchase(&self, record: &PurchaseRecord, entry: &LedgerEntry)
        -> Result<Receipt>;

    /// Refund the buyer's active purchase atomically under the course lock:
    /// mark it refunded at `refunded_at`, release one seat (capped at
    /// capacity) and append a refund ledger entry.
    ///
    /// `check` runs against the locked record before anything is written.
    ///
    /// # Errors
    ///
    /// - `StoreError::LockTimeout` if the lock wait ceiling elapsed.
    /// - `StoreError::NoActivePurchase` if there is nothing to refund.
    /// - `StoreError::NotEligible` if `check` refused.
    /// - `StoreError::InvariantViolation` if stored state is inconsistent.
    async fn process_refund(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refunded_at: DateTime<Utc>,
        check: &RefundCheck<'_>,
    ) -> Result<Receipt>;

    /// Set the `refundable` flag of the active purchase under the course
    /// lock. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// - `StoreError::LockTimeout` if the lock wait ceiling elapsed.
    /// - `StoreError::NoActivePurchase` if there is no active purchase.
    async fn set_refundable(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refundable: bool,
    ) -> Result<bool>;

    // =========================================================================
    // Tag Associations
    // =========================================================================

    /// The stored tag set of a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_course_tags(&self, course_id: &CourseId) -> Result<BTreeSet<TagId>>;

    /// Insert tag associations in one batch. Existing pairs are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_course_tags(&self, course_id: &CourseId, tags: &BTreeSet<TagId>)
        -> Result<()>;

    /// Delete tag associations in one batch. Missing pairs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_course_tags(&self, course_id: &CourseId, tags: &BTreeSet<TagId>)
        -> Result<()>;
}

/// Read-only course metadata consumed by pricing and refund eligibility.
#[async_trait]
pub trait CourseMetadataSource: Send + Sync {
    /// Price, start date and refund policy of a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn course_terms(&self, course_id: &CourseId) -> Result<Option<CourseTerms>>;

    /// Number of sessions the buyer attended.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn attended_sessions(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32>;
}
