//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Locked units acquire the course's slot in an in-process [`KeyLocks`]
//! table and then run synchronously to a single `WriteBatch`, so a caller
//! that is cancelled can only be cancelled while still waiting for the lock.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use seatledger_core::{
    BuyerId, CourseId, CourseInventory, CourseTerms, LedgerEntry, LedgerEntryId, PurchaseId,
    PurchaseRecord, Receipt, TagId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::lock::{KeyGuard, KeyLocks, LockTimeout};
use crate::schema::{all_column_families, cf};
use crate::{CourseMetadataSource, RefundCheck, Store, StoreOptions};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: KeyLocks<CourseId>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path with default
    /// options.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a zero lock wait, or an error if
    /// the database cannot be opened or created.
    pub fn open_with<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        if options.lock_wait.is_zero() {
            return Err(StoreError::InvalidInput(
                "lock wait timeout must be non-zero".into(),
            ));
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: KeyLocks::new(options.lock_wait),
        })
    }

    /// Store or replace the terms of a course.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a negative price or an out of
    /// range refund window, or an error if the database operation fails.
    pub async fn put_course_terms(&self, terms: &CourseTerms) -> Result<()> {
        terms.validate()?;

        let cf = self.cf(cf::COURSE_TERMS)?;
        let value = Self::serialize(terms)?;
        self.db
            .put_cf(&cf, keys::course_key(&terms.course_id), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Count one attended session. Returns the new total.
    ///
    /// The course lock only serializes increments for the same course.
    /// Refunds read attendance before they take the lock, so a session
    /// recorded while a refund is in flight may not be seen by it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock wait times out or the write fails.
    pub async fn record_attendance(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32> {
        let _guard = self.lock_course(*course_id).await?;

        let cf = self.cf(cf::ATTENDANCE)?;
        let key = keys::enrollment_key(course_id, buyer_id);
        let attended = self.read_attendance(course_id, buyer_id)?.saturating_add(1);

        self.db
            .put_cf(&cf, key, Self::serialize(&attended)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(attended)
    }

    /// Acquire the course lock.
    ///
    /// Purchases, refunds and refund-status changes of the course wait for
    /// the returned guard to drop, and fail with `StoreError::LockTimeout`
    /// once the configured wait elapses.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock is not free in time.
    pub async fn lock_course(&self, course_id: CourseId) -> Result<KeyGuard<CourseId>> {
        self.locks
            .acquire(course_id)
            .await
            .map_err(|LockTimeout(wait)| StoreError::LockTimeout {
                course_id,
                waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect all keys of `cf_name` that start with `prefix`, in key order.
    fn prefix_keys(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(key);
        }
        Ok(out)
    }

    fn read_course(&self, course_id: &CourseId) -> Result<Option<CourseInventory>> {
        self.get_value(cf::COURSES, &keys::course_key(course_id))
    }

    fn read_active_purchase_id(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseId>> {
        let cf = self.cf(cf::ACTIVE_PURCHASES)?;
        let Some(value) = self
            .db
            .get_cf(&cf, keys::enrollment_key(course_id, buyer_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        keys::id_bytes_at(&value, 0)
            .map(|bytes| Some(PurchaseId::from_bytes(bytes)))
            .ok_or_else(|| StoreError::Serialization("malformed active purchase index".into()))
    }

    fn read_purchase(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        purchase_id: &PurchaseId,
    ) -> Result<Option<PurchaseRecord>> {
        self.get_value(
            cf::PURCHASES,
            &keys::purchase_key(course_id, buyer_id, purchase_id),
        )
    }

    /// Active record of a buyer, with the index and record cross-checked.
    fn read_active_purchase(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseRecord>> {
        let Some(purchase_id) = self.read_active_purchase_id(course_id, buyer_id)? else {
            return Ok(None);
        };

        let record = self
            .read_purchase(course_id, buyer_id, &purchase_id)?
            .ok_or_else(|| {
                StoreError::InvariantViolation(format!(
                    "active index of course {course_id} buyer {buyer_id} points to missing purchase {purchase_id}"
                ))
            })?;

        if record.refunded {
            return Err(StoreError::InvariantViolation(format!(
                "active index points to refunded purchase {purchase_id}"
            )));
        }

        Ok(Some(record))
    }

    fn read_attendance(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32> {
        Ok(self
            .get_value(cf::ATTENDANCE, &keys::enrollment_key(course_id, buyer_id))?
            .unwrap_or(0))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Locked unit bodies (caller holds the course lock)
    // =========================================================================

    fn commit_purchase(&self, record: &PurchaseRecord, entry: &LedgerEntry) -> Result<Receipt> {
        let course_id = record.course_id;
        let buyer_id = record.buyer_id;

        let mut inventory = self
            .read_course(&course_id)?
            .ok_or(StoreError::CourseNotFound(course_id))?;
        inventory.check_invariant()?;

        if self.read_active_purchase_id(&course_id, &buyer_id)?.is_some() {
            return Err(StoreError::AlreadyPurchased {
                course_id,
                buyer_id,
            });
        }

        if !inventory.take_seat() {
            return Err(StoreError::SoldOut(course_id));
        }

        let cf_courses = self.cf(cf::COURSES)?;
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_active = self.cf(cf::ACTIVE_PURCHASES)?;
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_ledger_by_buyer = self.cf(cf::LEDGER_BY_BUYER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_courses,
            keys::course_key(&course_id),
            Self::serialize(&inventory)?,
        );
        batch.put_cf(
            &cf_purchases,
            keys::purchase_key(&course_id, &buyer_id, &record.purchase_id),
            Self::serialize(record)?,
        );
        batch.put_cf(
            &cf_active,
            keys::enrollment_key(&course_id, &buyer_id),
            record.purchase_id.to_bytes(),
        );
        batch.put_cf(&cf_ledger, keys::ledger_key(&entry.id), Self::serialize(entry)?);
        batch.put_cf(
            &cf_ledger_by_buyer,
            keys::buyer_ledger_key(&buyer_id, &entry.id),
            [],
        );
        self.write(batch)?;

        Ok(Receipt {
            record: record.clone(),
            entry: entry.clone(),
            seats_remaining: inventory.seats_remaining,
        })
    }

    fn commit_refund(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refunded_at: DateTime<Utc>,
        check: &RefundCheck<'_>,
    ) -> Result<Receipt> {
        let mut record = self
            .read_active_purchase(course_id, buyer_id)?
            .ok_or(StoreError::NoActivePurchase {
                course_id: *course_id,
                buyer_id: *buyer_id,
            })?;

        check(&record).map_err(StoreError::NotEligible)?;

        let mut inventory = self
            .read_course(course_id)?
            .ok_or(StoreError::CourseNotFound(*course_id))?;
        inventory.check_invariant()?;

        if inventory.seats_remaining == inventory.capacity {
            tracing::warn!(
                course_id = %course_id,
                buyer_id = %buyer_id,
                "Refunding into a course with no sold seats; seat count stays at capacity"
            );
        }

        record.mark_refunded(refunded_at);
        inventory.release_seat();
        let entry = LedgerEntry::refund(&record, refunded_at);

        let cf_courses = self.cf(cf::COURSES)?;
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_active = self.cf(cf::ACTIVE_PURCHASES)?;
        let cf_ledger = self.cf(cf::LEDGER)?;
        let cf_ledger_by_buyer = self.cf(cf::LEDGER_BY_BUYER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_courses,
            keys::course_key(course_id),
            Self::serialize(&inventory)?,
        );
        batch.put_cf(
            &cf_purchases,
            keys::purchase_key(course_id, buyer_id, &record.purchase_id),
            Self::serialize(&record)?,
        );
        batch.delete_cf(&cf_active, keys::enrollment_key(course_id, buyer_id));
        batch.put_cf(&cf_ledger, keys::ledger_key(&entry.id), Self::serialize(&entry)?);
        batch.put_cf(
            &cf_ledger_by_buyer,
            keys::buyer_ledger_key(buyer_id, &entry.id),
            [],
        );
        self.write(batch)?;

        Ok(Receipt {
            record,
            entry,
            seats_remaining: inventory.seats_remaining,
        })
    }

    fn commit_refundable(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refundable: bool,
    ) -> Result<bool> {
        let mut record = self
            .read_active_purchase(course_id, buyer_id)?
            .ok_or(StoreError::NoActivePurchase {
                course_id: *course_id,
                buyer_id: *buyer_id,
            })?;

        if record.refundable == refundable {
            return Ok(false);
        }
        record.refundable = refundable;

        let cf = self.cf(cf::PURCHASES)?;
        self.db
            .put_cf(
                &cf,
                keys::purchase_key(course_id, buyer_id, &record.purchase_id),
                Self::serialize(&record)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(true)
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Course Operations
    // =========================================================================

    async fn create_course(&self, inventory: &CourseInventory) -> Result<()> {
        inventory.check_invariant()?;
        let course_id = inventory.course_id;
        let _guard = self.lock_course(course_id).await?;

        if self.read_course(&course_id)?.is_some() {
            return Err(StoreError::CourseExists(course_id));
        }

        let cf = self.cf(cf::COURSES)?;
        self.db
            .put_cf(&cf, keys::course_key(&course_id), Self::serialize(inventory)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn get_course(&self, course_id: &CourseId) -> Result<Option<CourseInventory>> {
        self.read_course(course_id)
    }

    // =========================================================================
    // Purchase Queries
    // =========================================================================

    async fn get_active_purchase(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseRecord>> {
        self.read_active_purchase(course_id, buyer_id)
    }

    async fn list_purchases(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Vec<PurchaseRecord>> {
        let cf = self.cf(cf::PURCHASES)?;
        let prefix = keys::enrollment_key(course_id, buyer_id);
        let mut records = Vec::new();

        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(Self::deserialize(&value)?);
        }

        Ok(records)
    }

    async fn list_ledger_by_buyer(
        &self,
        buyer_id: &BuyerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let prefix = keys::buyer_ledger_prefix(buyer_id);
        let mut index_keys = self.prefix_keys(cf::LEDGER_BY_BUYER, &prefix)?;

        // ULID suffixes sort oldest first
        index_keys.reverse();

        let mut entries = Vec::new();
        for key in index_keys.iter().skip(offset).take(limit) {
            let entry_id: LedgerEntryId = keys::entry_id_from_buyer_key(key)
                .ok_or_else(|| StoreError::Serialization("malformed ledger index key".into()))?;
            if let Some(entry) = self.get_value(cf::LEDGER, &keys::ledger_key(&entry_id))? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    // =========================================================================
    // Locked Units
    // =========================================================================

    async fn process_purchase(
        &self,
        record: &PurchaseRecord,
        entry: &LedgerEntry,
    ) -> Result<Receipt> {
        let _guard = self.lock_course(record.course_id).await?;
        self.commit_purchase(record, entry)
    }

    async fn process_refund(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refunded_at: DateTime<Utc>,
        check: &RefundCheck<'_>,
    ) -> Result<Receipt> {
        let _guard = self.lock_course(*course_id).await?;
        self.commit_refund(course_id, buyer_id, refunded_at, check)
    }

    async fn set_refundable(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refundable: bool,
    ) -> Result<bool> {
        let _guard = self.lock_course(*course_id).await?;
        self.commit_refundable(course_id, buyer_id, refundable)
    }

    // =========================================================================
    // Tag Associations
    // =========================================================================

    async fn list_course_tags(&self, course_id: &CourseId) -> Result<BTreeSet<TagId>> {
        self.prefix_keys(cf::COURSE_TAGS, &keys::course_key(course_id))?
            .iter()
            .map(|key| {
                keys::tag_id_from_course_key(key)
                    .ok_or_else(|| StoreError::Serialization("malformed course tag key".into()))
            })
            .collect()
    }

    async fn insert_course_tags(
        &self,
        course_id: &CourseId,
        tags: &BTreeSet<TagId>,
    ) -> Result<()> {
        let cf = self.cf(cf::COURSE_TAGS)?;
        let mut batch = WriteBatch::default();
        for tag in tags {
            batch.put_cf(&cf, keys::course_tag_key(course_id, *tag), []);
        }
        self.write(batch)
    }

    async fn delete_course_tags(
        &self,
        course_id: &CourseId,
        tags: &BTreeSet<TagId>,
    ) -> Result<()> {
        let cf = self.cf(cf::COURSE_TAGS)?;
        let mut batch = WriteBatch::default();
        for tag in tags {
            batch.delete_cf(&cf, keys::course_tag_key(course_id, *tag));
        }
        self.write(batch)
    }
}

#[async_trait]
impl CourseMetadataSource for RocksStore {
    async fn course_terms(&self, course_id: &CourseId) -> Result<Option<CourseTerms>> {
        self.get_value(cf::COURSE_TERMS, &keys::course_key(course_id))
    }

    async fn attended_sessions(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32> {
        self.read_attendance(course_id, buyer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatledger_core::{LedgerKind, RefundIneligibility};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    async fn course(store: &RocksStore, capacity: i32) -> CourseId {
        let course_id = CourseId::generate();
        let inventory = CourseInventory::new(course_id, capacity).unwrap();
        store.create_course(&inventory).await.unwrap();
        course_id
    }

    async fn buy(store: &RocksStore, course_id: CourseId, buyer_id: BuyerId) -> Result<Receipt> {
        let record = PurchaseRecord::new(course_id, buyer_id, 1500);
        let entry = LedgerEntry::purchase(&record);
        store.process_purchase(&record, &entry).await
    }

    fn always_eligible(_: &PurchaseRecord) -> std::result::Result<(), RefundIneligibility> {
        Ok(())
    }

    #[tokio::test]
    async fn create_course_rejects_duplicates() {
        let (store, _dir) = create_test_store();
        let inventory = CourseInventory::new(CourseId::generate(), 3).unwrap();
        store.create_course(&inventory).await.unwrap();

        let err = store.create_course(&inventory).await.unwrap_err();
        assert!(matches!(err, StoreError::CourseExists(_)));
        assert_eq!(
            store.get_course(&inventory.course_id).await.unwrap(),
            Some(inventory)
        );
    }

    #[tokio::test]
    async fn purchase_takes_seat_and_writes_ledger() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 2).await;
        let buyer_id = BuyerId::generate();

        let receipt = buy(&store, course_id, buyer_id).await.unwrap();
        assert_eq!(receipt.seats_remaining, 1);

        let active = store
            .get_active_purchase(&course_id, &buyer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.purchase_id, receipt.record.purchase_id);

        let ledger = store.list_ledger_by_buyer(&buyer_id, 10, 0).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerKind::Purchase);
        assert_eq!(ledger[0].amount_cents, 1500);
    }

    #[tokio::test]
    async fn duplicate_purchase_rejected_without_side_effects() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 5).await;
        let buyer_id = BuyerId::generate();

        buy(&store, course_id, buyer_id).await.unwrap();
        let err = buy(&store, course_id, buyer_id).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyPurchased { .. }));
        let inventory = store.get_course(&course_id).await.unwrap().unwrap();
        assert_eq!(inventory.seats_remaining, 4);
        assert_eq!(store.list_purchases(&course_id, &buyer_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sold_out_leaves_count_at_zero() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;

        buy(&store, course_id, BuyerId::generate()).await.unwrap();
        let err = buy(&store, course_id, BuyerId::generate()).await.unwrap_err();

        assert!(matches!(err, StoreError::SoldOut(_)));
        let inventory = store.get_course(&course_id).await.unwrap().unwrap();
        assert_eq!(inventory.seats_remaining, 0);
    }

    #[tokio::test]
    async fn purchase_of_unknown_course() {
        let (store, _dir) = create_test_store();
        let err = buy(&store, CourseId::generate(), BuyerId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CourseNotFound(_)));
    }

    #[tokio::test]
    async fn refund_releases_seat_and_deactivates() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 2).await;
        let buyer_id = BuyerId::generate();
        buy(&store, course_id, buyer_id).await.unwrap();

        let receipt = store
            .process_refund(&course_id, &buyer_id, Utc::now(), &always_eligible)
            .await
            .unwrap();

        assert_eq!(receipt.seats_remaining, 2);
        assert!(receipt.record.refunded);
        assert_eq!(receipt.entry.kind, LedgerKind::Refund);
        assert_eq!(receipt.entry.amount_cents, -1500);
        assert!(store
            .get_active_purchase(&course_id, &buyer_id)
            .await
            .unwrap()
            .is_none());

        let records = store.list_purchases(&course_id, &buyer_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].refunded);

        let err = store
            .process_refund(&course_id, &buyer_id, Utc::now(), &always_eligible)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoActivePurchase { .. }));
    }

    #[tokio::test]
    async fn refused_refund_changes_nothing() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 2).await;
        let buyer_id = BuyerId::generate();
        buy(&store, course_id, buyer_id).await.unwrap();

        let err = store
            .process_refund(&course_id, &buyer_id, Utc::now(), &|_: &PurchaseRecord| {
                Err(RefundIneligibility::NotRefundable)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::NotEligible(RefundIneligibility::NotRefundable)
        ));
        let inventory = store.get_course(&course_id).await.unwrap().unwrap();
        assert_eq!(inventory.seats_remaining, 1);
        assert!(store
            .get_active_purchase(&course_id, &buyer_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn repurchase_after_refund_creates_new_record() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;
        let buyer_id = BuyerId::generate();

        buy(&store, course_id, buyer_id).await.unwrap();
        store
            .process_refund(&course_id, &buyer_id, Utc::now(), &always_eligible)
            .await
            .unwrap();
        buy(&store, course_id, buyer_id).await.unwrap();

        let records = store.list_purchases(&course_id, &buyer_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].refunded);
        assert!(records[1].is_active());
    }

    #[tokio::test]
    async fn set_refundable_reports_changes() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;
        let buyer_id = BuyerId::generate();
        buy(&store, course_id, buyer_id).await.unwrap();

        assert!(store.set_refundable(&course_id, &buyer_id, false).await.unwrap());
        assert!(!store.set_refundable(&course_id, &buyer_id, false).await.unwrap());

        let active = store
            .get_active_purchase(&course_id, &buyer_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!active.refundable);

        let err = store
            .set_refundable(&course_id, &BuyerId::generate(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoActivePurchase { .. }));
    }

    #[tokio::test]
    async fn corrupted_seat_count_is_reported() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 2).await;

        let mut inventory = store.get_course(&course_id).await.unwrap().unwrap();
        inventory.seats_remaining = -1;
        let cf = store.cf(cf::COURSES).unwrap();
        store
            .db
            .put_cf(
                &cf,
                keys::course_key(&course_id),
                RocksStore::serialize(&inventory).unwrap(),
            )
            .unwrap();
        drop(cf);

        let err = buy(&store, course_id, BuyerId::generate()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));

        let unchanged = store.get_course(&course_id).await.unwrap().unwrap();
        assert_eq!(unchanged.seats_remaining, -1);
    }

    #[tokio::test]
    async fn ledger_lists_newest_first_with_pagination() {
        let (store, _dir) = create_test_store();
        let buyer_id = BuyerId::generate();
        let first = course(&store, 1).await;
        let second = course(&store, 1).await;

        buy(&store, first, buyer_id).await.unwrap();
        buy(&store, second, buyer_id).await.unwrap();

        let page1 = store.list_ledger_by_buyer(&buyer_id, 1, 0).await.unwrap();
        let page2 = store.list_ledger_by_buyer(&buyer_id, 1, 1).await.unwrap();
        assert_eq!(page1[0].course_id, second);
        assert_eq!(page2[0].course_id, first);
        assert!(store
            .list_ledger_by_buyer(&buyer_id, 10, 2)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tag_batches() {
        let (store, _dir) = create_test_store();
        let course_id = CourseId::generate();
        let other = CourseId::generate();
        let tags: BTreeSet<TagId> = [1, 2, 3].into_iter().map(TagId::new).collect();

        store.insert_course_tags(&course_id, &tags).await.unwrap();
        store
            .insert_course_tags(&other, &[TagId::new(9)].into_iter().collect())
            .await
            .unwrap();
        store
            .delete_course_tags(&course_id, &[TagId::new(2)].into_iter().collect())
            .await
            .unwrap();

        let stored = store.list_course_tags(&course_id).await.unwrap();
        assert_eq!(stored, [1, 3].into_iter().map(TagId::new).collect());
    }

    #[tokio::test]
    async fn terms_and_attendance() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;
        let buyer_id = BuyerId::generate();
        let terms = CourseTerms::new(course_id, 2000, Utc::now());

        assert!(store.course_terms(&course_id).await.unwrap().is_none());
        store.put_course_terms(&terms).await.unwrap();
        assert_eq!(store.course_terms(&course_id).await.unwrap(), Some(terms));

        assert_eq!(store.attended_sessions(&course_id, &buyer_id).await.unwrap(), 0);
        assert_eq!(store.record_attendance(&course_id, &buyer_id).await.unwrap(), 1);
        assert_eq!(store.record_attendance(&course_id, &buyer_id).await.unwrap(), 2);
        assert_eq!(store.attended_sessions(&course_id, &buyer_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn invalid_terms_are_rejected() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;

        let negative_price = CourseTerms::new(course_id, -4900, Utc::now());
        let err = store.put_course_terms(&negative_price).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        let mut negative_window = CourseTerms::new(course_id, 4900, Utc::now());
        negative_window.refund_policy.window_seconds = -1;
        let err = store.put_course_terms(&negative_window).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        assert!(store.course_terms(&course_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refund_and_repurchase_in_one_burst_keep_ledger_order() {
        let (store, _dir) = create_test_store();
        let course_id = course(&store, 1).await;
        let buyer_id = BuyerId::generate();

        for _ in 0..20 {
            buy(&store, course_id, buyer_id).await.unwrap();
            store
                .process_refund(&course_id, &buyer_id, Utc::now(), &always_eligible)
                .await
                .unwrap();
        }

        let ledger = store.list_ledger_by_buyer(&buyer_id, 100, 0).await.unwrap();
        assert_eq!(ledger.len(), 40);
        for (i, entry) in ledger.iter().enumerate() {
            let expected = if i % 2 == 0 { LedgerKind::Refund } else { LedgerKind::Purchase };
            assert_eq!(entry.kind, expected, "entry {i} out of order");
        }
        assert!(ledger.windows(2).all(|pair| pair[0].id > pair[1].id));

        let records = store.list_purchases(&course_id, &buyer_id).await.unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.refunded));
        assert!(records.windows(2).all(|pair| pair[0].purchase_id < pair[1].purchase_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_never_oversell() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let course_id = course(&store, 5).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { buy(&store, course_id, BuyerId::generate()).await })
            })
            .collect();

        let mut sold = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => sold += 1,
                Err(StoreError::SoldOut(_)) => sold_out += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(sold, 5);
        assert_eq!(sold_out, 15);
        let inventory = store.get_course(&course_id).await.unwrap().unwrap();
        assert_eq!(inventory.seats_remaining, 0);
    }

    #[tokio::test]
    async fn contended_course_times_out_without_changes() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open_with(
            dir.path(),
            StoreOptions {
                lock_wait: Duration::from_millis(20),
            },
        )
        .unwrap();
        let course_id = course(&store, 2).await;

        let held = store.lock_course(course_id).await.unwrap();
        let err = buy(&store, course_id, BuyerId::generate()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LockTimeout { waited_ms: 20, .. }
        ));
        assert!(err.is_retryable());

        drop(held);
        assert_eq!(store.get_course(&course_id).await.unwrap().unwrap().seats_remaining, 2);
        assert!(buy(&store, course_id, BuyerId::generate()).await.is_ok());
    }

    #[test]
    fn zero_lock_wait_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = RocksStore::open_with(
            dir.path(),
            StoreOptions {
                lock_wait: Duration::ZERO,
            },
        );
        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
    }
}
