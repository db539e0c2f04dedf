//! `PostgreSQL` storage implementation.
//!
//! Every locked unit is one transaction. The transaction takes the
//! inventory row lock with `SELECT ... FOR UPDATE` under
//! `SET LOCAL lock_timeout`, so a contended course fails with
//! [`StoreError::LockTimeout`] instead of waiting indefinitely. Dropping an
//! uncommitted transaction rolls it back.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use seatledger_core::{
    BuyerId, CourseId, CourseInventory, CourseTerms, LedgerEntry, LedgerEntryId, LedgerKind,
    PurchaseId, PurchaseRecord, Receipt, RefundPolicy, TagId,
};

use crate::error::{Result, StoreError};
use crate::{CourseMetadataSource, RefundCheck, Store, StoreOptions};

/// `lock_not_available`, raised when `lock_timeout` elapses.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

type InventoryRow = (i32, i32, DateTime<Utc>, DateTime<Utc>);

type PurchaseRow = (
    String,
    Uuid,
    Uuid,
    i64,
    DateTime<Utc>,
    bool,
    bool,
    Option<DateTime<Utc>>,
);

type LedgerRow = (String, String, Uuid, Uuid, i64, String, DateTime<Utc>);

const PURCHASE_COLUMNS: &str = "purchase_id, course_id, buyer_id, amount_cents, purchased_at, \
                                refundable, refunded, refunded_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    /// Connect to `database_url`, run pending migrations and return a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails, or if the
    /// lock wait is zero.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        options: StoreOptions,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;

        Self::from_pool(pool, options)
    }

    /// Wrap an existing pool. Migrations are assumed to be applied.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a zero lock wait.
    pub fn from_pool(pool: PgPool, options: StoreOptions) -> Result<Self> {
        if options.lock_wait.is_zero() {
            return Err(StoreError::InvalidInput(
                "lock wait timeout must be non-zero".into(),
            ));
        }

        Ok(Self {
            pool,
            lock_timeout_ms: u64::try_from(options.lock_wait.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Store or replace the terms of a course.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidInput` for a negative price, an out of
    /// range refund window or attendance limit, or an error if the database
    /// operation fails.
    pub async fn put_course_terms(&self, terms: &CourseTerms) -> Result<()> {
        terms.validate()?;
        let max_attended = i32::try_from(terms.refund_policy.max_attended_sessions)
            .map_err(|_| StoreError::InvalidInput("max_attended_sessions out of range".into()))?;

        sqlx::query(
            "INSERT INTO course_terms
                 (course_id, price_cents, starts_at, refund_window_seconds, max_attended_sessions)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (course_id) DO UPDATE SET
                 price_cents = EXCLUDED.price_cents,
                 starts_at = EXCLUDED.starts_at,
                 refund_window_seconds = EXCLUDED.refund_window_seconds,
                 max_attended_sessions = EXCLUDED.max_attended_sessions",
        )
        .bind(terms.course_id.as_uuid())
        .bind(terms.price_cents)
        .bind(terms.starts_at)
        .bind(terms.refund_policy.window_seconds)
        .bind(max_attended)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count one attended session. Returns the new total.
    ///
    /// The increment is a single upsert and takes no course row lock;
    /// refunds read attendance before locking.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn record_attendance(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32> {
        let (attended,): (i32,) = sqlx::query_as(
            "INSERT INTO attendance (course_id, buyer_id, attended)
             VALUES ($1, $2, 1)
             ON CONFLICT (course_id, buyer_id) DO UPDATE SET attended = attendance.attended + 1
             RETURNING attended",
        )
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(attended).map_err(|_| StoreError::Serialization("negative attendance".into()))
    }

    /// Begin a transaction with the configured lock wait ceiling.
    async fn begin_locked(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Lock and read the inventory row of a course.
    async fn lock_inventory(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        course_id: &CourseId,
    ) -> Result<CourseInventory> {
        let row: Option<InventoryRow> = sqlx::query_as(
            "SELECT capacity, seats_remaining, created_at, updated_at
             FROM course_inventory
             WHERE course_id = $1
             FOR UPDATE",
        )
        .bind(course_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| self.map_lock_error(e, *course_id))?;

        let inventory = row
            .map(|row| inventory_from_row(*course_id, row))
            .ok_or(StoreError::CourseNotFound(*course_id))?;
        inventory.check_invariant()?;
        Ok(inventory)
    }

    async fn write_inventory(
        tx: &mut Transaction<'static, Postgres>,
        inventory: &CourseInventory,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE course_inventory SET seats_remaining = $2, updated_at = NOW()
             WHERE course_id = $1",
        )
        .bind(inventory.course_id.as_uuid())
        .bind(inventory.seats_remaining)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_ledger(
        tx: &mut Transaction<'static, Postgres>,
        entry: &LedgerEntry,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_log
                 (entry_id, purchase_id, course_id, buyer_id, amount_cents, kind, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.to_string())
        .bind(entry.purchase_id.to_string())
        .bind(entry.course_id.as_uuid())
        .bind(entry.buyer_id.as_uuid())
        .bind(entry.amount_cents)
        .bind(kind_to_str(entry.kind))
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_active(
        tx: &mut Transaction<'static, Postgres>,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseRecord>> {
        let row: Option<PurchaseRow> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE course_id = $1 AND buyer_id = $2 AND NOT refunded"
        ))
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(purchase_from_row).transpose()
    }

    fn map_lock_error(&self, err: sqlx::Error, course_id: CourseId) -> StoreError {
        if sqlstate(&err).as_deref() == Some(LOCK_NOT_AVAILABLE) {
            StoreError::LockTimeout {
                course_id,
                waited_ms: self.lock_timeout_ms,
            }
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_course(&self, inventory: &CourseInventory) -> Result<()> {
        inventory.check_invariant()?;

        let result = sqlx::query(
            "INSERT INTO course_inventory (course_id, capacity, seats_remaining, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (course_id) DO NOTHING",
        )
        .bind(inventory.course_id.as_uuid())
        .bind(inventory.capacity)
        .bind(inventory.seats_remaining)
        .bind(inventory.created_at)
        .bind(inventory.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CourseExists(inventory.course_id));
        }
        Ok(())
    }

    async fn get_course(&self, course_id: &CourseId) -> Result<Option<CourseInventory>> {
        let row: Option<InventoryRow> = sqlx::query_as(
            "SELECT capacity, seats_remaining, created_at, updated_at
             FROM course_inventory WHERE course_id = $1",
        )
        .bind(course_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| inventory_from_row(*course_id, row)))
    }

    async fn get_active_purchase(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Option<PurchaseRecord>> {
        let row: Option<PurchaseRow> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE course_id = $1 AND buyer_id = $2 AND NOT refunded"
        ))
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(purchase_from_row).transpose()
    }

    async fn list_purchases(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
    ) -> Result<Vec<PurchaseRecord>> {
        let rows: Vec<PurchaseRow> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE course_id = $1 AND buyer_id = $2
             ORDER BY purchase_id"
        ))
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(purchase_from_row).collect()
    }

    async fn list_ledger_by_buyer(
        &self,
        buyer_id: &BuyerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT entry_id, purchase_id, course_id, buyer_id, amount_cents, kind, recorded_at
             FROM payment_log
             WHERE buyer_id = $1
             ORDER BY entry_id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(buyer_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ledger_from_row).collect()
    }

    async fn process_purchase(
        &self,
        record: &PurchaseRecord,
        entry: &LedgerEntry,
    ) -> Result<Receipt> {
        let course_id = record.course_id;
        let buyer_id = record.buyer_id;

        let mut tx = self.begin_locked().await?;
        let mut inventory = self.lock_inventory(&mut tx, &course_id).await?;

        if Self::fetch_active(&mut tx, &course_id, &buyer_id)
            .await?
            .is_some()
        {
            return Err(StoreError::AlreadyPurchased {
                course_id,
                buyer_id,
            });
        }

        if !inventory.take_seat() {
            return Err(StoreError::SoldOut(course_id));
        }

        Self::write_inventory(&mut tx, &inventory).await?;

        sqlx::query(&format!(
            "INSERT INTO purchases ({PURCHASE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(record.purchase_id.to_string())
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .bind(record.amount_cents)
        .bind(record.purchased_at)
        .bind(record.refundable)
        .bind(record.refunded)
        .bind(record.refunded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                StoreError::AlreadyPurchased {
                    course_id,
                    buyer_id,
                }
            } else {
                e.into()
            }
        })?;

        Self::append_ledger(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(Receipt {
            record: record.clone(),
            entry: entry.clone(),
            seats_remaining: inventory.seats_remaining,
        })
    }

    async fn process_refund(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refunded_at: DateTime<Utc>,
        check: &RefundCheck<'_>,
    ) -> Result<Receipt> {
        let mut tx = self.begin_locked().await?;
        let mut inventory = self.lock_inventory(&mut tx, course_id).await?;

        let mut record = Self::fetch_active(&mut tx, course_id, buyer_id)
            .await?
            .ok_or(StoreError::NoActivePurchase {
                course_id: *course_id,
                buyer_id: *buyer_id,
            })?;

        check(&record).map_err(StoreError::NotEligible)?;

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

        Self::write_inventory(&mut tx, &inventory).await?;
        sqlx::query("UPDATE purchases SET refunded = TRUE, refunded_at = $2 WHERE purchase_id = $1")
            .bind(record.purchase_id.to_string())
            .bind(refunded_at)
            .execute(&mut *tx)
            .await?;
        Self::append_ledger(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Receipt {
            record,
            entry,
            seats_remaining: inventory.seats_remaining,
        })
    }

    async fn set_refundable(
        &self,
        course_id: &CourseId,
        buyer_id: &BuyerId,
        refundable: bool,
    ) -> Result<bool> {
        let mut tx = self.begin_locked().await?;
        self.lock_inventory(&mut tx, course_id).await?;

        let record = Self::fetch_active(&mut tx, course_id, buyer_id)
            .await?
            .ok_or(StoreError::NoActivePurchase {
                course_id: *course_id,
                buyer_id: *buyer_id,
            })?;

        if record.refundable == refundable {
            return Ok(false);
        }

        sqlx::query("UPDATE purchases SET refundable = $2 WHERE purchase_id = $1")
            .bind(record.purchase_id.to_string())
            .bind(refundable)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn list_course_tags(&self, course_id: &CourseId) -> Result<BTreeSet<TagId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT tag_id FROM course_tags WHERE course_id = $1")
                .bind(course_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(tag,)| {
                u64::try_from(tag)
                    .map(TagId::new)
                    .map_err(|_| StoreError::Serialization(format!("negative tag id {tag}")))
            })
            .collect()
    }

    async fn insert_course_tags(
        &self,
        course_id: &CourseId,
        tags: &BTreeSet<TagId>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO course_tags (course_id, tag_id)
             SELECT $1, UNNEST($2::BIGINT[])
             ON CONFLICT DO NOTHING",
        )
        .bind(course_id.as_uuid())
        .bind(tag_params(tags)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_course_tags(
        &self,
        course_id: &CourseId,
        tags: &BTreeSet<TagId>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM course_tags WHERE course_id = $1 AND tag_id = ANY($2)")
            .bind(course_id.as_uuid())
            .bind(tag_params(tags)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CourseMetadataSource for PgStore {
    async fn course_terms(&self, course_id: &CourseId) -> Result<Option<CourseTerms>> {
        let row: Option<(i64, DateTime<Utc>, i64, i32)> = sqlx::query_as(
            "SELECT price_cents, starts_at, refund_window_seconds, max_attended_sessions
             FROM course_terms WHERE course_id = $1",
        )
        .bind(course_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(price_cents, starts_at, window_seconds, max_attended)| {
            let max_attended_sessions = u32::try_from(max_attended).map_err(|_| {
                StoreError::Serialization(format!("negative session limit {max_attended}"))
            })?;
            Ok(CourseTerms {
                course_id: *course_id,
                price_cents,
                starts_at,
                refund_policy: RefundPolicy {
                    window_seconds,
                    max_attended_sessions,
                },
            })
        })
        .transpose()
    }

    async fn attended_sessions(&self, course_id: &CourseId, buyer_id: &BuyerId) -> Result<u32> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT attended FROM attendance WHERE course_id = $1 AND buyer_id = $2",
        )
        .bind(course_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map_or(Ok(0), |(attended,)| {
            u32::try_from(attended)
                .map_err(|_| StoreError::Serialization("negative attendance".into()))
        })
    }
}

// =============================================================================
// Row conversion
// =============================================================================

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

const fn inventory_from_row(
    course_id: CourseId,
    (capacity, seats_remaining, created_at, updated_at): InventoryRow,
) -> CourseInventory {
    CourseInventory {
        course_id,
        capacity,
        seats_remaining,
        created_at,
        updated_at,
    }
}

fn purchase_from_row(row: PurchaseRow) -> Result<PurchaseRecord> {
    let (purchase_id, course_id, buyer_id, amount_cents, purchased_at, refundable, refunded, refunded_at) =
        row;

    Ok(PurchaseRecord {
        purchase_id: purchase_id.parse::<PurchaseId>().map_err(|e| {
            StoreError::Serialization(format!("invalid purchase id {purchase_id}: {e}"))
        })?,
        course_id: CourseId::from_uuid(course_id),
        buyer_id: BuyerId::from_uuid(buyer_id),
        amount_cents,
        purchased_at,
        refundable,
        refunded,
        refunded_at,
    })
}

fn ledger_from_row(row: LedgerRow) -> Result<LedgerEntry> {
    let (entry_id, purchase_id, course_id, buyer_id, amount_cents, kind, recorded_at) = row;

    Ok(LedgerEntry {
        id: entry_id
            .parse::<LedgerEntryId>()
            .map_err(|e| StoreError::Serialization(format!("invalid entry id {entry_id}: {e}")))?,
        purchase_id: purchase_id.parse::<PurchaseId>().map_err(|e| {
            StoreError::Serialization(format!("invalid purchase id {purchase_id}: {e}"))
        })?,
        course_id: CourseId::from_uuid(course_id),
        buyer_id: BuyerId::from_uuid(buyer_id),
        amount_cents,
        kind: kind_from_str(&kind)?,
        recorded_at,
    })
}

const fn kind_to_str(kind: LedgerKind) -> &'static str {
    match kind {
        LedgerKind::Purchase => "purchase",
        LedgerKind::Refund => "refund",
    }
}

fn kind_from_str(kind: &str) -> Result<LedgerKind> {
    match kind {
        "purchase" => Ok(LedgerKind::Purchase),
        "refund" => Ok(LedgerKind::Refund),
        other => Err(StoreError::Serialization(format!("unknown ledger kind {other}"))),
    }
}

fn tag_params(tags: &BTreeSet<TagId>) -> Result<Vec<i64>> {
    tags.iter()
        .map(|tag| {
            i64::try_from(tag.get())
                .map_err(|_| StoreError::InvalidInput(format!("tag id {tag} out of range")))
        })
        .collect()
}
