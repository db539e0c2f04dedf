//! Common test utilities for seatledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tempfile::TempDir;

use seatledger_core::{
    BuyerId, CourseId, CourseInventory, CourseTerms, LedgerEntry, PurchaseRecord, RefundPolicy,
};
use seatledger_service::auth::BuyerClaims;
use seatledger_service::{AppState, PaymentLogError, PaymentLogSink, ServiceConfig};
use seatledger_store::{RocksStore, Store, StoreOptions};

/// HS256 secret configured for test tokens.
pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Default seat price for test courses.
pub const TEST_PRICE_CENTS: i64 = 4900;

/// Sink that keeps every delivered entry in memory.
#[derive(Default)]
pub struct RecordingPaymentLog {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl RecordingPaymentLog {
    /// Entries delivered so far.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Wait until at least `count` entries arrived (deliveries run in the
    /// background).
    pub async fn wait_for(&self, count: usize) -> Vec<LedgerEntry> {
        for _ in 0..200 {
            let entries = self.entries();
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} payment log entries, got {}",
            self.entries().len()
        );
    }
}

#[async_trait]
impl PaymentLogSink for RecordingPaymentLog {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), PaymentLogError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// Wired services.
    pub state: AppState,
    /// The concrete store, for terms and attendance setup.
    pub store: Arc<RocksStore>,
    /// Captured payment log deliveries.
    pub payment_log: Arc<RecordingPaymentLog>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_lock_wait(Duration::from_secs(5))
    }

    /// Harness whose course locks give up after `lock_wait`.
    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        let _ = seatledger_service::telemetry::try_init();

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(
            RocksStore::open_with(temp_dir.path(), StoreOptions { lock_wait })
                .expect("Failed to open store"),
        );

        let config = ServiceConfig {
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            lock_wait_timeout_ms: u64::try_from(lock_wait.as_millis()).unwrap(),
            auth_jwt_secret: Some(TEST_JWT_SECRET.into()),
            ..ServiceConfig::default()
        };

        let payment_log = Arc::new(RecordingPaymentLog::default());
        let state = AppState::new(store.clone(), store.clone(), config)
            .with_payment_log(payment_log.clone());

        Self {
            state,
            store,
            payment_log,
            _temp_dir: temp_dir,
        }
    }

    /// Create a course starting tomorrow with the default refund policy.
    pub async fn create_course(&self, capacity: i32) -> CourseId {
        self.create_course_with(capacity, Utc::now() + chrono::Duration::days(1), RefundPolicy::default())
            .await
    }

    /// Create a course with explicit start and refund policy.
    pub async fn create_course_with(
        &self,
        capacity: i32,
        starts_at: DateTime<Utc>,
        refund_policy: RefundPolicy,
    ) -> CourseId {
        let course_id = CourseId::generate();
        let inventory = CourseInventory::new(course_id, capacity).unwrap();
        self.store.create_course(&inventory).await.unwrap();
        self.store
            .put_course_terms(&CourseTerms {
                course_id,
                price_cents: TEST_PRICE_CENTS,
                starts_at,
                refund_policy,
            })
            .await
            .unwrap();
        course_id
    }

    /// Seats left in a course.
    pub async fn seats_remaining(&self, course_id: CourseId) -> i32 {
        self.store
            .get_course(&course_id)
            .await
            .unwrap()
            .unwrap()
            .seats_remaining
    }

    /// Every purchase record of a buyer in a course, oldest first.
    pub async fn purchase_records(&self, course_id: CourseId, buyer_id: BuyerId) -> Vec<PurchaseRecord> {
        self.store
            .list_purchases(&course_id, &buyer_id)
            .await
            .unwrap()
    }

    /// A signed token identifying `buyer_id`.
    pub fn token_for(&self, buyer_id: BuyerId) -> String {
        token_with(
            &buyer_id.to_string(),
            &self.state.config.auth_issuer,
            &self.state.config.auth_audience,
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Sign a token with the test secret.
pub fn token_with(sub: &str, iss: &str, aud: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = BuyerClaims {
        sub: sub.to_string(),
        iss: iss.to_string(),
        aud: aud.to_string(),
        exp: now + 600,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
