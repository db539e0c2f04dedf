//! Application state.

use std::sync::Arc;
use std::time::Duration;

use seatledger_core::{CourseId, PurchaseOutcome, RefundOutcome};
#[cfg(feature = "rocksdb-backend")]
use seatledger_store::RocksStore;
use seatledger_store::{CourseMetadataSource, PgStore, Store};

use crate::auth::{AuthError, IdentityResolver, JwtIdentityResolver};
use crate::config::ServiceConfig;
use crate::enrollment::EnrollmentService;
use crate::error::Result;
use crate::payment_log::{HttpPaymentLog, PaymentLogSink, TracingPaymentLog};
use crate::refund::RefundService;
use crate::tags::CourseTagService;

/// Wired services sharing one store.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: ServiceConfig,

    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Course terms and attendance.
    pub metadata: Arc<dyn CourseMetadataSource>,

    /// Token to buyer resolution.
    pub identity: Arc<dyn IdentityResolver>,

    /// Receiver of committed ledger entries.
    pub payment_log: Arc<dyn PaymentLogSink>,

    /// Seat purchases.
    pub enrollment: EnrollmentService,

    /// Refunds.
    pub refunds: RefundService,

    /// Course tags.
    pub tags: CourseTagService,
}

impl AppState {
    /// Validate `config`, open the configured backend and wire the services.
    ///
    /// `DATABASE_URL` selects Postgres; otherwise `RocksDB` is opened at
    /// `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the backend
    /// cannot be opened.
    pub async fn connect(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        if let Some(url) = &config.database_url {
            tracing::info!(max_connections = config.database_max_connections, "Opening PostgreSQL store");
            let store = Arc::new(
                PgStore::connect(url, config.database_max_connections, config.store_options())
                    .await?,
            );
            return Ok(Self::new(store.clone(), store, config));
        }

        Self::open_local(config)
    }

    #[cfg(feature = "rocksdb-backend")]
    fn open_local(config: ServiceConfig) -> Result<Self> {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        let store = Arc::new(RocksStore::open_with(&config.data_dir, config.store_options())?);
        Ok(Self::new(store.clone(), store, config))
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    fn open_local(_config: ServiceConfig) -> Result<Self> {
        Err(crate::config::ConfigError::NoBackend.into())
    }

    /// Wire the services over an already opened store.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        metadata: Arc<dyn CourseMetadataSource>,
        config: ServiceConfig,
    ) -> Self {
        let identity: Arc<dyn IdentityResolver> = Arc::new(JwtIdentityResolver::from_config(&config));

        let payment_log: Arc<dyn PaymentLogSink> = match &config.payment_log_url {
            Some(url) => match HttpPaymentLog::new(
                url.clone(),
                Duration::from_secs(config.payment_log_timeout_seconds),
            ) {
                Ok(sink) => {
                    tracing::info!(payment_log_url = %url, "Payment log delivery enabled");
                    Arc::new(sink)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create payment log client");
                    Arc::new(TracingPaymentLog)
                }
            },
            None => Arc::new(TracingPaymentLog),
        };

        Self::wire(config, store, metadata, identity, payment_log)
    }

    /// Replace the payment log sink.
    #[must_use]
    pub fn with_payment_log(self, payment_log: Arc<dyn PaymentLogSink>) -> Self {
        Self::wire(self.config, self.store, self.metadata, self.identity, payment_log)
    }

    /// Replace the identity resolver.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    fn wire(
        config: ServiceConfig,
        store: Arc<dyn Store>,
        metadata: Arc<dyn CourseMetadataSource>,
        identity: Arc<dyn IdentityResolver>,
        payment_log: Arc<dyn PaymentLogSink>,
    ) -> Self {
        let enrollment = EnrollmentService::new(
            Arc::clone(&store),
            Arc::clone(&metadata),
            Arc::clone(&payment_log),
        );
        let refunds = RefundService::new(
            Arc::clone(&store),
            Arc::clone(&metadata),
            Arc::clone(&payment_log),
        );
        let tags = CourseTagService::new(Arc::clone(&store));

        Self {
            config,
            store,
            metadata,
            identity,
            payment_log,
            enrollment,
            refunds,
            tags,
        }
    }

    /// Resolve the buyer from `token` and purchase a seat.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` (code `not_authenticated`) if the token does not
    /// identify a buyer; no seat operation is attempted.
    pub async fn purchase_with_token(
        &self,
        course_id: CourseId,
        token: &str,
    ) -> std::result::Result<PurchaseOutcome, AuthError> {
        let buyer_id = self.authenticate(token).await?;
        Ok(self.enrollment.purchase(course_id, buyer_id).await)
    }

    /// Resolve the buyer from `token` and refund their seat.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` (code `not_authenticated`) if the token does not
    /// identify a buyer; no seat operation is attempted.
    pub async fn refund_with_token(
        &self,
        course_id: CourseId,
        token: &str,
    ) -> std::result::Result<RefundOutcome, AuthError> {
        let buyer_id = self.authenticate(token).await?;
        Ok(self.refunds.refund(course_id, buyer_id).await)
    }

    async fn authenticate(
        &self,
        token: &str,
    ) -> std::result::Result<seatledger_core::BuyerId, AuthError> {
        self.identity.resolve_buyer_id(token).await.map_err(|e| {
            tracing::debug!(error = %e, "Buyer not authenticated");
            e
        })
    }
}
