//! Payment log delivery.
//!
//! The authoritative ledger entry is written by the store inside the same
//! atomic unit as the seat change. Sinks are notified afterwards, once per
//! committed purchase or refund; a delivery failure is logged and never
//! turns a committed operation into a failed one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use seatledger_core::LedgerEntry;

/// Maximum number of delivery attempts per entry.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Error type for payment log delivery.
#[derive(Debug, thiserror::Error)]
pub enum PaymentLogError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("payment log endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl PaymentLogError {
    /// Client errors (4xx) are not retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Append-only consumer of committed ledger entries. Never read back.
#[async_trait]
pub trait PaymentLogSink: Send + Sync {
    /// Deliver one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be delivered.
    async fn append(&self, entry: &LedgerEntry) -> Result<(), PaymentLogError>;
}

/// Sink that writes each entry as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPaymentLog;

#[async_trait]
impl PaymentLogSink for TracingPaymentLog {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), PaymentLogError> {
        tracing::info!(
            target: "seatledger::payment_log",
            entry_id = %entry.id,
            purchase_id = %entry.purchase_id,
            course_id = %entry.course_id,
            buyer_id = %entry.buyer_id,
            amount_cents = entry.amount_cents,
            kind = ?entry.kind,
            recorded_at = %entry.recorded_at,
            "Payment log entry"
        );
        Ok(())
    }
}

/// Sink that POSTs each entry as JSON, retrying with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpPaymentLog {
    client: Client,
    url: String,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl HttpPaymentLog {
    /// Create a sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PaymentLogError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        })
    }

    /// Override the retry policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    async fn post(&self, entry: &LedgerEntry) -> Result<(), PaymentLogError> {
        let response = self.client.post(&self.url).json(entry).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PaymentLogError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PaymentLogSink for HttpPaymentLog {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), PaymentLogError> {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.post(entry).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;

                    if attempt >= self.max_attempts || !e.is_retryable() {
                        tracing::warn!(
                            entry_id = %entry.id,
                            attempt = %attempt,
                            error = %e,
                            "Payment log delivery failed"
                        );
                        return Err(e);
                    }

                    tracing::debug!(
                        entry_id = %entry.id,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Payment log delivery failed, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }
}

/// Deliver `entry` in the background.
pub(crate) fn notify(sink: &Arc<dyn PaymentLogSink>, entry: LedgerEntry) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.append(&entry).await {
            tracing::warn!(
                entry_id = %entry.id,
                course_id = %entry.course_id,
                buyer_id = %entry.buyer_id,
                error = %e,
                "Failed to deliver payment log entry"
            );
        }
    });
}
