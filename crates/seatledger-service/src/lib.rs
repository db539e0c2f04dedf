//! Seatledger services.
//!
//! This crate wires the seat inventory store into the operations callers
//! use:
//!
//! - Seat purchase, ownership check and payment history ([`EnrollmentService`])
//! - Refund and refund-status changes ([`RefundService`])
//! - Course tag reconciliation ([`CourseTagService`])
//!
//! # Authentication
//!
//! [`AppState::purchase_with_token`] and [`AppState::refund_with_token`]
//! resolve the buyer from an HS256 JWT before touching inventory. A token
//! that does not resolve yields `not_authenticated`.
//!
//! # Payment Log
//!
//! Ledger entries are written by the store inside each purchase or refund.
//! After commit they are handed to a [`PaymentLogSink`]: a structured log
//! line by default, or an HTTP endpoint when `PAYMENT_LOG_URL` is set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod payment_log;
pub mod refund;
pub mod state;
pub mod tags;
pub mod telemetry;

pub use auth::{AuthError, IdentityResolver, JwtIdentityResolver};
pub use config::{ConfigError, ServiceConfig};
pub use enrollment::EnrollmentService;
pub use error::{Result, ServiceError};
pub use payment_log::{HttpPaymentLog, PaymentLogError, PaymentLogSink, TracingPaymentLog};
pub use refund::RefundService;
pub use state::AppState;
pub use tags::CourseTagService;
