//! Core types for seatledger.
//!
//! This crate holds the domain model of course seat inventory:
//!
//! - **Identifiers**: `CourseId`, `BuyerId`, `PurchaseId`, `LedgerEntryId`, `TagId`
//! - **Inventory**: `CourseInventory`, `CourseTerms`, `RefundPolicy`
//! - **Ledger**: `PurchaseRecord`, `LedgerEntry`, `LedgerKind`
//! - **Refunds**: `check_refund`, `RefundIneligibility`
//! - **Outcomes**: `PurchaseOutcome`, `RefundOutcome`, `RevokeOutcome`
//! - **Tags**: `reconcile`, `TagDiff`, `TagUpdate`
//!
//! # Seat Invariant
//!
//! For every course, `0 <= seats_remaining <= capacity` at every committed
//! state. Nothing in this crate persists state; the store enforces the
//! invariant by changing seat counts only inside a per-course locked unit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod course;
pub mod eligibility;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod purchase;
pub mod tags;

pub use course::{
    CourseInventory, CourseTerms, RefundPolicy, DEFAULT_MAX_ATTENDED_SESSIONS,
    DEFAULT_REFUND_WINDOW_DAYS, MAX_REFUND_WINDOW_DAYS,
};
pub use eligibility::{check_refund, RefundIneligibility};
pub use error::{CoreError, Result};
pub use ids::{BuyerId, CourseId, IdError, LedgerEntryId, PurchaseId, TagId};
pub use outcome::{
    codes, Failure, FailureKind, PurchaseOutcome, Receipt, RefundOutcome, RevokeOutcome,
};
pub use purchase::{LedgerEntry, LedgerKind, PurchaseRecord};
pub use tags::{reconcile, TagDiff, TagUpdate};
