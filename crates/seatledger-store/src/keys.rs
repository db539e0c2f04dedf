//! Key encoding utilities for `RocksDB`.
//!
//! All identifiers are fixed width (16-byte UUID/ULID, 8-byte tag id), so
//! composite keys are plain concatenations and prefixes select one course or
//! one buyer.

use seatledger_core::{BuyerId, CourseId, LedgerEntryId, PurchaseId, TagId};

/// Create a course key from a course ID.
#[must_use]
pub fn course_key(course_id: &CourseId) -> Vec<u8> {
    course_id.as_bytes().to_vec()
}

/// Create a `course_id || buyer_id` key.
///
/// Used directly by the active-purchase index and attendance counters, and
/// as the prefix of a buyer's purchase history in one course.
#[must_use]
pub fn enrollment_key(course_id: &CourseId, buyer_id: &BuyerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(course_id.as_bytes());
    key.extend_from_slice(buyer_id.as_bytes());
    key
}

/// Create a purchase key.
///
/// Format: `course_id (16) || buyer_id (16) || purchase_id (16)`.
/// ULIDs are time-ordered, so a buyer's records in a course sort oldest first.
#[must_use]
pub fn purchase_key(course_id: &CourseId, buyer_id: &BuyerId, purchase_id: &PurchaseId) -> Vec<u8> {
    let mut key = enrollment_key(course_id, buyer_id);
    key.extend_from_slice(&purchase_id.to_bytes());
    key
}

/// Create a ledger entry key.
#[must_use]
pub fn ledger_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a buyer-ledger index key.
///
/// Format: `buyer_id (16) || entry_id (16)`.
#[must_use]
pub fn buyer_ledger_key(buyer_id: &BuyerId, entry_id: &LedgerEntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(buyer_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Prefix for iterating all ledger entries of a buyer.
#[must_use]
pub fn buyer_ledger_prefix(buyer_id: &BuyerId) -> Vec<u8> {
    buyer_id.as_bytes().to_vec()
}

/// Create a course-tag key.
///
/// Format: `course_id (16) || tag_id (8, big-endian)`.
#[must_use]
pub fn course_tag_key(course_id: &CourseId, tag_id: TagId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(course_id.as_bytes());
    key.extend_from_slice(&tag_id.to_be_bytes());
    key
}

/// Extract the 16-byte id stored at `offset` of a composite key.
#[must_use]
pub fn id_bytes_at(key: &[u8], offset: usize) -> Option<[u8; 16]> {
    key.get(offset..offset + 16)?.try_into().ok()
}

/// Extract the ledger entry ID from a buyer-ledger index key.
#[must_use]
pub fn entry_id_from_buyer_key(key: &[u8]) -> Option<LedgerEntryId> {
    id_bytes_at(key, 16).map(LedgerEntryId::from_bytes)
}

/// Extract the tag ID from a course-tag key.
#[must_use]
pub fn tag_id_from_course_key(key: &[u8]) -> Option<TagId> {
    let bytes: [u8; 8] = key.get(16..24)?.try_into().ok()?;
    Some(TagId::new(u64::from_be_bytes(bytes)))
}
