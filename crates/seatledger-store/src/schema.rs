//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Course inventory rows, keyed by `course_id`.
    pub const COURSES: &str = "courses";

    /// Course terms (price, start, refund policy), keyed by `course_id`.
    pub const COURSE_TERMS: &str = "course_terms";

    /// Purchase records, keyed by `course_id || buyer_id || purchase_id`.
    pub const PURCHASES: &str = "purchases";

    /// Index: the active purchase of a buyer, keyed by `course_id || buyer_id`.
    /// Value is the `purchase_id`. Removed on refund.
    pub const ACTIVE_PURCHASES: &str = "active_purchases";

    /// Payment ledger entries, keyed by `entry_id` (ULID).
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by buyer, keyed by `buyer_id || entry_id`.
    /// Value is empty (index only).
    pub const LEDGER_BY_BUYER: &str = "ledger_by_buyer";

    /// Tag associations, keyed by `course_id || tag_id`. Value is empty.
    pub const COURSE_TAGS: &str = "course_tags";

    /// Attended session counters, keyed by `course_id || buyer_id`.
    pub const ATTENDANCE: &str = "attendance";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::COURSES,
        cf::COURSE_TERMS,
        cf::PURCHASES,
        cf::ACTIVE_PURCHASES,
        cf::LEDGER,
        cf::LEDGER_BY_BUYER,
        cf::COURSE_TAGS,
        cf::ATTENDANCE,
    ]
}
