//! Course tag reconciliation.
//!
//! Computes the minimal insert/delete sets that turn the stored tag set of a
//! course into the requested one. Pure computation; applying the diff is the
//! caller's job.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::TagId;

/// Rows to insert and delete to reach the desired tag set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDiff {
    /// Tags requested but not stored.
    pub to_insert: BTreeSet<TagId>,
    /// Tags stored but not requested.
    pub to_delete: BTreeSet<TagId>,
}

impl TagDiff {
    /// No rows to touch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// `to_delete = existing - desired`, `to_insert = desired - existing`.
#[must_use]
pub fn reconcile(existing: &BTreeSet<TagId>, desired: &BTreeSet<TagId>) -> TagDiff {
    TagDiff {
        to_insert: desired.difference(existing).copied().collect(),
        to_delete: existing.difference(desired).copied().collect(),
    }
}

/// A tag edit requested by the course-editing path.
///
/// An empty request is `Unchanged`, never an implicit "clear all". Clearing
/// must be asked for with `Replace` of an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tags", rename_all = "snake_case")]
pub enum TagUpdate {
    /// Leave the stored tags alone.
    Unchanged,
    /// Make the stored tags exactly this set.
    Replace(BTreeSet<TagId>),
}

impl TagUpdate {
    /// Parse the comma-separated form sent by course forms (`"1, 2,3"`).
    ///
    /// Whitespace is ignored. Blank input yields `Unchanged`. Malformed input
    /// also yields `Unchanged` so a bad form never wipes a course's tags.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Self::Unchanged;
        }

        match compact
            .split(',')
            .map(str::parse::<TagId>)
            .collect::<Result<BTreeSet<_>, _>>()
        {
            Ok(tags) => Self::Replace(tags),
            Err(e) => {
                tracing::warn!(input = %raw, error = %e, "Ignoring malformed tag list");
                Self::Unchanged
            }
        }
    }

    /// The diff this update implies against `existing`.
    #[must_use]
    pub fn diff(&self, existing: &BTreeSet<TagId>) -> TagDiff {
        match self {
            Self::Unchanged => TagDiff::default(),
            Self::Replace(desired) => reconcile(existing, desired),
        }
    }
}
