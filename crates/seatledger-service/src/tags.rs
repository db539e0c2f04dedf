//! Course tag maintenance.

use std::collections::BTreeSet;
use std::sync::Arc;

use seatledger_core::{CourseId, TagDiff, TagId, TagUpdate};
use seatledger_store::Store;

use crate::error::Result;

/// Applies desired tag sets to a course.
#[derive(Clone)]
pub struct CourseTagService {
    store: Arc<dyn Store>,
}

impl CourseTagService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current tags of a course.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub async fn tags(&self, course_id: CourseId) -> Result<BTreeSet<TagId>> {
        Ok(self.store.list_course_tags(&course_id).await?)
    }

    /// Reconcile the stored tags with `update` and apply the difference.
    ///
    /// Deletes are issued before inserts, and each batch only when
    /// non-empty. `TagUpdate::Unchanged` touches nothing. Returns the
    /// applied difference.
    ///
    /// # Errors
    ///
    /// Returns an error if a store call fails.
    pub async fn update_tags(&self, course_id: CourseId, update: &TagUpdate) -> Result<TagDiff> {
        if matches!(update, TagUpdate::Unchanged) {
            return Ok(TagDiff::default());
        }

        let existing = self.store.list_course_tags(&course_id).await?;
        let diff = update.diff(&existing);

        if !diff.to_delete.is_empty() {
            self.store
                .delete_course_tags(&course_id, &diff.to_delete)
                .await?;
        }
        if !diff.to_insert.is_empty() {
            self.store
                .insert_course_tags(&course_id, &diff.to_insert)
                .await?;
        }

        tracing::debug!(
            course_id = %course_id,
            inserted = diff.to_insert.len(),
            deleted = diff.to_delete.len(),
            "Course tags updated"
        );

        Ok(diff)
    }

    /// Parse a comma-separated tag list and apply it.
    ///
    /// # Errors
    ///
    /// Returns an error if a store call fails.
    pub async fn update_tags_from_list(&self, course_id: CourseId, raw: &str) -> Result<TagDiff> {
        self.update_tags(course_id, &TagUpdate::parse(raw)).await
    }
}
