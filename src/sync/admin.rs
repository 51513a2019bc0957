//! Structural edits of the feed/category tree.
//!
//! Each edit takes the engine lock for its duration, so the tree never
//! changes under a running update job.

use super::error::SyncError;
use super::lock::Operation;
use super::scheduler::Scheduler;
use crate::storage::{CategorySettings, FeedSettings};

impl Scheduler {
    /// Add a feed, returning its ID.
    pub async fn add_feed(&self, settings: &FeedSettings) -> Result<i64, SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .insert_feed(settings)
            .await
            .map_err(SyncError::from_edit)
    }

    pub async fn edit_feed(&self, id: i64, settings: &FeedSettings) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .update_feed(id, settings)
            .await
            .map_err(SyncError::from_edit)
    }

    /// Delete a feed together with all its messages.
    pub async fn remove_feed(&self, id: i64) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .delete_feed(id)
            .await
            .map_err(SyncError::from_edit)
    }

    pub async fn move_feed(&self, id: i64, category_id: Option<i64>) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .move_feed_to_category(id, category_id)
            .await
            .map_err(SyncError::from_edit)
    }

    /// Add a category, returning its ID.
    pub async fn add_category(&self, settings: &CategorySettings) -> Result<i64, SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .create_category(settings)
            .await
            .map_err(SyncError::from_edit)
    }

    pub async fn edit_category(
        &self,
        id: i64,
        settings: &CategorySettings,
    ) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .update_category(id, settings)
            .await
            .map_err(SyncError::from_edit)
    }

    pub async fn move_category(&self, id: i64, parent_id: Option<i64>) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .move_category(id, parent_id)
            .await
            .map_err(SyncError::from_edit)
    }

    /// Delete a category; its contents move up to its parent.
    pub async fn remove_category(&self, id: i64) -> Result<(), SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::StructuralEdit)?;
        self.inner
            .db
            .delete_category(id)
            .await
            .map_err(SyncError::from_edit)
    }
}
