use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::error::SyncError;
use super::reconcile::ReconcileCounts;
use crate::storage::DefragmentOutcome;

/// Why an update job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTrigger {
    /// Explicit request; updates exactly the selection.
    Manual,
    /// Timer tick; only feeds that are due.
    Scheduled,
    /// `update_on_startup`; behaves like a manual update of every feed.
    Startup,
}

/// One feed that could not be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFailure {
    pub feed_id: i64,
    pub title: String,
    pub error: SyncError,
}

/// Outcome of a finished (or cancelled) update job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trigger: UpdateTrigger,
    /// Feeds selected for the job.
    pub feeds_total: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Feeds skipped or abandoned because the job was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub errors: Vec<FeedFailure>,
}

impl UpdateSummary {
    pub(crate) fn new(trigger: UpdateTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            trigger,
            feeds_total: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    pub(crate) fn add_counts(&mut self, counts: ReconcileCounts) {
        self.new += counts.new;
        self.updated += counts.updated;
        self.unchanged += counts.unchanged;
    }

    pub fn counts(&self) -> ReconcileCounts {
        ReconcileCounts {
            new: self.new,
            updated: self.updated,
            unchanged: self.unchanged,
        }
    }
}

/// Notifications sent upward to the UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    UpdateStarted {
        trigger: UpdateTrigger,
        feeds_total: usize,
    },
    /// A feed's pipeline finished, successfully or not.
    FeedUpdated {
        feed_id: i64,
        title: Arc<str>,
        current: usize,
        total: usize,
    },
    UpdateFinished(UpdateSummary),
    DefragmentFinished(DefragmentOutcome),
}
