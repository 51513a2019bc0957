//! The synchronization engine.
//!
//! [`Scheduler`] owns a single engine-wide [`OperationLock`]. Update jobs,
//! compaction, recycle-bin purges and structural edits all take it; a
//! second request while it is held fails immediately with
//! [`SyncError::Busy`].
//!
//! An update job resolves its selection to feeds and runs
//! fetch → parse → [`reconcile`] → commit for each of them on a bounded
//! worker pool. Per-feed failures are isolated and reported in the
//! [`UpdateSummary`]; only an unreachable store aborts the whole job.

mod admin;
mod error;
mod events;
mod lock;
mod pipeline;
mod reconcile;
pub mod schedule;
mod scheduler;

pub use error::SyncError;
pub use events::{FeedFailure, SyncEvent, UpdateSummary, UpdateTrigger};
pub use lock::{Operation, OperationGuard, OperationLock};
pub use reconcile::{identity_of, reconcile, ReconcileCounts, ReconcilePlan};
pub use scheduler::{Scheduler, UpdateHandle, UpdateSelection};
