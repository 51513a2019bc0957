use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::events::{FeedFailure, SyncEvent, UpdateSummary, UpdateTrigger};
use super::lock::{Operation, OperationGuard, OperationLock};
use super::pipeline;
use super::schedule;
use crate::config::Config;
use crate::feed::Fetcher;
use crate::storage::{Database, DefragmentOutcome, Feed};

/// What an update request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSelection {
    All,
    /// Explicit feeds plus every feed inside the categories (recursively).
    Items {
        feeds: Vec<i64>,
        categories: Vec<i64>,
    },
}

impl UpdateSelection {
    pub fn feeds(ids: impl IntoIterator<Item = i64>) -> Self {
        UpdateSelection::Items {
            feeds: ids.into_iter().collect(),
            categories: Vec::new(),
        }
    }

    pub fn categories(ids: impl IntoIterator<Item = i64>) -> Self {
        UpdateSelection::Items {
            feeds: Vec::new(),
            categories: ids.into_iter().collect(),
        }
    }
}

/// Handle to a running update job.
///
/// Dropping the handle does not stop the job.
#[derive(Debug)]
pub struct UpdateHandle {
    token: CancellationToken,
    join: JoinHandle<Result<UpdateSummary, SyncError>>,
}

impl UpdateHandle {
    /// Stop the job. In-flight requests are aborted and no further feed is
    /// committed; feeds already committed stay committed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the job to finish.
    ///
    /// # Errors
    ///
    /// [`SyncError::StoreUnavailable`] if the store became unreachable
    /// during the job, [`SyncError::Internal`] if the job task panicked.
    pub async fn wait(self) -> Result<UpdateSummary, SyncError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::Internal(e.to_string())),
        }
    }
}

enum JobFeeds {
    Selection(UpdateSelection),
    Resolved(Vec<Feed>),
}

pub(super) struct Inner {
    pub(super) db: Database,
    fetcher: Fetcher,
    pub(super) lock: OperationLock,
    global_interval_minutes: u32,
    worker_pool_size: usize,
    tick: std::time::Duration,
    update_on_startup: bool,
    events: Option<mpsc::Sender<SyncEvent>>,
}

/// The engine: owns the operation lock and runs update jobs, storage
/// maintenance and structural edits against one [`Database`].
///
/// Cheap to clone; clones share the lock.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        fetcher: Fetcher,
        config: &Config,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                fetcher,
                lock: OperationLock::new(),
                global_interval_minutes: config.global_interval_minutes,
                worker_pool_size: config.worker_pool_size.max(1),
                tick: config.tick_interval(),
                update_on_startup: config.update_on_startup,
                events,
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// The operation currently running, if any.
    pub fn active_operation(&self) -> Option<Operation> {
        self.inner.lock.active()
    }

    /// Start an update job.
    ///
    /// Returns immediately. Fails with [`SyncError::Busy`] without side
    /// effects if any operation is running. Must be called from within a
    /// Tokio runtime.
    pub fn request_update(
        &self,
        selection: UpdateSelection,
        trigger: UpdateTrigger,
    ) -> Result<UpdateHandle, SyncError> {
        let guard = self.inner.lock.try_acquire(Operation::Update)?;
        tracing::info!(trigger = ?trigger, selection = ?selection, "Update requested");
        Ok(self.spawn_update(guard, JobFeeds::Selection(selection), trigger))
    }

    /// One timer tick: start a scheduled update of the feeds due at `now`.
    ///
    /// Returns `Ok(None)` when nothing is due or another operation is
    /// running; a busy tick is skipped, not queued.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<UpdateHandle>, SyncError> {
        let guard = match self.inner.lock.try_acquire(Operation::Update) {
            Ok(guard) => guard,
            Err(SyncError::Busy { active }) => {
                tracing::debug!(active = %active, "Engine busy, skipping scheduled tick");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let feeds = self
            .inner
            .db
            .get_feeds()
            .await
            .map_err(SyncError::from_store)?;
        let due: Vec<Feed> = feeds
            .into_iter()
            .filter(|f| schedule::is_due(f, self.inner.global_interval_minutes, now))
            .collect();

        if due.is_empty() {
            tracing::trace!("No feeds due");
            return Ok(None);
        }

        tracing::info!(due = due.len(), "Scheduled update");
        Ok(Some(self.spawn_update(
            guard,
            JobFeeds::Resolved(due),
            UpdateTrigger::Scheduled,
        )))
    }

    /// Minutes until the feed's next automatic update, `None` if it has none.
    pub fn minutes_until_due(&self, feed: &Feed, now: DateTime<Utc>) -> Option<i64> {
        schedule::minutes_until_due(feed, self.inner.global_interval_minutes, now)
    }

    /// Run the periodic timer until `shutdown` fires.
    ///
    /// With `update_on_startup` a manual update of every feed runs first.
    /// On shutdown the running job is cancelled and awaited.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut current: Option<UpdateHandle> = None;

        if self.inner.update_on_startup {
            match self.request_update(UpdateSelection::All, UpdateTrigger::Startup) {
                Ok(handle) => current = Some(handle),
                Err(e) => tracing::warn!(error = %e, "Startup update not started"),
            }
        }

        let mut interval = tokio::time::interval(self.inner.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(handle) = current.take() {
                        handle.cancel();
                        log_job_result(handle.wait().await);
                    }
                    tracing::info!("Scheduler stopped");
                    break;
                }
                _ = interval.tick() => {
                    if current.as_ref().is_some_and(UpdateHandle::is_finished) {
                        if let Some(handle) = current.take() {
                            log_job_result(handle.wait().await);
                        }
                    }
                    match self.tick(Utc::now()).await {
                        Ok(Some(handle)) => {
                            if let Some(previous) = current.replace(handle) {
                                // Only reachable if the lock was free, so it finished
                                log_job_result(previous.wait().await);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Scheduled tick failed"),
                    }
                }
            }
        }
    }

    /// Compact the store.
    ///
    /// # Errors
    ///
    /// [`SyncError::Busy`] while any other operation is running.
    pub async fn defragment(&self) -> Result<DefragmentOutcome, SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::Defragment)?;
        let outcome = self.inner.db.defragment().await;
        self.inner
            .emit(SyncEvent::DefragmentFinished(outcome.clone()))
            .await;
        Ok(outcome)
    }

    /// Permanently remove deleted messages, returning how many were removed.
    ///
    /// # Errors
    ///
    /// [`SyncError::Busy`] while any other operation is running.
    pub async fn purge_deleted(&self) -> Result<u64, SyncError> {
        let _guard = self.inner.lock.try_acquire(Operation::Purge)?;
        self.inner
            .db
            .purge_deleted()
            .await
            .map_err(SyncError::from_store)
    }

    fn spawn_update(
        &self,
        guard: OperationGuard,
        feeds: JobFeeds,
        trigger: UpdateTrigger,
    ) -> UpdateHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let inner = Arc::clone(&self.inner);

        let join = tokio::spawn(async move {
            // Released on every exit path, including panics
            let _guard = guard;
            inner.run_update(feeds, trigger, cancel).await
        });

        UpdateHandle { token, join }
    }
}

impl Inner {
    pub(super) async fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.send(event).await {
                tracing::debug!(error = %e, "Event receiver dropped");
            }
        }
    }

    async fn resolve(
        &self,
        feeds: JobFeeds,
        trigger: UpdateTrigger,
    ) -> Result<Vec<Feed>, SyncError> {
        let selection = match feeds {
            JobFeeds::Resolved(feeds) => return Ok(feeds),
            JobFeeds::Selection(selection) => selection,
        };

        let selected = match selection {
            UpdateSelection::All => self.db.get_feeds().await,
            UpdateSelection::Items { feeds, categories } => {
                let mut ids: BTreeSet<i64> = feeds.into_iter().collect();
                match self.db.feed_ids_in_categories(&categories).await {
                    Ok(nested) => ids.extend(nested),
                    Err(e) => return Err(SyncError::from_store(e)),
                }
                let ids: Vec<i64> = ids.into_iter().collect();
                self.db.get_feeds_by_ids(&ids).await
            }
        }
        .map_err(SyncError::from_store)?;

        if trigger != UpdateTrigger::Scheduled {
            return Ok(selected);
        }
        let now = Utc::now();
        Ok(selected
            .into_iter()
            .filter(|f| schedule::is_due(f, self.global_interval_minutes, now))
            .collect())
    }

    async fn run_update(
        self: Arc<Self>,
        feeds: JobFeeds,
        trigger: UpdateTrigger,
        cancel: CancellationToken,
    ) -> Result<UpdateSummary, SyncError> {
        let mut summary = UpdateSummary::new(trigger, Utc::now());

        let feeds = match self.resolve(feeds, trigger).await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Could not load feeds for update");
                return Err(e);
            }
        };

        let total = feeds.len();
        summary.feeds_total = total;
        self.emit(SyncEvent::UpdateStarted {
            trigger,
            feeds_total: total,
        })
        .await;

        let completed = Arc::new(AtomicUsize::new(0));
        // Set on a fatal error: queued feeds are skipped, in-flight ones finish
        let stop_dispatch = Arc::new(AtomicBool::new(false));
        let results: Vec<(Feed, Result<_, SyncError>)> = stream::iter(feeds)
            .map(|feed| {
                let inner = Arc::clone(&self);
                let cancel = cancel.clone();
                let completed = Arc::clone(&completed);
                let stop_dispatch = Arc::clone(&stop_dispatch);

                async move {
                    let result = if stop_dispatch.load(Ordering::Acquire) {
                        Err(SyncError::Cancelled)
                    } else {
                        pipeline::update_feed(&inner.db, &inner.fetcher, &feed, &cancel).await
                    };

                    if let Err(e) = &result {
                        if e.is_fatal() {
                            tracing::error!(feed_id = feed.id, error = %e, "Store unavailable, aborting update");
                            stop_dispatch.store(true, Ordering::Release);
                        } else if !matches!(e, SyncError::Cancelled) {
                            tracing::warn!(feed_id = feed.id, title = %feed.title, error = %e, "Feed update failed");
                        }
                    }

                    let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                    inner
                        .emit(SyncEvent::FeedUpdated {
                            feed_id: feed.id,
                            title: Arc::clone(&feed.title),
                            current: done,
                            total,
                        })
                        .await;

                    (feed, result)
                }
            })
            .buffer_unordered(self.worker_pool_size)
            .collect()
            .await;

        let mut fatal: Option<SyncError> = None;
        let mut failures: Vec<(i64, String)> = Vec::new();

        for (feed, result) in results {
            match result {
                Ok(counts) => summary.add_counts(counts),
                Err(SyncError::Cancelled) => summary.skipped += 1,
                Err(e) if e.is_fatal() => {
                    summary.skipped += 1;
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    summary.failed += 1;
                    failures.push((feed.id, e.to_string()));
                    summary.errors.push(FeedFailure {
                        feed_id: feed.id,
                        title: feed.title.to_string(),
                        error: e,
                    });
                }
            }
        }

        if fatal.is_none() {
            let attempted_at = Utc::now().timestamp();
            if let Err(e) = self
                .db
                .batch_record_fetch_failures(&failures, attempted_at)
                .await
            {
                tracing::warn!(error = %e, "Failed to record feed errors");
            }
        }

        summary.cancelled = cancel.is_cancelled() && fatal.is_none();
        summary.finished_at = Utc::now();
        summary.errors.sort_by_key(|f| f.feed_id);

        tracing::info!(
            trigger = ?trigger,
            feeds = summary.feeds_total,
            new = summary.new,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Update finished"
        );
        self.emit(SyncEvent::UpdateFinished(summary.clone())).await;

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

fn log_job_result(result: Result<UpdateSummary, SyncError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Update job failed");
    }
}
