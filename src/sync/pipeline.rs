use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::reconcile::{reconcile, ReconcileCounts};
use crate::feed::{parse, Fetcher};
use crate::storage::{Database, Feed, FetchRecord};

/// Fetch → parse → reconcile → commit for one feed.
///
/// Cancellation is checked before the fetch, during it, and again right
/// before the commit: a cancelled pipeline never writes. Any error leaves
/// the feed's messages exactly as they were.
pub(crate) async fn update_feed(
    db: &Database,
    fetcher: &Fetcher,
    feed: &Feed,
    cancel: &CancellationToken,
) -> Result<ReconcileCounts, SyncError> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let document = fetcher.fetch(feed, cancel).await?;
    tracing::debug!(
        feed_id = feed.id,
        bytes = document.bytes.len(),
        content_type = ?document.content_type,
        "Fetched feed"
    );

    let parsed = parse(&document.bytes, feed.format, feed.encoding.as_deref())
        .inspect_err(|e| tracing::debug!(feed_id = feed.id, error = %e, "Unparsable feed"))?;

    let snapshot = db
        .snapshot_feed(feed.id)
        .await
        .map_err(SyncError::from_store)?;
    let plan = reconcile(feed.id, &snapshot, &parsed.items);

    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let inserted = db
        .commit_feed_update(
            feed.id,
            &plan.inserts,
            &plan.updates,
            FetchRecord {
                fetched_at: chrono::Utc::now().timestamp(),
                format: parsed.format,
                metadata: &parsed.metadata,
            },
        )
        .await
        .map_err(SyncError::from_store)?;

    if inserted != plan.inserts.len() {
        tracing::warn!(
            feed_id = feed.id,
            planned = plan.inserts.len(),
            inserted = inserted,
            "Some planned inserts already existed"
        );
    }

    let counts = ReconcileCounts {
        new: inserted,
        ..plan.counts
    };
    tracing::info!(
        feed_id = feed.id,
        title = %feed.title,
        format = parsed.format.as_str(),
        new = counts.new,
        updated = counts.updated,
        unchanged = counts.unchanged,
        "Feed updated"
    );
    Ok(counts)
}
