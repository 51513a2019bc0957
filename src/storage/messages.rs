use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    DatabaseError, ExistingMessage, FeedSnapshot, Message, MessageFlags, MessageRow,
    MessageUpdate, NewMessage,
};
use crate::feed::{FeedFormat, FeedMetadata};

/// Maximum number of messages to return from any single listing query
/// (OOM protection).
const MAX_MESSAGES: i64 = 5000;

/// Insert rows per statement. 8 columns * 50 = 400 binds, well under
/// SQLite's 999 parameter limit.
const BATCH_SIZE: usize = 50;

/// What a successful feed update writes besides messages.
#[derive(Debug, Clone, Copy)]
pub struct FetchRecord<'a> {
    /// Unix seconds of the fetch attempt.
    pub fetched_at: i64,
    pub format: FeedFormat,
    pub metadata: &'a FeedMetadata,
}

impl Database {
    // ========================================================================
    // Reconciliation Support
    // ========================================================================

    /// Read everything the reconciler compares candidates against.
    pub async fn snapshot_feed(&self, feed_id: i64) -> Result<FeedSnapshot, DatabaseError> {
        let messages = sqlx::query_as::<_, ExistingMessage>(
            "SELECT id, identity, title, body, author FROM messages WHERE feed_id = ?",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        let tombstones: Vec<(String,)> =
            sqlx::query_as("SELECT identity FROM purged_messages WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(FeedSnapshot {
            messages,
            tombstones: tombstones.into_iter().map(|(identity,)| identity).collect(),
        })
    }

    /// Apply a reconcile result and the feed's last-fetch metadata atomically.
    ///
    /// Inserts use `INSERT OR IGNORE` so a row that appeared since the
    /// snapshot is never duplicated. Updates touch only title, body and
    /// author, by primary key; flags, URL and published date are not in the
    /// statement at all. If anything fails the whole feed is rolled back.
    ///
    /// Returns the number of rows actually inserted.
    pub async fn commit_feed_update(
        &self,
        feed_id: i64,
        inserts: &[NewMessage],
        updates: &[MessageUpdate],
        record: FetchRecord<'_>,
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut total_inserted: usize = 0;

        for chunk in inserts.chunks(BATCH_SIZE) {
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO messages \
                 (feed_id, identity, title, url, author, body, published, fetched_at) ",
            );
            insert_builder.push_values(chunk, |mut b, message| {
                b.push_bind(feed_id)
                    .push_bind(&message.identity)
                    .push_bind(&message.title)
                    .push_bind(&message.url)
                    .push_bind(&message.author)
                    .push_bind(&message.body)
                    .push_bind(message.published)
                    .push_bind(record.fetched_at);
            });
            let result = insert_builder.build().execute(&mut *tx).await?;
            total_inserted += result.rows_affected() as usize;
        }

        for update in updates {
            sqlx::query(
                "UPDATE messages SET title = ?, body = ?, author = ? WHERE id = ? AND feed_id = ?",
            )
            .bind(&update.title)
            .bind(&update.body)
            .bind(&update.author)
            .bind(update.id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        }

        // Fill in feed metadata the user has not set; never overwrite it
        let metadata = record.metadata;
        sqlx::query(
            r#"
            UPDATE feeds SET
                last_fetched = ?, last_error = NULL, format = ?,
                description = COALESCE(description, ?),
                icon_url = COALESCE(icon_url, ?)
            WHERE id = ?
        "#,
        )
        .bind(record.fetched_at)
        .bind(record.format.as_str())
        .bind(&metadata.description)
        .bind(&metadata.icon_url)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(total_inserted)
    }

    // ========================================================================
    // Message Queries
    // ========================================================================

    /// Messages of one feed, newest first. Includes deleted ones.
    pub async fn get_messages_for_feed(&self, feed_id: i64) -> Result<Vec<Message>, DatabaseError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, feed_id, identity, title, url, author, body, published,
                   read, important, deleted, fetched_at
            FROM messages
            WHERE feed_id = ?
            ORDER BY published DESC, id
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_MESSAGES)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// Every stored message ordered by ID.
    pub async fn get_all_messages(&self) -> Result<Vec<Message>, DatabaseError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, feed_id, identity, title, url, author, body, published,
                   read, important, deleted, fetched_at
            FROM messages
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// Number of messages per feed that are neither read nor deleted.
    pub async fn unread_counts(&self) -> Result<Vec<(i64, i64)>, DatabaseError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT f.id, COUNT(CASE WHEN m.read = 0 AND m.deleted = 0 THEN 1 END)
            FROM feeds f
            LEFT JOIN messages m ON f.id = m.feed_id
            GROUP BY f.id
            ORDER BY f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Flag Mutations (UI collaborator)
    // ========================================================================

    /// Overwrite all three flags of a message, returning whether it exists.
    pub async fn set_message_flags(
        &self,
        message_id: i64,
        flags: MessageFlags,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE messages SET read = ?, important = ?, deleted = ? WHERE id = ?")
                .bind(flags.read)
                .bind(flags.important)
                .bind(flags.deleted)
                .bind(message_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark message as read (idempotent), returns whether it was changed
    pub async fn mark_message_read(&self, message_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE messages SET read = 1 WHERE id = ? AND read = 0")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically toggle the important flag, returning the new value
    pub async fn toggle_message_important(&self, message_id: i64) -> Result<bool, DatabaseError> {
        let result: (bool,) = sqlx::query_as(
            "UPDATE messages SET important = NOT important WHERE id = ? RETURNING important",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }

    /// Move a message to the recycle bin. It stays stored until purged.
    pub async fn mark_message_deleted(&self, message_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE messages SET deleted = 1 WHERE id = ? AND deleted = 0")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
