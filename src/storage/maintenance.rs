use super::schema::Database;
use super::types::{DatabaseError, DefragmentOutcome, StorageBackend};

impl Database {
    // ========================================================================
    // Storage Maintenance
    // ========================================================================

    /// Compact the database file.
    ///
    /// `VACUUM` rebuilds the file inside its own transaction, so an error
    /// leaves the previous contents intact. An in-memory database has no
    /// file to compact.
    ///
    /// Callers must hold the operation lock; `VACUUM` fails while another
    /// connection has an open transaction.
    pub async fn defragment(&self) -> DefragmentOutcome {
        if self.backend == StorageBackend::InMemory {
            return DefragmentOutcome::UnsupportedByBackend;
        }

        match sqlx::query("VACUUM").execute(&self.pool).await {
            Ok(_) => {
                tracing::info!("Database compacted");
                DefragmentOutcome::Success
            }
            Err(e) => {
                tracing::warn!(error = %e, "Database compaction failed");
                DefragmentOutcome::Failed(e.to_string())
            }
        }
    }

    /// Permanently remove messages in the recycle bin.
    ///
    /// Each purged identity is recorded as a tombstone in the same
    /// transaction so the next fetch does not bring the message back.
    /// Returns the number of messages removed.
    pub async fn purge_deleted(&self) -> Result<u64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO purged_messages (feed_id, identity, purged_at)
            SELECT feed_id, identity, ? FROM messages WHERE deleted = 1
        "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM messages WHERE deleted = 1")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let purged = result.rows_affected();
        tracing::info!(purged = purged, "Purged deleted messages");
        Ok(purged)
    }
}
