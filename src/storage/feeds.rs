use anyhow::Result;
use secrecy::ExposeSecret;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedRow, FeedSettings};
use crate::feed::FeedFormat;
use crate::util::{clean_label, normalize_feed_url, validate_url};

const FEED_COLUMNS: &str = "id, category_id, title, description, url, encoding, format, \
     auth_scheme, auth_username, auth_password, update_policy, update_interval, \
     last_fetched, last_error, icon_url";

/// A feed's settings after validation, ready to bind.
struct ValidFeed {
    title: String,
    url: String,
    policy: &'static str,
    interval: Option<i64>,
    auth_scheme: Option<&'static str>,
    auth_username: Option<String>,
    auth_password: Option<String>,
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Validate and normalize feed settings.
    ///
    /// `feed:` URLs are rewritten to http(s) and only http/https URLs with a
    /// host are accepted. The title is sanitized like category names.
    fn validate_feed(settings: &FeedSettings) -> Result<ValidFeed, DatabaseError> {
        let url = normalize_feed_url(&settings.url);
        let url = validate_url(&url)
            .map_err(|e| DatabaseError::Invalid(format!("Invalid feed URL: {}", e)))?
            .to_string();

        let title = clean_label(&settings.title);
        if title.is_empty() {
            return Err(DatabaseError::Invalid(
                "Feed title cannot be empty or whitespace-only".to_string(),
            ));
        }

        let (policy, interval) = settings.update_policy.to_columns();
        let (auth_scheme, auth_username, auth_password) = match &settings.auth {
            Some(auth) => (
                Some(auth.scheme.as_str()),
                Some(auth.username.clone()),
                Some(auth.password.expose_secret().to_owned()),
            ),
            None => (None, None, None),
        };

        Ok(ValidFeed {
            title,
            url,
            policy,
            interval,
            auth_scheme,
            auth_username,
            auth_password,
        })
    }

    /// Add a feed, returning its ID.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Invalid` for a bad URL, an empty title or a URL that
    /// is already subscribed.
    pub async fn insert_feed(&self, settings: &FeedSettings) -> Result<i64, DatabaseError> {
        let valid = Self::validate_feed(settings)?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(&valid.url)
            .fetch_optional(&self.pool)
            .await?;
        if let Some((id,)) = existing {
            return Err(DatabaseError::Invalid(format!(
                "Feed {} is already subscribed (id {})",
                valid.url, id
            )));
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (category_id, title, description, url, encoding, format,
                               auth_scheme, auth_username, auth_password,
                               update_policy, update_interval, icon_url)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(settings.category_id)
        .bind(&valid.title)
        .bind(&settings.description)
        .bind(&valid.url)
        .bind(&settings.encoding)
        .bind(settings.format.map(FeedFormat::as_str))
        .bind(valid.auth_scheme)
        .bind(&valid.auth_username)
        .bind(&valid.auth_password)
        .bind(valid.policy)
        .bind(valid.interval)
        .bind(&settings.icon_url)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(feed_id = row.0, url = %valid.url, "Feed added");
        Ok(row.0)
    }

    /// Replace a feed's settings. Last-fetch state and messages are kept.
    pub async fn update_feed(&self, id: i64, settings: &FeedSettings) -> Result<(), DatabaseError> {
        let valid = Self::validate_feed(settings)?;

        let clash: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE url = ? AND id != ?")
                .bind(&valid.url)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        if clash.is_some() {
            return Err(DatabaseError::Invalid(format!(
                "Another feed already uses {}",
                valid.url
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE feeds SET
                category_id = ?, title = ?, description = ?, url = ?, encoding = ?,
                format = ?, auth_scheme = ?, auth_username = ?, auth_password = ?,
                update_policy = ?, update_interval = ?, icon_url = ?
            WHERE id = ?
        "#,
        )
        .bind(settings.category_id)
        .bind(&valid.title)
        .bind(&settings.description)
        .bind(&valid.url)
        .bind(&settings.encoding)
        .bind(settings.format.map(FeedFormat::as_str))
        .bind(valid.auth_scheme)
        .bind(&valid.auth_username)
        .bind(&valid.auth_password)
        .bind(valid.policy)
        .bind(valid.interval)
        .bind(&settings.icon_url)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound { entity: "feed", id });
        }
        Ok(())
    }

    /// Delete a feed together with its messages and tombstones.
    pub async fn delete_feed(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound { entity: "feed", id });
        }
        tracing::info!(feed_id = id, "Feed deleted");
        Ok(())
    }

    /// Move a feed into a category, or to the root if `category_id` is `None`.
    pub async fn move_feed_to_category(
        &self,
        feed_id: i64,
        category_id: Option<i64>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "feed",
                id: feed_id,
            });
        }
        Ok(())
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {} FROM feeds WHERE id = ?",
            FEED_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// All feeds ordered by title.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {} FROM feeds ORDER BY title COLLATE NOCASE, id",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// Feeds with the given IDs, ordered by title. Unknown IDs are skipped.
    pub async fn get_feeds_by_ids(&self, ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM feeds WHERE id IN (", FEED_COLUMNS));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY title COLLATE NOCASE, id");

        let rows = builder
            .build_query_as::<FeedRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// IDs of every feed inside the given categories or any of their
    /// descendants. `UNION` deduplicates, so a corrupted cyclic tree still
    /// terminates.
    pub async fn feed_ids_in_categories(
        &self,
        category_ids: &[i64],
    ) -> Result<Vec<i64>, DatabaseError> {
        if category_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "WITH RECURSIVE tree(id) AS (SELECT id FROM categories WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in category_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(
            ") UNION SELECT c.id FROM categories c JOIN tree t ON c.parent_id = t.id) \
             SELECT f.id FROM feeds f WHERE f.category_id IN (SELECT id FROM tree) ORDER BY f.id",
        );

        let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Record failed fetch attempts in a single UPDATE statement.
    ///
    /// PERF-002: one bulk UPDATE with CASE expressions instead of N round-trips.
    /// `last_fetched` is stamped as well, so a failing feed waits for its next
    /// interval instead of being retried on every tick.
    pub async fn batch_record_fetch_failures(
        &self,
        failures: &[(i64, String)],
        attempted_at: i64,
    ) -> Result<(), DatabaseError> {
        if failures.is_empty() {
            return Ok(());
        }

        // UPDATE feeds SET last_error = CASE id WHEN 1 THEN 'e1' ... END,
        //                  last_fetched = ?
        //     WHERE id IN (1, ...)
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE feeds SET last_error = CASE id ");
        for (feed_id, error) in failures {
            builder.push("WHEN ");
            builder.push_bind(*feed_id);
            builder.push(" THEN ");
            builder.push_bind(error.as_str());
            builder.push(" ");
        }
        builder.push("END, last_fetched = ");
        builder.push_bind(attempted_at);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for (feed_id, _) in failures {
            separated.push_bind(*feed_id);
        }
        separated.push_unseparated(")");

        let mut tx = self.pool.begin().await?;
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
