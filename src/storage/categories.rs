use anyhow::Result;

use super::schema::Database;
use super::types::{Category, CategoryRow, CategorySettings, DatabaseError};
use crate::util::clean_label;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// SEC-014: Sanitize and validate a category title.
    ///
    /// Strips control characters, collapses whitespace and rejects
    /// empty/whitespace-only titles.
    fn sanitize_category_title(title: &str) -> Result<String, DatabaseError> {
        let clean = clean_label(title);
        if clean.is_empty() {
            return Err(DatabaseError::Invalid(
                "Category title cannot be empty or whitespace-only".to_string(),
            ));
        }
        Ok(clean)
    }

    /// Create a new category, returning its ID.
    pub async fn create_category(&self, settings: &CategorySettings) -> Result<i64, DatabaseError> {
        let title = Self::sanitize_category_title(&settings.title)?;
        if let Some(parent) = settings.parent_id {
            self.require_category(parent).await?;
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO categories (parent_id, title, description, icon) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(settings.parent_id)
        .bind(&title)
        .bind(&settings.description)
        .bind(&settings.icon)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Replace a category's settings, including its parent.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Invalid` if the new parent is the category itself or
    /// one of its descendants.
    pub async fn update_category(
        &self,
        id: i64,
        settings: &CategorySettings,
    ) -> Result<(), DatabaseError> {
        let title = Self::sanitize_category_title(&settings.title)?;
        self.check_reparent(id, settings.parent_id).await?;

        let result = sqlx::query(
            "UPDATE categories SET parent_id = ?, title = ?, description = ?, icon = ? WHERE id = ?",
        )
        .bind(settings.parent_id)
        .bind(&title)
        .bind(&settings.description)
        .bind(&settings.icon)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "category",
                id,
            });
        }
        Ok(())
    }

    /// Move a category under a new parent, or to the root with `None`.
    pub async fn move_category(&self, id: i64, parent_id: Option<i64>) -> Result<(), DatabaseError> {
        self.check_reparent(id, parent_id).await?;

        let result = sqlx::query("UPDATE categories SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "category",
                id,
            });
        }
        Ok(())
    }

    /// Delete a category. Its feeds and child categories move up to the
    /// deleted category's parent, so nothing is orphaned.
    pub async fn delete_category(&self, id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let parent: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT parent_id FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((parent_id,)) = parent else {
            return Err(DatabaseError::NotFound {
                entity: "category",
                id,
            });
        };

        sqlx::query("UPDATE feeds SET category_id = ? WHERE category_id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE categories SET parent_id = ? WHERE parent_id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(category_id = id, "Category deleted");
        Ok(())
    }

    /// All categories as a flat list ordered by title.
    /// Callers build the tree from `parent_id` relationships.
    pub async fn get_categories(&self) -> Result<Vec<Category>, DatabaseError> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, parent_id, title, description, icon FROM categories ORDER BY title COLLATE NOCASE, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn require_category(&self, id: i64) -> Result<(), DatabaseError> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(()),
            None => Err(DatabaseError::NotFound {
                entity: "category",
                id,
            }),
        }
    }

    /// Reject a parent change that would make the tree cyclic.
    async fn check_reparent(&self, id: i64, new_parent: Option<i64>) -> Result<(), DatabaseError> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        self.require_category(parent).await?;

        // `id` itself plus every descendant. UNION stops on already-seen rows.
        let row: (i64,) = sqlx::query_as(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT ?
                UNION
                SELECT c.id FROM categories c JOIN subtree s ON c.parent_id = s.id
            )
            SELECT COUNT(*) FROM subtree WHERE id = ?
            "#,
        )
        .bind(id)
        .bind(parent)
        .fetch_one(&self.pool)
        .await?;

        if row.0 > 0 {
            return Err(DatabaseError::Invalid(format!(
                "Cannot move category {} below itself or one of its descendants",
                id
            )));
        }
        Ok(())
    }
}
