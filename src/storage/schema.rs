use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{DatabaseError, StorageBackend};

// ============================================================================
// Database
// ============================================================================

/// Handle to the message store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) backend: StorageBackend,
}

impl Database {
    /// Path that selects the in-memory backend.
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Open a database connection and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database; anything else is a
    /// file path, created if missing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let backend = if path == Self::IN_MEMORY {
            StorageBackend::InMemory
        } else {
            StorageBackend::File
        };
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Create the database file user-only before SQLite touches it
        #[cfg(unix)]
        if backend == StorageBackend::File {
            restrict_permissions(std::path::Path::new(path));
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Concurrent feed commits rely on this.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // A shared-cache in-memory database reports table locks instead of
        // waiting on them, and vanishes with its last connection. One
        // long-lived connection avoids both.
        let pool_options = match backend {
            StorageBackend::File => SqlitePoolOptions::new().max_connections(5),
            StorageBackend::InMemory => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool, backend };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;

        tracing::debug!(path = %path, backend = ?backend, "Database opened");
        Ok(db)
    }

    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    /// Close every pooled connection. Subsequent operations fail as
    /// unavailable; an in-memory database is discarded.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                title TEXT NOT NULL,
                description TEXT,
                icon TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                title TEXT NOT NULL,
                description TEXT,
                url TEXT UNIQUE NOT NULL,
                encoding TEXT,
                format TEXT,
                auth_scheme TEXT,
                auth_username TEXT,
                auth_password TEXT,
                update_policy TEXT NOT NULL DEFAULT 'global',
                update_interval INTEGER,
                last_fetched INTEGER,
                last_error TEXT,
                icon_url TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                identity TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT,
                author TEXT,
                body TEXT,
                published INTEGER,
                read INTEGER NOT NULL DEFAULT 0,
                important INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER NOT NULL,
                UNIQUE(feed_id, identity)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Identities of purged messages, so a re-fetch does not resurrect them
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS purged_messages (
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                identity TEXT NOT NULL,
                purged_at INTEGER NOT NULL,
                PRIMARY KEY (feed_id, identity)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_category ON feeds(category_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_feed_published ON messages(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_deleted ON messages(deleted) WHERE deleted = 1",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(db_path: &std::path::Path) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if db_path.exists() {
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(db_path, perms) {
            tracing::warn!(path = %db_path.display(), error = %e, "SEC-010: Failed to set database file permissions");
        }
    } else if db_path.parent().map_or(true, |p| p.as_os_str().is_empty() || p.exists()) {
        // mode() applies at creation time, no window with umask permissions.
        // If creation fails, SQLite reports the error at connect_with.
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(db_path);
    }
}
