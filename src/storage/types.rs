use secrecy::SecretString;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::FeedFormat;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A referenced feed, category or message does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A structural edit was rejected before touching the database
    #[error("{0}")]
    Invalid(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    /// True when the store cannot be reached at all, as opposed to a single
    /// statement failing. The sync engine aborts a whole job on these.
    pub fn is_unavailable(&self) -> bool {
        match self {
            DatabaseError::InstanceLocked => true,
            DatabaseError::Other(e) => matches!(
                e,
                sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Which embedded SQLite flavour backs a [`Database`](super::Database).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// A database file on disk.
    File,
    /// A private in-memory database, lost when the process exits.
    InMemory,
}

/// Result of a storage compaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefragmentOutcome {
    Success,
    Failed(String),
    UnsupportedByBackend,
}

// ============================================================================
// Categories
// ============================================================================

/// A node of the category tree. `parent_id = None` means a top-level
/// category directly under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

/// Fields supplied when creating or editing a category.
#[derive(Debug, Clone, Default)]
pub struct CategorySettings {
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CategoryRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            parent_id: row.parent_id,
            title: row.title,
            description: row.description,
            icon: row.icon,
        }
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// Automatic update policy of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Only updated on explicit manual request.
    Disabled,
    /// Follows the configured global interval.
    #[default]
    Global,
    /// Own interval in minutes.
    Custom(u32),
}

impl UpdatePolicy {
    pub(crate) fn to_columns(self) -> (&'static str, Option<i64>) {
        match self {
            UpdatePolicy::Disabled => ("disabled", None),
            UpdatePolicy::Global => ("global", None),
            UpdatePolicy::Custom(minutes) => ("custom", Some(i64::from(minutes))),
        }
    }

    pub(crate) fn from_columns(kind: &str, interval: Option<i64>) -> Self {
        match (kind, interval) {
            ("disabled", _) => UpdatePolicy::Disabled,
            ("custom", Some(minutes)) if minutes > 0 => {
                UpdatePolicy::Custom(u32::try_from(minutes).unwrap_or(u32::MAX))
            }
            ("global", _) => UpdatePolicy::Global,
            (other, interval) => {
                tracing::warn!(
                    policy = other,
                    interval = ?interval,
                    "Unrecognized update policy in database, using global interval"
                );
                UpdatePolicy::Global
            }
        }
    }
}

/// HTTP authentication scheme configured for a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthScheme::Basic => "basic",
            AuthScheme::Digest => "digest",
            AuthScheme::Ntlm => "ntlm",
        }
    }
}

impl FromStr for AuthScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthScheme::Basic),
            "digest" => Ok(AuthScheme::Digest),
            "ntlm" => Ok(AuthScheme::Ntlm),
            other => Err(format!("unknown authentication scheme '{}'", other)),
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for a protected feed. The password never appears in `Debug`.
#[derive(Debug)]
pub struct FeedAuth {
    pub scheme: AuthScheme,
    pub username: String,
    pub password: SecretString,
}

impl FeedAuth {
    pub fn new(scheme: AuthScheme, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme,
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Feed configuration and last-fetch state.
///
/// `title` uses `Arc<str>` so progress events can carry it without copying.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub category_id: Option<i64>,
    pub title: Arc<str>,
    pub description: Option<String>,
    pub url: String,
    /// Configured character encoding, used when the document declares none.
    pub encoding: Option<String>,
    /// Last known format. `None` until the first successful parse.
    pub format: Option<FeedFormat>,
    pub auth: Option<Arc<FeedAuth>>,
    pub update_policy: UpdatePolicy,
    /// Unix seconds of the last fetch attempt, successful or not.
    pub last_fetched: Option<i64>,
    /// Error of the last attempt, `None` after a success.
    pub last_error: Option<String>,
    pub icon_url: Option<String>,
}

/// Fields supplied when creating or editing a feed.
#[derive(Debug, Clone, Default)]
pub struct FeedSettings {
    pub category_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub encoding: Option<String>,
    pub format: Option<FeedFormat>,
    pub auth: Option<Arc<FeedAuth>>,
    pub update_policy: UpdatePolicy,
    pub icon_url: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub category_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub encoding: Option<String>,
    pub format: Option<String>,
    pub auth_scheme: Option<String>,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub update_policy: String,
    pub update_interval: Option<i64>,
    pub last_fetched: Option<i64>,
    pub last_error: Option<String>,
    pub icon_url: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        let format = self.format.as_deref().and_then(|raw| match raw.parse() {
            Ok(format) => Some(format),
            Err(e) => {
                tracing::warn!(feed_id = self.id, error = %e, "Ignoring stored feed format");
                None
            }
        });

        let auth = match (self.auth_scheme.as_deref(), self.auth_username) {
            (Some(scheme), Some(username)) => match scheme.parse::<AuthScheme>() {
                Ok(scheme) => Some(Arc::new(FeedAuth::new(
                    scheme,
                    username,
                    self.auth_password.unwrap_or_default(),
                ))),
                Err(e) => {
                    tracing::warn!(feed_id = self.id, error = %e, "Ignoring stored feed credentials");
                    None
                }
            },
            _ => None,
        };

        Feed {
            id: self.id,
            category_id: self.category_id,
            title: Arc::from(self.title),
            description: self.description,
            url: self.url,
            encoding: self.encoding,
            format,
            auth,
            update_policy: UpdatePolicy::from_columns(&self.update_policy, self.update_interval),
            last_fetched: self.last_fetched,
            last_error: self.last_error,
            icon_url: self.icon_url,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// User-owned state of a message. Written only by the UI collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags {
    pub read: bool,
    pub important: bool,
    pub deleted: bool,
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub feed_id: i64,
    /// Stable identity key, unique per feed.
    pub identity: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    /// Unix seconds as published by the source.
    pub published: Option<i64>,
    pub flags: MessageFlags,
    pub fetched_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub feed_id: i64,
    pub identity: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub published: Option<i64>,
    pub read: bool,
    pub important: bool,
    pub deleted: bool,
    pub fetched_at: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            feed_id: row.feed_id,
            identity: row.identity,
            title: row.title,
            url: row.url,
            author: row.author,
            body: row.body,
            published: row.published,
            flags: MessageFlags {
                read: row.read,
                important: row.important,
                deleted: row.deleted,
            },
            fetched_at: row.fetched_at,
        }
    }
}

/// The part of a stored message the reconciler compares against.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ExistingMessage {
    pub id: i64,
    pub identity: String,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
}

/// Everything the reconciler needs to know about a feed's stored state.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub messages: Vec<ExistingMessage>,
    /// Identities of purged messages. They must never be inserted again.
    pub tombstones: HashSet<String>,
}

/// A message to insert. Flags always start cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub identity: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub published: Option<i64>,
}

/// Upstream-owned fields of an existing message that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub id: i64,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
}
