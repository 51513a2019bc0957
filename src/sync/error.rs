use serde::Serialize;
use thiserror::Error;

use super::lock::Operation;
use crate::feed::{FetchError, NetworkErrorKind, ParseError};
use crate::storage::DatabaseError;

/// Errors reported by the sync engine, per feed or for a whole operation.
///
/// Per-feed variants (`Network` through `StoreWriteFailed`) end up in the
/// update summary and the feed's `last_error`; the others are returned to
/// the caller of the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum SyncError {
    #[error("network error ({kind}): {detail}")]
    Network {
        kind: NetworkErrorKind,
        detail: String,
    },

    #[error("request timed out")]
    Timeout,

    #[error("authentication required")]
    AuthRequired,

    #[error("unparsable content: {reason}")]
    UnparsableContent { reason: String },

    /// The per-feed transaction failed and was rolled back.
    #[error("failed to write to the message store: {0}")]
    StoreWriteFailed(String),

    /// Another operation holds the engine lock. Never queued.
    #[error("engine busy: {active} in progress")]
    Busy { active: Operation },

    #[error("cancelled")]
    Cancelled,

    /// The store cannot be reached at all. Aborts the whole job.
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),

    /// A structural edit was rejected (unknown id, cycle, empty title, ...).
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    /// A job task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Map a store error hit while syncing a feed.
    pub(crate) fn from_store(err: DatabaseError) -> Self {
        if err.is_unavailable() {
            SyncError::StoreUnavailable(err.to_string())
        } else {
            SyncError::StoreWriteFailed(err.to_string())
        }
    }

    /// Map a store error hit while applying a structural edit.
    pub(crate) fn from_edit(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { .. } | DatabaseError::Invalid(_) => {
                SyncError::InvalidEdit(err.to_string())
            }
            other => SyncError::from_store(other),
        }
    }

    /// Errors that end the whole job rather than one feed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_))
    }
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { kind, detail } => SyncError::Network { kind, detail },
            FetchError::Timeout => SyncError::Timeout,
            FetchError::AuthRequired => SyncError::AuthRequired,
            FetchError::Cancelled => SyncError::Cancelled,
            FetchError::HttpStatus(code) => SyncError::Network {
                kind: NetworkErrorKind::from_status(code),
                detail: format!("HTTP status {}", code),
            },
            other @ (FetchError::ResponseTooLarge | FetchError::IncompleteResponse { .. }) => {
                SyncError::Network {
                    kind: NetworkErrorKind::ProtocolError,
                    detail: other.to_string(),
                }
            }
            other @ FetchError::InvalidUrl(_) => SyncError::Network {
                kind: NetworkErrorKind::Unknown,
                detail: other.to_string(),
            },
        }
    }
}

impl From<ParseError> for SyncError {
    fn from(err: ParseError) -> Self {
        SyncError::UnparsableContent {
            reason: err.to_string(),
        }
    }
}
