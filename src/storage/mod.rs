//! SQLite message store.
//!
//! [`Database`] is split across files by concern: `feeds`, `categories`,
//! `messages` (snapshot, atomic commit, flags) and `maintenance`
//! (compaction, recycle-bin purge).

mod categories;
mod feeds;
mod maintenance;
mod messages;
mod schema;
mod types;

pub use messages::FetchRecord;
pub use schema::Database;
pub use types::{
    AuthScheme, Category, CategorySettings, DatabaseError, DefragmentOutcome, ExistingMessage,
    Feed, FeedAuth, FeedSettings, FeedSnapshot, Message, MessageFlags, MessageUpdate, NewMessage,
    StorageBackend, UpdatePolicy,
};
