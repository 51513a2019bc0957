//! Feed retrieval and parsing.
//!
//! - [`Fetcher`] - HTTP retrieval with timeout, proxy, Basic/Digest auth and
//!   a closed network error classification
//! - [`parse`] - RSS 0.9x, RSS 2.0, ATOM and RDF documents normalized into
//!   one [`ParsedFeed`] shape
//! - [`fetch_metadata`] - fetch and parse without storing, used when a feed
//!   is added
//!
//! # Example
//!
//! ```ignore
//! let fetcher = Fetcher::new(&config)?;
//! let document = fetcher.fetch(&feed, &cancel).await?;
//! let parsed = parse(&document.bytes, feed.format, feed.encoding.as_deref())?;
//! ```

mod auth;
mod fetcher;
mod metadata;
mod parser;

pub use fetcher::{FetchError, FetchedDocument, Fetcher, NetworkErrorKind};
pub use metadata::{fetch_metadata, FeedPreview, MetadataError};
pub use parser::{parse, FeedFormat, FeedMetadata, ParseError, ParsedFeed, ParsedItem};
