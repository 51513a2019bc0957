use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::fetcher::{FetchError, Fetcher};
use super::parser::{self, FeedFormat, ParseError};
use crate::storage::FeedAuth;
use crate::util::{clean_label, normalize_feed_url};

/// What a feed says about itself, gathered before it is added.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FeedPreview {
    /// Normalized URL that was fetched (`feed:` scheme rewritten).
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub format: FeedFormat,
    /// Character encoding the document was decoded with.
    pub encoding: &'static str,
    /// Items currently in the document. Nothing is stored.
    pub item_count: usize,
}

/// Errors that can occur while previewing a feed.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("not a feed: {0}")]
    Parse(#[from] ParseError),
}

/// Fetch and parse a feed without storing anything.
///
/// Accepts `feed:` URLs. The title falls back to the URL's host when the
/// document has none.
///
/// # Errors
///
/// [`MetadataError::Fetch`] for retrieval failures, [`MetadataError::Parse`]
/// when the document is not RSS, ATOM or RDF.
pub async fn fetch_metadata(
    fetcher: &Fetcher,
    url: &str,
    auth: Option<&FeedAuth>,
) -> Result<FeedPreview, MetadataError> {
    let url = normalize_feed_url(url);
    let document = fetcher
        .fetch_url(&url, auth, &CancellationToken::new())
        .await?;
    let parsed = parser::parse(&document.bytes, None, None)?;

    let title = parsed
        .metadata
        .title
        .as_deref()
        .map(clean_label)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            url::Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
        })
        .unwrap_or_else(|| url.clone());

    tracing::debug!(
        url = %url,
        format = parsed.format.as_str(),
        items = parsed.items.len(),
        "Fetched feed metadata"
    );

    Ok(FeedPreview {
        url,
        title,
        description: parsed.metadata.description,
        site_url: parsed.metadata.site_url,
        icon_url: parsed.metadata.icon_url,
        format: parsed.format,
        encoding: parsed.encoding,
        item_count: parsed.items.len(),
    })
}
