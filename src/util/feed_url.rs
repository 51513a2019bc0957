use thiserror::Error;
use url::Url;

/// Errors that can occur during feed URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Only `http` and `https` URLs with a host are accepted. Unlike a server-side
/// fetcher, a desktop reader legitimately subscribes to intranet and localhost
/// feeds, so private address ranges are not rejected here.
///
/// # Examples
///
/// ```
/// use feedsync::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Rewrites the `feed:` pseudo-scheme into a plain http(s) URL.
///
/// Browsers hand subscriptions over as either `feed:https://host/path`
/// (wrapping form) or `feed://host/path` (replacing form, implies http).
/// Anything else is returned trimmed but otherwise unchanged.
pub fn normalize_feed_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("feed:"))
        .map(|_| &trimmed[5..])
    else {
        return trimmed.to_owned();
    };

    if rest.starts_with("http:") || rest.starts_with("https:") {
        rest.to_owned()
    } else if let Some(without_slashes) = rest.strip_prefix("//") {
        format!("http://{}", without_slashes)
    } else {
        trimmed.to_owned()
    }
}

/// Canonical form of an item link, used as a message identity.
///
/// Returns `None` for links that are not absolute URLs. Scheme and host are
/// lower-cased by the `url` parser; the fragment is dropped because it never
/// identifies a different document.
pub fn canonical_link(link: &str) -> Option<String> {
    let mut url = Url::parse(link.trim()).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
