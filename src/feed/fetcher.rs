use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{header, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::auth::DigestChallenge;
use crate::config::{Config, ConfigError, ProxyKind};
use crate::storage::{AuthScheme, Feed, FeedAuth};
use crate::util::validate_url;

pub(crate) const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// Closed classification of transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    HostNotFound,
    ConnectionRefused,
    TimedOut,
    SslHandshakeFailed,
    ProxyAuthRequired,
    ProxyConnectionRefused,
    ProxyNotFound,
    ProtocolError,
    /// Server-side condition expected to clear (5xx, 429, 408).
    TemporaryFailure,
    /// 404/410.
    ContentNotFound,
    Unknown,
}

impl NetworkErrorKind {
    /// Kind of a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            407 => NetworkErrorKind::ProxyAuthRequired,
            404 | 410 => NetworkErrorKind::ContentNotFound,
            408 | 429 | 500..=599 => NetworkErrorKind::TemporaryFailure,
            _ => NetworkErrorKind::ProtocolError,
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkErrorKind::HostNotFound => "host not found",
            NetworkErrorKind::ConnectionRefused => "connection refused",
            NetworkErrorKind::TimedOut => "connection timed out",
            NetworkErrorKind::SslHandshakeFailed => "TLS handshake failed",
            NetworkErrorKind::ProxyAuthRequired => "proxy authentication required",
            NetworkErrorKind::ProxyConnectionRefused => "proxy refused the connection",
            NetworkErrorKind::ProxyNotFound => "proxy host not found",
            NetworkErrorKind::ProtocolError => "protocol error",
            NetworkErrorKind::TemporaryFailure => "temporary server failure",
            NetworkErrorKind::ContentNotFound => "content not found",
            NetworkErrorKind::Unknown => "unknown network error",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport failure (DNS, connection, TLS, proxy, ...)
    #[error("Network error ({kind}): {detail}")]
    Network {
        kind: NetworkErrorKind,
        detail: String,
    },
    /// HTTP response with a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured connection timeout
    #[error("Request timed out")]
    Timeout,
    /// The server wants credentials we do not have or cannot present
    #[error("Authentication required")]
    AuthRequired,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The feed URL is not a fetchable http(s) URL
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    /// The job was cancelled while the request was in flight
    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    /// Network classification, for variants that have one.
    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            FetchError::Network { kind, .. } => Some(*kind),
            FetchError::HttpStatus(code) => Some(NetworkErrorKind::from_status(*code)),
            FetchError::IncompleteResponse { .. } => Some(NetworkErrorKind::ProtocolError),
            _ => None,
        }
    }
}

/// A successfully retrieved document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if the server sent one.
    pub content_type: Option<String>,
}

/// Create a custom redirect policy with loop detection and limited hops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// HTTP retrieval of feed documents with the configured timeout, proxy and
/// per-feed credentials. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    /// Connection failures are reported as proxy failures when set.
    explicit_proxy: bool,
}

impl Fetcher {
    /// Build a fetcher from the engine configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` when the proxy settings are incomplete or the
    /// HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let timeout = config.connection_timeout();

        // PERF-019: connection pooling and keepalive
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(timeout);

        let proxy_url = config.proxy.explicit_url()?;
        match (config.proxy.kind, &proxy_url) {
            (ProxyKind::System, _) => {
                // reqwest reads the *_PROXY environment variables by default
            }
            (_, Some(proxy_url)) => {
                let mut proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| ConfigError::Invalid(format!("proxy: {}", e)))?;
                if let Some(username) = &config.proxy.username {
                    proxy = proxy.basic_auth(
                        username,
                        config.proxy.password.as_deref().unwrap_or_default(),
                    );
                }
                builder = builder.proxy(proxy);
            }
            (_, None) => {
                builder = builder.no_proxy();
            }
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            explicit_proxy: proxy_url.is_some(),
        })
    }

    /// Fetch a feed's document.
    ///
    /// The whole exchange, including the body download and a possible
    /// Digest round trip, is bounded by the connection timeout. Cancelling
    /// `cancel` drops the in-flight request. Failed requests are not retried.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`] - `cancel` fired first
    /// - [`FetchError::Timeout`] - the timeout elapsed
    /// - [`FetchError::AuthRequired`] - 401 that our credentials cannot satisfy
    /// - [`FetchError::HttpStatus`] - any other non-2xx response
    /// - [`FetchError::Network`] - transport failure
    /// - [`FetchError::ResponseTooLarge`] - body over 10MB
    pub async fn fetch(
        &self,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError> {
        self.fetch_url(&feed.url, feed.auth.as_deref(), cancel).await
    }

    /// Fetch an arbitrary URL with optional credentials.
    pub async fn fetch_url(
        &self,
        url: &str,
        auth: Option<&FeedAuth>,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(url = %url, "Fetch cancelled");
                Err(FetchError::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, self.request(url, auth)) => {
                result.map_err(|_| FetchError::Timeout)?
            }
        }
    }

    async fn request(
        &self,
        url: &str,
        auth: Option<&FeedAuth>,
    ) -> Result<FetchedDocument, FetchError> {
        let url = validate_url(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut request = self.client.get(url.as_str());
        if let Some(auth) = auth.filter(|a| a.scheme == AuthScheme::Basic) {
            request = request.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }
        let mut response = request.send().await.map_err(|e| self.classify(e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            response = self.answer_challenge(&url, response, auth).await?;
        }

        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(FetchError::Network {
                kind: NetworkErrorKind::ProxyAuthRequired,
                detail: "proxy rejected the configured credentials".to_string(),
            });
        }
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Non-success response");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE)
            .await
            .map_err(|e| match e {
                ReadError::Fetch(e) => e,
                ReadError::Transport(e) => self.classify(e),
            })?;

        Ok(FetchedDocument {
            bytes,
            content_type,
        })
    }

    /// Handle a 401: retry once with a Digest response when the feed is
    /// configured for Digest and the challenge is answerable.
    async fn answer_challenge(
        &self,
        url: &url::Url,
        response: reqwest::Response,
        auth: Option<&FeedAuth>,
    ) -> Result<reqwest::Response, FetchError> {
        let Some(auth) = auth.filter(|a| a.scheme == AuthScheme::Digest) else {
            if let Some(auth) = auth {
                tracing::debug!(url = %url, scheme = %auth.scheme, "Server rejected credentials");
            }
            return Err(FetchError::AuthRequired);
        };

        let Some(challenge) = DigestChallenge::from_headers(response.headers()) else {
            tracing::debug!(url = %url, "No answerable digest challenge");
            return Err(FetchError::AuthRequired);
        };

        let uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let authorization =
            challenge.authorize(&auth.username, auth.password.expose_secret(), &uri);

        let retry = self
            .client
            .get(url.as_str())
            .header(header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(FetchError::AuthRequired);
        }
        Ok(retry)
    }

    /// Map a transport error onto [`NetworkErrorKind`] by inspecting the
    /// source chain.
    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout;
        }

        let detail = error_chain(&err);
        let lowered = detail.to_lowercase();

        let io_kind = {
            let mut source = err.source();
            let mut found = None;
            while let Some(e) = source {
                if let Some(io) = e.downcast_ref::<std::io::Error>() {
                    found = Some(io.kind());
                    break;
                }
                source = e.source();
            }
            found
        };

        let kind = if lowered.contains("dns error")
            || lowered.contains("failed to lookup address")
            || lowered.contains("no record found")
            || lowered.contains("name or service not known")
            || lowered.contains("nodename nor servname")
        {
            if self.explicit_proxy {
                NetworkErrorKind::ProxyNotFound
            } else {
                NetworkErrorKind::HostNotFound
            }
        } else if io_kind == Some(std::io::ErrorKind::ConnectionRefused)
            || lowered.contains("connection refused")
        {
            if self.explicit_proxy {
                NetworkErrorKind::ProxyConnectionRefused
            } else {
                NetworkErrorKind::ConnectionRefused
            }
        } else if io_kind == Some(std::io::ErrorKind::TimedOut) {
            NetworkErrorKind::TimedOut
        } else if lowered.contains("certificate")
            || lowered.contains("tls")
            || lowered.contains("handshake")
        {
            NetworkErrorKind::SslHandshakeFailed
        } else if lowered.contains("proxy") && lowered.contains("auth") {
            NetworkErrorKind::ProxyAuthRequired
        } else if err.is_redirect() || err.is_decode() || err.is_body() || err.is_request() {
            NetworkErrorKind::ProtocolError
        } else {
            NetworkErrorKind::Unknown
        };

        tracing::debug!(kind = %kind, error = %detail, "Classified network error");
        FetchError::Network { kind, detail }
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.timeout)
            .field("explicit_proxy", &self.explicit_proxy)
            .finish()
    }
}

/// `err: cause: cause` rendering of an error and its sources.
fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

/// A declared length past `limit`, including one that does not fit `usize`.
fn exceeds_limit(len: u64, limit: usize) -> bool {
    usize::try_from(len).map_or(true, |len| len > limit)
}

enum ReadError {
    Fetch(FetchError),
    Transport(reqwest::Error),
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ReadError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if exceeds_limit(len, limit) {
            return Err(ReadError::Fetch(FetchError::ResponseTooLarge));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ReadError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ReadError::Fetch(FetchError::ResponseTooLarge));
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: received fewer bytes than Content-Length
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ReadError::Fetch(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            }));
        }
    }

    Ok(bytes)
}
