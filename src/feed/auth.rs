//! HTTP Digest authentication (RFC 7616 and the RFC 2617 MD5 form).
//!
//! SHA-256 is preferred when a server offers several challenges. Challenges
//! we cannot satisfy (`auth-int` only, unknown algorithms) are reported by
//! the fetcher as `AuthRequired`.

use md5::Md5;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Client nonce counter mixed into every generated cnonce.
static CNONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "md5" => Some(Algorithm::Md5),
            "md5-sess" => Some(Algorithm::Md5Sess),
            "sha-256" => Some(Algorithm::Sha256),
            "sha-256-sess" => Some(Algorithm::Sha256Sess),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_sess(self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn strength(self) -> u8 {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => 0,
            Algorithm::Sha256 | Algorithm::Sha256Sess => 1,
        }
    }

    /// Lowercase hex digest of `input`.
    fn hash(self, input: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => format!("{:x}", Md5::digest(input.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                format!("{:x}", Sha256::digest(input.as_bytes()))
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge we can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Algorithm,
    /// `true` when the server offers `qop=auth`.
    qop_auth: bool,
}

impl DigestChallenge {
    /// Strongest answerable Digest challenge among the response headers,
    /// the first one on a tie.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(Self::parse)
            .min_by_key(|challenge| Reverse(challenge.algorithm.strength()))
    }

    /// Parse one header value. Returns `None` for other schemes, missing
    /// nonce/realm, or an unsupported algorithm.
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let scheme_end = header.find(char::is_whitespace)?;
        if !header[..scheme_end].eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        // RFC 7616: absent algorithm means MD5
        let mut algorithm = Algorithm::Md5;
        let mut qop_auth = false;
        let mut saw_qop = false;

        for (key, value) in params(&header[scheme_end..]) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => match Algorithm::parse(&value) {
                    Some(parsed) => algorithm = parsed,
                    None => {
                        tracing::debug!(algorithm = %value, "Unsupported digest algorithm");
                        return None;
                    }
                },
                "qop" => {
                    saw_qop = true;
                    qop_auth = value
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"));
                }
                _ => {}
            }
        }

        // Only auth-int offered: we cannot hash the entity body
        if saw_qop && !qop_auth {
            return None;
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
        })
    }

    /// Build the `Authorization` header value for a GET of `uri`.
    pub(crate) fn authorize(&self, username: &str, password: &str, uri: &str) -> String {
        self.authorize_with_cnonce(username, password, "GET", uri, &new_cnonce(), 1)
    }

    fn authorize_with_cnonce(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nc: u32,
    ) -> String {
        let nc = format!("{:08x}", nc);
        let hash = |input: String| self.algorithm.hash(&input);

        let mut ha1 = hash(format!("{}:{}:{}", username, self.realm, password));
        if self.algorithm.is_sess() {
            ha1 = hash(format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = hash(format!("{}:{}", method, uri));

        let response = if self.qop_auth {
            hash(format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, self.nonce, nc, cnonce, ha2
            ))
        } else {
            hash(format!("{}:{}:{}", ha1, self.nonce, ha2))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", uri=\"{}\", algorithm={}, nonce=\"{}\"",
            quote(username),
            quote(&self.realm),
            quote(uri),
            self.algorithm.as_str(),
            quote(&self.nonce),
        );
        if self.qop_auth {
            header.push_str(&format!(", nc={}, cnonce=\"{}\", qop=auth", nc, cnonce));
        }
        header.push_str(&format!(", response=\"{}\"", response));
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        header
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn new_cnonce() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let count = CNONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let digest = Algorithm::Sha256.hash(&format!("{}:{}:{}", nanos, count, std::process::id()));
    digest[..32].to_string()
}

/// Split `key=value, key="quoted, value"` auth parameters.
fn params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.trim().is_empty() {
            break;
        }
        if chars.next() != Some('=') {
            continue;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key.trim().to_string(), value.trim().to_string()));
    }

    out
}
