//! Feed document parsing.
//!
//! A raw document is decoded ([`encoding`]), turned into an element tree
//! ([`xml`]), classified into one [`FeedFormat`] by its root element and then
//! normalized by that format's [`FormatParser`]. Every format yields the same
//! [`ParsedFeed`] shape, so nothing downstream branches on the format.
//!
//! Malformed or unrecognized documents are errors, never an empty item list:
//! callers must be able to tell "the feed has no items" apart from "the feed
//! could not be read".

mod atom;
mod date;
mod encoding;
mod rdf;
mod rss;
mod xml;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::util::{clean_label, strip_control_chars};
use xml::{Element, Ns};

/// Errors produced while turning a document into a [`ParsedFeed`].
///
/// All variants mean "unparsable content" to the sync engine; they are kept
/// apart for logging.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),
    /// Well-formed XML, but not RSS, ATOM or RDF.
    #[error("unrecognized document: root element <{0}>")]
    UnrecognizedFormat(String),
    /// A structurally required element is missing (e.g. RSS `<channel>`).
    #[error("missing <{0}> element")]
    MissingElement(&'static str),
    /// SEC-003: nesting depth exceeds the safety limit.
    #[error("document nesting exceeds {0} levels")]
    MaxDepthExceeded(usize),
    /// No root element at all.
    #[error("document is empty")]
    Empty,
}

/// The closed set of supported feed formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// RSS 0.91, 0.92, 0.93 and 0.94.
    Rss0x,
    /// RSS 2.0 and 2.0.1.
    Rss2,
    /// ATOM 1.0 (ATOM 0.3 documents are read leniently).
    Atom,
    /// RDF Site Summary (RSS 0.90 and 1.0).
    Rdf,
}

impl FeedFormat {
    pub const ALL: [FeedFormat; 4] = [
        FeedFormat::Rss0x,
        FeedFormat::Rss2,
        FeedFormat::Atom,
        FeedFormat::Rdf,
    ];

    /// Stable identifier used in the database and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedFormat::Rss0x => "rss0x",
            FeedFormat::Rss2 => "rss2",
            FeedFormat::Atom => "atom",
            FeedFormat::Rdf => "rdf",
        }
    }

    fn parser(self) -> &'static dyn FormatParser {
        match self {
            FeedFormat::Rss0x => &rss::Rss0xParser,
            FeedFormat::Rss2 => &rss::Rss2Parser,
            FeedFormat::Atom => &atom::AtomParser,
            FeedFormat::Rdf => &rdf::RdfParser,
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeedFormat::Rss0x => "RSS 0.91/0.92/0.93",
            FeedFormat::Rss2 => "RSS 2.0/2.0.1",
            FeedFormat::Atom => "ATOM 1.0",
            FeedFormat::Rdf => "RDF (RSS 1.0)",
        };
        f.write_str(label)
    }
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown feed format '{}'", s))
    }
}

/// Feed-level metadata shared by every format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Homepage of the site publishing the feed.
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
}

/// One normalized candidate message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub body: Option<String>,
}

impl ParsedItem {
    /// Build an item from raw extracted fields, sanitizing text on the way in.
    pub(crate) fn new(
        title: Option<String>,
        link: Option<String>,
        author: Option<String>,
        published: Option<DateTime<Utc>>,
        body: Option<String>,
    ) -> Self {
        let title = title
            .map(|t| clean_label(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let link = link
            .map(|l| l.trim().to_owned())
            .filter(|l| !l.is_empty());
        let author = author.map(|a| clean_label(&a)).filter(|a| !a.is_empty());
        let body = body
            .map(|b| strip_control_chars(b.trim()).into_owned())
            .filter(|b| !b.is_empty());

        Self {
            title,
            link,
            author,
            published,
            body,
        }
    }
}

/// A fully parsed document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Format detected from the document itself.
    pub format: FeedFormat,
    /// Name of the character encoding that was applied.
    pub encoding: &'static str,
    pub metadata: FeedMetadata,
    /// Items in document order.
    pub items: Vec<ParsedItem>,
}

/// Normalization capability implemented once per [`FeedFormat`].
trait FormatParser: Sync {
    fn metadata(&self, root: &Element) -> Result<FeedMetadata, ParseError>;
    fn items(&self, root: &Element) -> Result<Vec<ParsedItem>, ParseError>;
}

/// Parse a raw feed document.
///
/// # Arguments
///
/// * `bytes` - The document as received from the network
/// * `declared_format` - The format recorded for the feed, if any. The
///   document's own root element always wins; a mismatch is only logged.
/// * `declared_encoding` - The feed's configured encoding, used when the
///   document declares none. Defaults to UTF-8.
///
/// # Errors
///
/// Returns [`ParseError`] when the document is not well-formed XML or is not
/// one of the supported formats. A valid document without items is `Ok`.
pub fn parse(
    bytes: &[u8],
    declared_format: Option<FeedFormat>,
    declared_encoding: Option<&str>,
) -> Result<ParsedFeed, ParseError> {
    let decoded = encoding::decode(bytes, declared_encoding);
    let root = xml::parse_document(&decoded.text)?;
    let format = detect_format(&root)?;

    if let Some(declared) = declared_format {
        if declared != format {
            tracing::debug!(
                declared = declared.as_str(),
                detected = format.as_str(),
                "Feed format differs from configuration, using detected format"
            );
        }
    }

    let parser = format.parser();
    Ok(ParsedFeed {
        format,
        encoding: decoded.encoding,
        metadata: parser.metadata(&root)?,
        items: parser.items(&root)?,
    })
}

fn detect_format(root: &Element) -> Result<FeedFormat, ParseError> {
    if root.is(Ns::None, "rss") {
        let version = root.attr("version").map(str::trim).unwrap_or("2.0");
        return Ok(if version.starts_with("0.") {
            FeedFormat::Rss0x
        } else {
            FeedFormat::Rss2
        });
    }
    if root.is(Ns::Atom, "feed") {
        return Ok(FeedFormat::Atom);
    }
    if root.is(Ns::Rdf, "RDF") {
        return Ok(FeedFormat::Rdf);
    }
    Err(ParseError::UnrecognizedFormat(root.name.clone()))
}
