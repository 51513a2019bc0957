//! Byte-to-text decoding for feed documents.
//!
//! Precedence: byte-order mark, then the `encoding` pseudo-attribute of the
//! XML declaration, then the feed's configured encoding, then UTF-8.

use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;

/// How far into the document the XML declaration is searched for.
const DECLARATION_SCAN_LIMIT: usize = 1024;

/// A document decoded to UTF-8 text.
pub(crate) struct DecodedDocument<'a> {
    pub text: Cow<'a, str>,
    /// WHATWG name of the encoding that was applied.
    pub encoding: &'static str,
}

pub(crate) fn decode<'a>(bytes: &'a [u8], configured: Option<&str>) -> DecodedDocument<'a> {
    let encoding = select_encoding(bytes, configured);
    let (text, actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(
            encoding = actual.name(),
            "Feed contained byte sequences invalid for its encoding, replaced"
        );
    }
    DecodedDocument {
        text,
        encoding: actual.name(),
    }
}

fn select_encoding(bytes: &[u8], configured: Option<&str>) -> &'static Encoding {
    if let Some((bom_encoding, _)) = Encoding::for_bom(bytes) {
        return bom_encoding;
    }

    if let Some(label) = declared_encoding(bytes) {
        match Encoding::for_label(label.as_bytes()) {
            Some(enc) => return enc,
            None => {
                tracing::warn!(label = %label, "Unknown encoding in XML declaration, ignoring");
            }
        }
    }

    if let Some(label) = configured.map(str::trim).filter(|l| !l.is_empty()) {
        match Encoding::for_label(label.as_bytes()) {
            Some(enc) => return enc,
            None => {
                tracing::warn!(label = %label, "Unknown configured feed encoding, using UTF-8");
            }
        }
    }

    UTF_8
}

/// Extract `encoding="..."` from a leading `<?xml ...?>` declaration.
///
/// The declaration is ASCII-compatible in every encoding we can decode
/// without a BOM, so a byte-level scan is enough.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(DECLARATION_SCAN_LIMIT)];
    let head = String::from_utf8_lossy(head);
    let decl_start = head.find("<?xml")?;
    let decl_end = head[decl_start..].find("?>")? + decl_start;
    let decl = &head[decl_start..decl_end];

    let attr_pos = decl.find("encoding")?;
    let after = decl[attr_pos + "encoding".len()..].trim_start();
    let after = after.strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &after[1..];
    let end = value.find(quote)?;
    Some(value[..end].trim().to_owned())
}
