//! RSS 0.9x and RSS 2.0 normalization.
//!
//! Both versions share the `<rss><channel><item>` skeleton. They differ in
//! which item elements exist: 0.9x items carry only title, link and
//! description (plus a lenient `pubDate`/`author`), while 2.0 items add
//! `guid`, `author`, `pubDate` and commonly the `dc:` and `content:` modules.

use super::date::parse_rss_date;
use super::xml::{Element, Ns};
use super::{FeedMetadata, FormatParser, ParseError, ParsedItem};

pub(super) struct Rss0xParser;
pub(super) struct Rss2Parser;

fn channel(root: &Element) -> Result<&Element, ParseError> {
    root.child(Ns::None, "channel")
        .ok_or(ParseError::MissingElement("channel"))
}

fn channel_metadata(root: &Element) -> Result<FeedMetadata, ParseError> {
    let channel = channel(root)?;
    let icon_url = channel
        .child(Ns::None, "image")
        .and_then(|image| image.child_text(Ns::None, "url"));

    Ok(FeedMetadata {
        title: channel.child_text(Ns::None, "title"),
        description: channel.child_text(Ns::None, "description"),
        site_url: channel.child_text(Ns::None, "link"),
        icon_url,
    })
}

/// Items live inside `<channel>`, but some 0.9x generators put them next to
/// it. Accept both placements.
fn item_elements(root: &Element) -> Result<Vec<&Element>, ParseError> {
    let channel = channel(root)?;
    Ok(channel
        .children_named(Ns::None, "item")
        .chain(root.children_named(Ns::None, "item"))
        .collect())
}

impl FormatParser for Rss0xParser {
    fn metadata(&self, root: &Element) -> Result<FeedMetadata, ParseError> {
        channel_metadata(root)
    }

    fn items(&self, root: &Element) -> Result<Vec<ParsedItem>, ParseError> {
        Ok(item_elements(root)?
            .into_iter()
            .map(|item| {
                ParsedItem::new(
                    item.child_text(Ns::None, "title"),
                    item.child_text(Ns::None, "link"),
                    item.child_text(Ns::None, "author"),
                    item.child_text(Ns::None, "pubDate")
                        .as_deref()
                        .and_then(parse_rss_date),
                    item.child_text(Ns::None, "description"),
                )
            })
            .collect())
    }
}

impl FormatParser for Rss2Parser {
    fn metadata(&self, root: &Element) -> Result<FeedMetadata, ParseError> {
        channel_metadata(root)
    }

    fn items(&self, root: &Element) -> Result<Vec<ParsedItem>, ParseError> {
        Ok(item_elements(root)?
            .into_iter()
            .map(|item| {
                let link = item
                    .child_text(Ns::None, "link")
                    .or_else(|| permalink_guid(item));
                let author = item
                    .child_text(Ns::None, "author")
                    .or_else(|| item.child_text(Ns::Dc, "creator"));
                let published = item
                    .child_text(Ns::None, "pubDate")
                    .or_else(|| item.child_text(Ns::Dc, "date"))
                    .as_deref()
                    .and_then(parse_rss_date);
                let body = item
                    .child_text(Ns::Content, "encoded")
                    .or_else(|| item.child_text(Ns::None, "description"));

                ParsedItem::new(
                    item.child_text(Ns::None, "title"),
                    link,
                    author,
                    published,
                    body,
                )
            })
            .collect())
    }
}

/// A `<guid>` is a usable link unless it says `isPermaLink="false"`.
fn permalink_guid(item: &Element) -> Option<String> {
    let guid = item.child(Ns::None, "guid")?;
    let is_permalink = guid
        .attr("isPermaLink")
        .map_or(true, |v| !v.trim().eq_ignore_ascii_case("false"));
    if is_permalink {
        guid.trimmed_text()
    } else {
        None
    }
}
