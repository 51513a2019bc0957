//! ATOM 1.0 normalization.

use super::date::parse_w3c_date;
use super::xml::{Element, Ns};
use super::{FeedMetadata, FormatParser, ParseError, ParsedItem};

pub(super) struct AtomParser;

/// The `href` of the first `alternate` link, falling back to the first link
/// without a `rel` attribute (which means `alternate` per RFC 4287).
fn alternate_link(element: &Element) -> Option<String> {
    let links: Vec<&Element> = element.children_named(Ns::Atom, "link").collect();
    links
        .iter()
        .find(|l| l.attr("rel").map(str::trim) == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.attr("rel").is_none()))
        .and_then(|l| l.attr("href"))
        .map(|href| href.trim().to_owned())
        .filter(|href| !href.is_empty())
}

fn author_name(element: &Element) -> Option<String> {
    element
        .child(Ns::Atom, "author")
        .and_then(|author| author.child_text(Ns::Atom, "name"))
}

/// The wrapping `div` of inline XHTML is not part of the content (RFC 4287
/// section 3.1.1.3).
fn xhtml_container(element: &Element) -> &Element {
    match element.children.as_slice() {
        [div] if div.name == "div" && element.text.trim().is_empty() => div,
        _ => element,
    }
}

/// Plain text of an ATOM text construct. Inline XHTML is flattened.
fn text_construct(element: &Element) -> Option<String> {
    match element.attr("type").map(str::trim) {
        Some("xhtml") => Some(xhtml_container(element).deep_text()).filter(|t| !t.is_empty()),
        _ => element.trimmed_text(),
    }
}

/// Message body from `content` or `summary`. Inline XHTML keeps its markup.
fn body_construct(element: &Element) -> Option<String> {
    match element.attr("type").map(str::trim) {
        Some("xhtml") => Some(xhtml_container(element).inner_markup()).filter(|t| !t.is_empty()),
        _ => element.trimmed_text(),
    }
}

impl FormatParser for AtomParser {
    fn metadata(&self, root: &Element) -> Result<FeedMetadata, ParseError> {
        Ok(FeedMetadata {
            title: root.child(Ns::Atom, "title").and_then(text_construct),
            description: root
                .child(Ns::Atom, "subtitle")
                .or_else(|| root.child(Ns::Atom, "tagline"))
                .and_then(text_construct),
            site_url: alternate_link(root),
            icon_url: root
                .child_text(Ns::Atom, "icon")
                .or_else(|| root.child_text(Ns::Atom, "logo")),
        })
    }

    fn items(&self, root: &Element) -> Result<Vec<ParsedItem>, ParseError> {
        let feed_author = author_name(root);

        Ok(root
            .children_named(Ns::Atom, "entry")
            .map(|entry| {
                let published = entry
                    .child_text(Ns::Atom, "published")
                    .or_else(|| entry.child_text(Ns::Atom, "issued"))
                    .or_else(|| entry.child_text(Ns::Atom, "updated"))
                    .or_else(|| entry.child_text(Ns::Atom, "modified"))
                    .as_deref()
                    .and_then(parse_w3c_date);
                let body = entry
                    .child(Ns::Atom, "content")
                    .and_then(body_construct)
                    .or_else(|| entry.child(Ns::Atom, "summary").and_then(body_construct));

                ParsedItem::new(
                    entry.child(Ns::Atom, "title").and_then(text_construct),
                    alternate_link(entry),
                    author_name(entry).or_else(|| feed_author.clone()),
                    published,
                    body,
                )
            })
            .collect())
    }
}
