//! RDF Site Summary (RSS 0.90 and RSS 1.0) normalization.
//!
//! Unlike RSS 2.0, items are siblings of `<channel>` under `<rdf:RDF>`.

use super::date::parse_w3c_date;
use super::xml::{Element, Ns};
use super::{FeedMetadata, FormatParser, ParseError, ParsedItem};

pub(super) struct RdfParser;

impl FormatParser for RdfParser {
    fn metadata(&self, root: &Element) -> Result<FeedMetadata, ParseError> {
        // Lenient: an RDF document without a channel still yields its items.
        let Some(channel) = root.child(Ns::Rss1, "channel") else {
            return Ok(FeedMetadata::default());
        };

        let icon_url = root
            .child(Ns::Rss1, "image")
            .and_then(|image| image.child_text(Ns::Rss1, "url"))
            .or_else(|| {
                channel
                    .child(Ns::Rss1, "image")
                    .and_then(|image| image.ns_attr(Ns::Rdf, "resource"))
                    .map(|url| url.trim().to_owned())
                    .filter(|url| !url.is_empty())
            });

        Ok(FeedMetadata {
            title: channel.child_text(Ns::Rss1, "title"),
            description: channel
                .child_text(Ns::Rss1, "description")
                .or_else(|| channel.child_text(Ns::Dc, "description")),
            site_url: channel.child_text(Ns::Rss1, "link"),
            icon_url,
        })
    }

    fn items(&self, root: &Element) -> Result<Vec<ParsedItem>, ParseError> {
        Ok(root
            .children_named(Ns::Rss1, "item")
            .map(|item| {
                let body = item
                    .child_text(Ns::Content, "encoded")
                    .or_else(|| item.child_text(Ns::Rss1, "description"))
                    .or_else(|| item.child_text(Ns::Dc, "description"));

                ParsedItem::new(
                    item.child_text(Ns::Rss1, "title")
                        .or_else(|| item.child_text(Ns::Dc, "title")),
                    item.child_text(Ns::Rss1, "link")
                        .or_else(|| item.ns_attr(Ns::Rdf, "about").map(str::to_owned)),
                    item.child_text(Ns::Dc, "creator"),
                    item.child_text(Ns::Dc, "date")
                        .as_deref()
                        .and_then(parse_w3c_date),
                    body,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::feed::parser::{parse, FeedFormat};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const RSS_10: &str = r#"<?xml version="1.0"?>
<rdf:RDF
  xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
  xmlns:dc="http://purl.org/dc/elements/1.1/"
  xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="http://www.xml.com/xml/news.rss">
    <title>XML.com</title>
    <link>http://xml.com/pub</link>
    <description>XML.com features a rich mix of information.</description>
    <image rdf:resource="http://xml.com/universal/images/xml_tiny.gif" />
    <items>
      <rdf:Seq>
        <rdf:li resource="http://xml.com/pub/2000/08/09/xslt/xslt.html" />
      </rdf:Seq>
    </items>
  </channel>
  <item rdf:about="http://xml.com/pub/2000/08/09/xslt/xslt.html">
    <title>Processing Inclusions with XSLT</title>
    <link>http://xml.com/pub/2000/08/09/xslt/xslt.html</link>
    <description>Processing document inclusions with general XML tools.</description>
    <dc:creator>Bob DuCharme</dc:creator>
    <dc:date>2000-08-09T12:00:00+02:00</dc:date>
  </item>
  <item rdf:about="http://xml.com/pub/2000/08/09/rdfdb/index.html">
    <title>Putting RDF to Work</title>
  </item>
</rdf:RDF>"#;

    const RSS_090: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://my.netscape.com/rdf/simple/0.9/">
  <channel>
    <title>Mozilla Dot Org</title>
    <link>http://www.mozilla.org</link>
  </channel>
  <image>
    <title>Mozilla</title>
    <url>http://www.mozilla.org/images/moz.gif</url>
  </image>
  <item>
    <title>New Status Updates</title>
    <link>http://www.mozilla.org/status/</link>
  </item>
</rdf:RDF>"#;

    #[test]
    fn test_rss_10_document() {
        let parsed = parse(RSS_10.as_bytes(), Some(FeedFormat::Rdf), None).unwrap();
        assert_eq!(parsed.format, FeedFormat::Rdf);
        assert_eq!(parsed.metadata.title.as_deref(), Some("XML.com"));
        assert_eq!(
            parsed.metadata.icon_url.as_deref(),
            Some("http://xml.com/universal/images/xml_tiny.gif")
        );
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.title, "Processing Inclusions with XSLT");
        assert_eq!(first.author.as_deref(), Some("Bob DuCharme"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2000, 8, 9, 10, 0, 0).unwrap())
        );

        let second = &parsed.items[1];
        assert_eq!(
            second.link.as_deref(),
            Some("http://xml.com/pub/2000/08/09/rdfdb/index.html"),
            "rdf:about is the fallback link"
        );
        assert_eq!(second.body, None);
    }

    #[test]
    fn test_rss_090_document() {
        let parsed = parse(RSS_090.as_bytes(), None, None).unwrap();
        assert_eq!(parsed.format, FeedFormat::Rdf);
        assert_eq!(
            parsed.metadata.icon_url.as_deref(),
            Some("http://www.mozilla.org/images/moz.gif")
        );
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(
            parsed.items[0].link.as_deref(),
            Some("http://www.mozilla.org/status/")
        );
    }

    #[test]
    fn test_rdf_without_channel_keeps_items() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
            <item><title>Lonely</title></item></rdf:RDF>"#;
        let parsed = parse(doc.as_bytes(), None, None).unwrap();
        assert_eq!(parsed.metadata.title, None);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].title, "Lonely");
    }
}
