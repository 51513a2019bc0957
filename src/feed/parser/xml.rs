//! Minimal namespace-aware element tree built on `quick-xml`.
//!
//! Feed documents are small (the fetcher caps them at 10 MB), so the format
//! parsers work on a fully built tree instead of juggling streaming state for
//! four different vocabularies.

use quick_xml::escape::{escape, partial_escape, resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use super::ParseError;

/// SEC-003: Maximum element nesting depth. Prevents stack exhaustion from
/// maliciously deep documents when the tree is walked recursively.
pub(crate) const MAX_DEPTH: usize = 64;

/// XML namespaces the format parsers care about. Everything else collapses
/// into `Other` and never matches a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ns {
    None,
    Atom,
    Rdf,
    Rss1,
    Dc,
    Content,
    Other,
}

impl Ns {
    fn from_uri(uri: &[u8]) -> Self {
        match uri {
            b"http://www.w3.org/2005/Atom" | b"http://purl.org/atom/ns#" => Ns::Atom,
            b"http://www.w3.org/1999/02/22-rdf-syntax-ns#" => Ns::Rdf,
            b"http://purl.org/rss/1.0/" | b"http://my.netscape.com/rdf/simple/0.9/" => Ns::Rss1,
            b"http://purl.org/dc/elements/1.1/" => Ns::Dc,
            b"http://purl.org/rss/1.0/modules/content/" => Ns::Content,
            _ => Ns::Other,
        }
    }

    fn from_resolve(result: &ResolveResult<'_>) -> Self {
        match result {
            ResolveResult::Bound(ns) => Ns::from_uri(ns.as_ref()),
            ResolveResult::Unbound => Ns::None,
            ResolveResult::Unknown(_) => Ns::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Attribute {
    pub ns: Ns,
    pub name: String,
    pub value: String,
}

/// Content of an element in document order. `Child` indexes `children`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Child(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub ns: Ns,
    pub name: String,
    pub attributes: Vec<Attribute>,
    /// Concatenated direct text and CDATA content.
    pub text: String,
    pub children: Vec<Element>,
    nodes: Vec<Node>,
}

impl Element {
    pub fn is(&self, ns: Ns, name: &str) -> bool {
        self.ns == ns && self.name == name
    }

    pub fn child(&self, ns: Ns, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(ns, name))
    }

    pub fn children_named<'a>(
        &'a self,
        ns: Ns,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(ns, name))
    }

    /// Trimmed text of the first matching child, `None` when absent or blank.
    pub fn child_text(&self, ns: Ns, name: &str) -> Option<String> {
        self.child(ns, name).and_then(Element::trimmed_text)
    }

    pub fn trimmed_text(&self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }

    /// Value of an attribute without namespace (`version`, `href`, ...).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns == Ns::None && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn ns_attr(&self, ns: Ns, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns == ns && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Text of this element and its descendants in document order, with the
    /// markup dropped.
    pub fn deep_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim().to_owned()
    }

    /// Children and text re-serialized as markup, in document order.
    ///
    /// Elements are written with their local names; namespace prefixes and
    /// declarations are not reproduced.
    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        self.write_inner(&mut out);
        out.trim().to_owned()
    }

    fn push_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        match self.nodes.last_mut() {
            Some(Node::Text(last)) => last.push_str(fragment),
            _ => self.nodes.push(Node::Text(fragment.to_owned())),
        }
    }

    fn push_child(&mut self, child: Element) {
        self.nodes.push(Node::Child(self.children.len()));
        self.children.push(child);
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Child(index) => self.children[*index].collect_text(out),
            }
        }
    }

    fn write_inner(&self, out: &mut String) {
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
                Node::Child(index) => self.children[*index].write_markup(out),
            }
        }
    }

    fn write_markup(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for attribute in &self.attributes {
            out.push(' ');
            out.push_str(&attribute.name);
            out.push_str("=\"");
            out.push_str(&escape(attribute.value.as_str()));
            out.push('"');
        }
        if self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        self.write_inner(out);
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Resolve entity and character references, keeping any reference that is
/// not recognized verbatim instead of giving up on the whole text.
fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail[1..].find(|c: char| c == '&' || c == ';') {
            Some(offset) if tail.as_bytes()[offset + 1] == b';' => {
                let reference = &tail[..offset + 2];
                match unescape_with(reference, resolve_html5_entity) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => out.push_str(reference),
                }
                rest = &tail[offset + 2..];
            }
            // A bare ampersand
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a decoded document into its root element.
///
/// SEC-002: quick-xml (0.37) never expands `<!ENTITY>` declarations, so
/// external entity attacks are structurally impossible. HTML named entities
/// (`&nbsp;`, `&eacute;`, ...) are resolved alongside the XML ones, unknown
/// references are kept verbatim instead of failing the document.
///
/// Text is not trimmed while reading: whitespace between inline elements is
/// content. Lookups such as [`Element::child_text`] trim on the way out.
pub(crate) fn parse_document(text: &str) -> Result<Element, ParseError> {
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = match reader.read_resolved_event() {
            Ok(pair) => pair,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        };
        let ns = Ns::from_resolve(&resolved);

        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_DEPTH));
                }
                let element = open_element(&reader, ns, &start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, ns, &start)?;
                close_element(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                // quick-xml validates end-tag names, a pop always matches
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unbalanced end tag".to_owned()))?;
                close_element(&mut stack, &mut root, element);
            }
            Event::Text(content) => {
                if let Some(current) = stack.last_mut() {
                    match content.unescape_with(resolve_html5_entity) {
                        Ok(unescaped) => current.push_text(&unescaped),
                        Err(_) => {
                            let raw = String::from_utf8_lossy(&content);
                            current.push_text(&unescape_lenient(&raw));
                        }
                    }
                }
            }
            Event::CData(content) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&String::from_utf8_lossy(&content));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Xml(format!(
            "unexpected end of document inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    root.ok_or(ParseError::Empty)
}

fn open_element(
    reader: &NsReader<&[u8]>,
    ns: Ns,
    start: &BytesStart<'_>,
) -> Result<Element, ParseError> {
    let mut attributes = Vec::new();
    for attr_result in start.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed attribute");
                continue;
            }
        };
        // xmlns declarations were already consumed by the resolver
        if attr.key.as_ref() == b"xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let (attr_ns, local) = reader.resolve_attribute(attr.key);
        let name = String::from_utf8_lossy(local.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| ParseError::Xml(e.to_string()))?
            .into_owned();
        attributes.push(Attribute {
            ns: Ns::from_resolve(&attr_ns),
            name,
            value,
        });
    }

    Ok(Element {
        ns,
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        text: String::new(),
        children: Vec::new(),
        nodes: Vec::new(),
    })
}

fn close_element(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None if root.is_none() => *root = Some(element),
        None => tracing::debug!(name = %element.name, "Ignoring element after document root"),
    }
}
