//! Owned element tree for rendered XHTML documents.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::error::BinderError;

/// Name given to the synthetic root returned by [`parse_xhtml`].
pub const DOCUMENT_ROOT: &str = "#document";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_class(self, class: impl Into<String>) -> Self {
        self.with_attr("class", class)
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Direct child elements, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Outermost descendants carrying `class`. Matches are not searched further.
    pub fn marked(&self, class: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_marked(self, class, &mut out);
        out
    }

    pub fn contains_marked(&self, class: &str) -> bool {
        self.elements()
            .any(|e| e.has_class(class) || e.contains_marked(class))
    }

    /// All descendant text concatenated in document order, like DOM
    /// `textContent`. Whitespace is kept as written.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        collect_text(self, &mut parts);
        parts.concat()
    }
}

fn collect_marked<'a>(el: &'a Element, class: &str, out: &mut Vec<&'a Element>) {
    for child in el.elements() {
        if child.has_class(class) {
            out.push(child);
        } else {
            collect_marked(child, class, out);
        }
    }
}

fn collect_text<'a>(el: &'a Element, out: &mut Vec<&'a str>) {
    for child in &el.children {
        match child {
            Node::Text(t) => out.push(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

/// HTML named entities that XHTML renderers commonly leave in place.
/// The five XML entities are resolved by quick-xml itself.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "times" => "\u{d7}",
        "euro" => "\u{20ac}",
        _ => return None,
    })
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let mut el = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value_with(html_entity) {
            Ok(v) => v.into_owned(),
            Err(e) => {
                debug!(attribute = %key, error = %e, "keeping raw attribute value");
                String::from_utf8_lossy(&attr.value).into_owned()
            }
        };
        el.attributes.insert(key, value);
    }
    el
}

fn append(stack: &mut [Element], node: Node) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    }
}

/// Parse a rendered XHTML document into a tree under a synthetic
/// [`DOCUMENT_ROOT`] element.
pub fn parse_xhtml(xml: &str) -> Result<Element, BinderError> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Element::new(DOCUMENT_ROOT)];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(element_from(&e)),
            Event::Empty(e) => {
                let el = element_from(&e);
                append(&mut stack, Node::Element(el));
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(BinderError::Unbalanced);
                }
                if let Some(el) = stack.pop() {
                    append(&mut stack, Node::Element(el));
                }
            }
            Event::Text(t) => {
                let text = match t.unescape_with(html_entity) {
                    Ok(s) => s.into_owned(),
                    Err(e) => {
                        debug!(error = %e, "keeping raw text");
                        String::from_utf8_lossy(&t).into_owned()
                    }
                };
                append(&mut stack, Node::Text(text));
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                append(&mut stack, Node::Text(text));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(BinderError::Unbalanced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<html>
  <body>
    <table class="requirement table" data-id="REQ-1">
      <tr><td class="verifiable">The system <b>shall</b> log</td></tr>
      <tr><td>ignored</td><td class="verifiable">every access</td></tr>
    </table>
    <br/>
  </body>
</html>"#;

    #[test]
    fn parses_nested_elements() {
        let root = parse_xhtml(DOC).unwrap();
        assert_eq!(root.name, DOCUMENT_ROOT);
        let html = root.elements().next().unwrap();
        assert_eq!(html.name, "html");
        let body = html.elements().next().unwrap();
        let names: Vec<&str> = body.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["table", "br"]);
    }

    #[test]
    fn classes_and_attributes() {
        let root = parse_xhtml(DOC).unwrap();
        let table = &root.marked("requirement")[0];
        assert!(table.has_class("table"));
        assert_eq!(table.attr("data-id"), Some("REQ-1"));
        assert_eq!(table.attr("missing"), None);
    }

    #[test]
    fn marked_and_text() {
        let root = parse_xhtml(DOC).unwrap();
        let cells = root.marked("verifiable");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].text(), "The system shall log");
        assert_eq!(cells[1].text(), "every access");
        assert!(root.contains_marked("verifiable"));
        assert!(!root.contains_marked("verify-button"));
    }

    #[test]
    fn unescapes_entities() {
        let root = parse_xhtml(r#"<p title="a &amp; b">x &lt; y</p>"#).unwrap();
        let p = root.elements().next().unwrap();
        assert_eq!(p.attr("title"), Some("a & b"));
        assert_eq!(p.text(), "x < y");
    }

    #[test]
    fn inline_markup_does_not_split_words() {
        let root =
            parse_xhtml(r#"<td>REQ-<b>001</b> shall be <em>un</em>ambiguous</td>"#).unwrap();
        let td = root.elements().next().unwrap();
        assert_eq!(td.text(), "REQ-001 shall be unambiguous");
    }

    #[test]
    fn resolves_html_entities() {
        let root = parse_xhtml(
            r#"<p title="a&nbsp;b">Step&nbsp;1 &mdash; done&hellip; &amp; more</p>"#,
        )
        .unwrap();
        let p = root.elements().next().unwrap();
        assert_eq!(p.attr("title"), Some("a\u{a0}b"));
        assert_eq!(p.text(), "Step\u{a0}1 \u{2014} done\u{2026} & more");
    }

    #[test]
    fn unknown_entity_kept_raw() {
        let root = parse_xhtml("<p>x &bogus; y</p>").unwrap();
        let p = root.elements().next().unwrap();
        assert_eq!(p.text(), "x &bogus; y");
    }

    #[test]
    fn mismatched_tags_rejected() {
        assert!(parse_xhtml("<table><tr></table>").is_err());
    }

    #[test]
    fn unclosed_tags_rejected() {
        assert!(parse_xhtml("<table><tr>").is_err());
    }

    #[test]
    fn builder_matches_parsed() {
        let built = Element::new("td").with_class("verifiable").with_text("hi");
        let root = parse_xhtml(r#"<td class="verifiable">hi</td>"#).unwrap();
        assert_eq!(root.elements().next().unwrap(), &built);
    }
}
