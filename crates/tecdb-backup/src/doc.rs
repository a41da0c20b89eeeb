//! Neutral document model for backup and filter files.
//!
//! The codec walks [`Node`] trees and never sees the underlying XML
//! machinery. Text and comment nodes are preserved as children; the
//! walkers decide what to skip.

use quick_xml::Reader;
use quick_xml::events::Event;
use tecdb_error::{CfgError, Result};

/// An element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Content>,
}

/// One child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Element(Node),
    Text(String),
    Comment(String),
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Look up an attribute value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the element has meaningful children: any sub-element or any
    /// non-whitespace text.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.children.iter().any(|c| match c {
            Content::Element(_) => true,
            Content::Text(t) => !t.trim().is_empty(),
            Content::Comment(_) => false,
        })
    }

    /// Concatenated text content of the element.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for c in &self.children {
            if let Content::Text(t) = c {
                out.push_str(t);
            }
        }
        out
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn read_attrs(e: &quick_xml::events::BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| CfgError::malformed(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| CfgError::malformed(err.to_string()))?;
        attrs.push((decode(attr.key.as_ref()), value.into_owned()));
    }
    Ok(attrs)
}

/// Parse a document and return its root element.
///
/// Malformed XML (bad nesting, unterminated markup, multiple or missing
/// roots) is an `EILSEQ` error.
pub fn parse_document(text: &str) -> Result<Node> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| CfgError::malformed(err.to_string()))?;
        match event {
            Event::Start(e) => {
                let mut node = Node::new(decode(e.name().as_ref()));
                node.attrs = read_attrs(&e)?;
                stack.push(node);
            }
            Event::Empty(e) => {
                let mut node = Node::new(decode(e.name().as_ref()));
                node.attrs = read_attrs(&e)?;
                attach(&mut stack, &mut root, Content::Element(node))?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| CfgError::malformed("unbalanced end tag"))?;
                attach(&mut stack, &mut root, Content::Element(node))?;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|err| CfgError::malformed(err.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.children.push(Content::Text(text.into_owned()));
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.children.push(Content::Text(decode(&t.into_inner())));
                }
            }
            Event::Comment(c) => {
                if let Some(top) = stack.last_mut() {
                    top.children.push(Content::Comment(decode(&c.into_inner())));
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return Err(CfgError::malformed("unterminated element"));
    }
    root.ok_or_else(|| CfgError::malformed("document has no root element"))
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, content: Content) -> Result<()> {
    if let Some(top) = stack.last_mut() {
        top.children.push(content);
        return Ok(());
    }
    let Content::Element(node) = content else {
        return Ok(());
    };
    if root.is_some() {
        return Err(CfgError::malformed("multiple root elements"));
    }
    *root = Some(node);
    Ok(())
}

/// Escape a string for use in attribute values and text content.
#[must_use]
pub fn xml_escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}
