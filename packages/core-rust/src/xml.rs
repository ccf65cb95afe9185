//! Namespace-resolved XML element tree.
//!
//! Messages are decoded into an owned [`Element`] tree whose names carry their
//! resolved namespace URI rather than the prefix used on the wire, and encoded
//! from the same tree. Prefixes are chosen at write time from a table of
//! preferred prefixes; namespaces outside the table are written as default
//! namespace declarations.

use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;

use crate::error::{EncodeError, ParseError};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub ns: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub ns: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    #[must_use]
    pub fn new(ns: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            ns: ns.map(str::to_string),
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attr(
        mut self,
        ns: Option<&str>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.push(Attribute {
            ns: ns.map(str::to_string),
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    #[must_use]
    pub fn is(&self, ns: Option<&str>, name: &str) -> bool {
        self.ns.as_deref() == ns && self.name == name
    }

    #[must_use]
    pub fn attr(&self, ns: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns.as_deref() == ns && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// First child element with the given namespace and local name.
    #[must_use]
    pub fn child(&self, ns: Option<&str>, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(ns, name))
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated direct text content.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// `{namespace}name` form used in error messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.ns {
            Some(ns) => format!("{{{ns}}}{}", self.name),
            None => self.name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Body traits
// ---------------------------------------------------------------------------

/// Renders a message body as the children of the SOAP `Body` element.
pub trait ToXml {
    fn to_xml(&self) -> Vec<Element>;
}

/// Builds a message body from the SOAP `Body` element.
pub trait FromXml: Sized {
    /// # Errors
    ///
    /// Returns [`ParseError`] when the body does not have the expected shape.
    fn from_xml(body: &Element) -> Result<Self, ParseError>;
}

impl<T: ToXml + ?Sized> ToXml for &T {
    fn to_xml(&self) -> Vec<Element> {
        (**self).to_xml()
    }
}

/// Body kept as an uninterpreted element list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody(pub Vec<Element>);

impl ToXml for RawBody {
    fn to_xml(&self) -> Vec<Element> {
        self.0.clone()
    }
}

impl FromXml for RawBody {
    fn from_xml(body: &Element) -> Result<Self, ParseError> {
        Ok(Self(body.elements().cloned().collect()))
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ReadScope {
    /// `Some(None)` records an explicit `xmlns=""`.
    default_ns: Option<Option<String>>,
    prefixes: Vec<(String, String)>,
}

struct TreeBuilder {
    scopes: Vec<ReadScope>,
    stack: Vec<Element>,
    root: Option<Element>,
}

impl TreeBuilder {
    fn resolve_prefix(&self, prefix: &str) -> Result<String, ParseError> {
        if prefix == "xml" {
            return Ok(XML_NS.to_string());
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.prefixes.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.clone())
            .ok_or_else(|| ParseError::Xml(format!("unbound namespace prefix {prefix:?}")))
    }

    fn default_ns(&self) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.default_ns.clone())
            .flatten()
    }

    fn open(&mut self, start: &BytesStart<'_>) -> Result<Element, ParseError> {
        let mut scope = ReadScope::default();
        let mut raw_attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_read_error)?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value().map_err(xml_read_error)?.into_owned();
            if key == "xmlns" {
                scope.default_ns = Some(if value.is_empty() { None } else { Some(value) });
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.prefixes.push((prefix.to_string(), value));
            } else {
                raw_attrs.push((key, value));
            }
        }
        self.scopes.push(scope);

        let raw_name = utf8(start.name().as_ref())?.to_string();
        let (ns, name) = match raw_name.split_once(':') {
            Some((prefix, local)) => (Some(self.resolve_prefix(prefix)?), local.to_string()),
            None => (self.default_ns(), raw_name),
        };

        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            let (ns, name) = match key.split_once(':') {
                Some((prefix, local)) => (Some(self.resolve_prefix(prefix)?), local.to_string()),
                None => (None, key),
            };
            attributes.push(Attribute { ns, name, value });
        }

        Ok(Element {
            ns,
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn close(&mut self, element: Element) -> Result<(), ParseError> {
        self.scopes.pop();
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None if self.root.is_none() => self.root = Some(element),
            None => return Err(ParseError::Xml("multiple root elements".into())),
        }
        Ok(())
    }

    fn text(&mut self, text: String) -> Result<(), ParseError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(Node::Text(text));
                Ok(())
            }
            None => Err(ParseError::Xml("text outside of the root element".into())),
        }
    }
}

/// Parses a complete XML document into its root element.
///
/// Whitespace-only text nodes are dropped.
///
/// # Errors
///
/// Returns [`ParseError::Xml`] for malformed documents, unbound prefixes,
/// mismatched end tags and missing or multiple root elements.
pub fn parse_document(input: &[u8]) -> Result<Element, ParseError> {
    let mut reader = Reader::from_reader(input);
    let mut builder = TreeBuilder {
        scopes: Vec::new(),
        stack: Vec::new(),
        root: None,
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_read_error)? {
            Event::Start(start) => {
                if builder.stack.is_empty() && builder.root.is_some() {
                    return Err(ParseError::Xml("multiple root elements".into()));
                }
                let element = builder.open(&start)?;
                builder.stack.push(element);
            }
            Event::Empty(start) => {
                if builder.stack.is_empty() && builder.root.is_some() {
                    return Err(ParseError::Xml("multiple root elements".into()));
                }
                let element = builder.open(&start)?;
                builder.close(element)?;
            }
            Event::End(_) => {
                let element = builder
                    .stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unexpected end tag".into()))?;
                builder.close(element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_read_error)?.into_owned();
                builder.text(text)?;
            }
            Event::CData(data) => {
                let text = utf8(&data.into_inner())?.to_string();
                builder.text(text)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !builder.stack.is_empty() {
        return Err(ParseError::Xml("unexpected end of document".into()));
    }
    builder
        .root
        .ok_or_else(|| ParseError::Xml("document has no root element".into()))
}

fn utf8(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::Xml(e.to_string()))
}

fn xml_read_error(err: impl std::fmt::Display) -> ParseError {
    ParseError::Xml(err.to_string())
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WriteScope {
    default_ns: Option<Option<String>>,
    prefixes: Vec<(String, String)>,
}

/// Serializes element trees, assigning prefixes from a `(namespace, prefix)`
/// table.
pub struct XmlWriter<'p, W: Write> {
    inner: quick_xml::Writer<W>,
    preferred: &'p [(&'p str, &'p str)],
    scopes: Vec<WriteScope>,
    generated: usize,
}

impl<'p, W: Write> XmlWriter<'p, W> {
    pub fn new(out: W, preferred: &'p [(&'p str, &'p str)]) -> Self {
        Self {
            inner: quick_xml::Writer::new(out),
            preferred,
            scopes: Vec::new(),
            generated: 0,
        }
    }

    /// Writes the XML declaration followed by `root`. Every namespace in
    /// `declare_on_root` is bound on the root element even when unused there.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the underlying writer fails.
    pub fn write_document(
        &mut self,
        root: &Element,
        declare_on_root: &[&str],
    ) -> Result<(), EncodeError> {
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_write_error)?;
        self.write_element(root, declare_on_root)
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    fn bound_prefix(&self, ns: &str) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.prefixes.iter().rev())
            .find(|(_, bound)| bound == ns)
            .map(|(p, _)| p.clone())
    }

    fn prefix_target(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.prefixes.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    fn current_default(&self) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.default_ns.as_ref())
            .and_then(|d| d.as_deref())
    }

    /// Returns the prefix for `ns`, declaring it on the current element when
    /// it is not yet in scope.
    fn prefix_for(&mut self, ns: &str, decls: &mut Vec<(String, String)>) -> String {
        if let Some(&(_, preferred)) = self.preferred.iter().find(|(n, _)| *n == ns) {
            if self.prefix_target(preferred) != Some(ns) {
                self.declare(preferred.to_string(), ns, decls);
            }
            return preferred.to_string();
        }
        if let Some(prefix) = self.bound_prefix(ns) {
            return prefix;
        }
        let prefix = format!("ns{}", self.generated);
        self.generated += 1;
        self.declare(prefix.clone(), ns, decls);
        prefix
    }

    fn declare(&mut self, prefix: String, ns: &str, decls: &mut Vec<(String, String)>) {
        decls.push((format!("xmlns:{prefix}"), ns.to_string()));
        if let Some(scope) = self.scopes.last_mut() {
            scope.prefixes.push((prefix, ns.to_string()));
        }
    }

    fn write_element(&mut self, el: &Element, declare: &[&str]) -> Result<(), EncodeError> {
        self.scopes.push(WriteScope::default());
        let mut decls: Vec<(String, String)> = Vec::new();

        for ns in declare {
            self.prefix_for(ns, &mut decls);
        }

        let qname = match el.ns.as_deref() {
            Some(ns) if self.preferred.iter().any(|(n, _)| *n == ns) => {
                format!("{}:{}", self.prefix_for(ns, &mut decls), el.name)
            }
            Some(ns) => {
                if self.current_default() != Some(ns) {
                    decls.push(("xmlns".to_string(), ns.to_string()));
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.default_ns = Some(Some(ns.to_string()));
                    }
                }
                el.name.clone()
            }
            None => {
                if self.current_default().is_some() {
                    decls.push(("xmlns".to_string(), String::new()));
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.default_ns = Some(None);
                    }
                }
                el.name.clone()
            }
        };

        let mut attrs: Vec<(String, String)> = Vec::with_capacity(el.attributes.len());
        for attr in &el.attributes {
            let key = match attr.ns.as_deref() {
                Some(ns) => format!("{}:{}", self.prefix_for(ns, &mut decls), attr.name),
                None => attr.name.clone(),
            };
            attrs.push((key, attr.value.clone()));
        }

        let mut start = BytesStart::new(qname.as_str());
        for (key, value) in decls.iter().chain(attrs.iter()) {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if el.children.is_empty() {
            self.inner
                .write_event(Event::Empty(start))
                .map_err(xml_write_error)?;
        } else {
            self.inner
                .write_event(Event::Start(start))
                .map_err(xml_write_error)?;
            for child in &el.children {
                match child {
                    Node::Element(e) => self.write_element(e, &[])?,
                    Node::Text(t) => self
                        .inner
                        .write_event(Event::Text(BytesText::new(t)))
                        .map_err(xml_write_error)?,
                }
            }
            self.inner
                .write_event(Event::End(BytesEnd::new(qname.as_str())))
                .map_err(xml_write_error)?;
        }

        self.scopes.pop();
        Ok(())
    }
}

fn xml_write_error(err: impl std::fmt::Display) -> EncodeError {
    EncodeError::Xml(err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
