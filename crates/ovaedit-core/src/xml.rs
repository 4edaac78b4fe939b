//! In-memory XML document model.
//!
//! Descriptors are parsed once into an owned element tree with
//! namespace-resolved names, edited through the typed accessors below, and
//! serialized once at the end. Prefixes seen in the input are remembered so
//! the output keeps the author's `ovf:`/`rasd:`/`vmw:` spelling, which matters
//! for attribute values such as `xsi:type="ovf:DiskSection_Type"`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

/// The reserved `xml:` namespace.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A namespace-qualified element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    /// Namespace URI, `None` for unqualified names.
    pub namespace: Option<String>,
    /// Local part of the name.
    pub local: String,
}

impl QName {
    /// A name in the given namespace.
    pub fn new(namespace: &str, local: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            local: local.to_string(),
        }
    }

    /// An unqualified name.
    pub fn unqualified(local: &str) -> Self {
        Self {
            namespace: None,
            local: local.to_string(),
        }
    }

    /// True if this name is `local` in namespace `namespace`.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

/// An XML element with resolved names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element {
    pub name: QName,
    /// Attributes in document order, excluding namespace declarations.
    pub attributes: Vec<(QName, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`Element::set_attr`].
    pub fn with_attr(mut self, name: QName, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`Element::set_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    /// Builder form of [`Element::push_child`].
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn attr(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &QName) -> Option<String> {
        let pos = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(pos).1)
    }

    /// Concatenated text content of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all direct text children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|node| !matches!(node, Node::Text(_)));
        let text = text.into();
        if !text.is_empty() {
            self.children.insert(0, Node::Text(text));
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn find_child(&self, name: &QName) -> Option<&Element> {
        self.child_elements().find(|e| e.name == *name)
    }

    pub fn find_child_mut(&mut self, name: &QName) -> Option<&mut Element> {
        self.child_elements_mut().find(|e| e.name == *name)
    }

    pub fn find_children<'a>(&'a self, name: &'a QName) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |e| e.name == *name)
    }

    /// Text of the first child named `name`.
    pub fn child_text(&self, name: &QName) -> Option<String> {
        self.find_child(name).map(Element::text)
    }

    /// Set the text of the first child named `name`, appending the child if
    /// it is missing.
    pub fn set_child_text(&mut self, name: &QName, text: impl Into<String>) {
        match self.find_child_mut(name) {
            Some(child) => child.set_text(text),
            None => self.push_child(Element::new(name.clone()).with_text(text)),
        }
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Insert at a node index (clamped to the end).
    pub fn insert_child(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    /// Node index of the first child element matching `pred`.
    pub fn position_of(&self, mut pred: impl FnMut(&Element) -> bool) -> Option<usize> {
        self.children.iter().position(|node| match node {
            Node::Element(e) => pred(e),
            _ => false,
        })
    }

    /// The child element at a node index.
    pub fn element_at_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.children.get_mut(index) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Remove every child element matching `pred`; returns how many went.
    pub fn remove_children(&mut self, mut pred: impl FnMut(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|node| match node {
            Node::Element(e) => !pred(e),
            _ => true,
        });
        before - self.children.len()
    }
}

/// A parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Element,
    /// `(prefix, uri)` pairs, first declaration of each URI wins.
    prefixes: Vec<(String, String)>,
}

impl Document {
    /// Wrap an element tree with no remembered prefixes.
    pub fn new(root: Element) -> Self {
        Self {
            root,
            prefixes: Vec::new(),
        }
    }

    /// Parse a document from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::xml(format!("descriptor is not valid UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Parser::default().parse(text)
    }

    /// Remember a preferred prefix for a namespace, unless the namespace
    /// already has one.
    pub fn declare_prefix(&mut self, prefix: &str, uri: &str) {
        if prefix.is_empty() || self.prefix_for(uri).is_some() {
            return;
        }
        if self.prefixes.iter().any(|(p, _)| p == prefix) {
            return;
        }
        self.prefixes.push((prefix.to_string(), uri.to_string()));
    }

    /// The remembered prefix for a namespace URI.
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, u)| u == uri)
            .map(|(p, _)| p.as_str())
    }

    /// Serialize with an XML declaration and two-space indentation.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let prefixes = self.assign_prefixes();
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        write_element(&mut writer, &self.root, &prefixes, true)?;
        let mut out = writer.into_inner();
        out.push(b'\n');
        Ok(out)
    }

    /// Final URI -> prefix table for every namespace used in the tree.
    fn assign_prefixes(&self) -> Vec<(String, String)> {
        let mut used = Vec::new();
        collect_namespaces(&self.root, &mut used);

        let mut assigned: Vec<(String, String)> = Vec::new();
        // Keep remembered declarations in their original order.
        for (prefix, uri) in &self.prefixes {
            if used.contains(uri) {
                assigned.push((prefix.clone(), uri.clone()));
            }
        }
        let mut counter = 0;
        for uri in used {
            if uri == XML_NS || assigned.iter().any(|(_, u)| *u == uri) {
                continue;
            }
            let prefix = loop {
                let candidate = format!("ns{}", counter);
                counter += 1;
                if !assigned.iter().any(|(p, _)| *p == candidate) {
                    break candidate;
                }
            };
            assigned.push((prefix, uri));
        }
        assigned
    }
}

fn collect_namespaces(element: &Element, used: &mut Vec<String>) {
    let names = std::iter::once(&element.name).chain(element.attributes.iter().map(|(n, _)| n));
    for name in names {
        if let Some(ns) = &name.namespace {
            if !used.contains(ns) {
                used.push(ns.clone());
            }
        }
    }
    for child in element.child_elements() {
        collect_namespaces(child, used);
    }
}

fn qualify<'a>(name: &'a QName, prefixes: &[(String, String)]) -> Cow<'a, str> {
    match &name.namespace {
        None => Cow::Borrowed(&name.local),
        Some(ns) if ns == XML_NS => Cow::Owned(format!("xml:{}", name.local)),
        Some(ns) => {
            let prefix = prefixes
                .iter()
                .find(|(_, u)| u == ns)
                .map(|(p, _)| p.as_str())
                .unwrap_or("ns");
            Cow::Owned(format!("{}:{}", prefix, name.local))
        }
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::xml(format!("failed to write XML: {}", e)))
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    prefixes: &[(String, String)],
    is_root: bool,
) -> Result<()> {
    let tag = qualify(&element.name, prefixes);
    let mut start = BytesStart::new(tag.as_ref());
    if is_root {
        for (prefix, uri) in prefixes {
            let decl = format!("xmlns:{}", prefix);
            start.push_attribute((decl.as_str(), uri.as_str()));
        }
    }
    for (name, value) in &element.attributes {
        let key = qualify(name, prefixes);
        start.push_attribute((key.as_ref(), value.as_str()));
    }

    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for node in &element.children {
        match node {
            Node::Element(child) => write_element(writer, child, prefixes, false)?,
            Node::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            Node::Comment(text) => emit(writer, Event::Comment(BytesText::from_escaped(text.as_str())))?,
        }
    }
    emit(writer, Event::End(BytesEnd::new(tag.as_ref())))
}

/// Event-driven tree builder with namespace scoping.
#[derive(Default)]
struct Parser {
    /// One map per open element: prefix ("" for default) -> URI.
    scopes: Vec<HashMap<String, String>>,
    stack: Vec<Element>,
    prefixes: Vec<(String, String)>,
}

/// Raw name/value pairs pulled out of a start tag.
type RawAttrs = Vec<(String, String)>;

impl Parser {
    fn parse(mut self, text: &str) -> Result<Document> {
        let mut reader = Reader::from_str(text);
        let mut root = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| Error::xml(format!("malformed XML at byte {}: {}", reader.buffer_position(), e)))?;
            match event {
                Event::Start(ref e) => {
                    let element = self.open(e)?;
                    self.stack.push(element);
                }
                Event::Empty(ref e) => {
                    let element = self.open(e)?;
                    self.scopes.pop();
                    self.attach(element, &mut root)?;
                }
                Event::End(_) => {
                    let element = self
                        .stack
                        .pop()
                        .ok_or_else(|| Error::xml("unbalanced end tag"))?;
                    self.scopes.pop();
                    self.attach(element, &mut root)?;
                }
                Event::Text(ref e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::xml(format!("bad text content: {}", e)))?;
                    self.push_text(&text);
                }
                Event::CData(ref e) => {
                    let text = String::from_utf8_lossy(e);
                    self.push_text(&text);
                }
                Event::Comment(ref e) => {
                    if let Some(parent) = self.stack.last_mut() {
                        parent
                            .children
                            .push(Node::Comment(String::from_utf8_lossy(e).into_owned()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !self.stack.is_empty() {
            return Err(Error::xml("unexpected end of document"));
        }
        let root = root.ok_or_else(|| Error::xml("document has no root element"))?;
        Ok(Document {
            root,
            prefixes: self.prefixes,
        })
    }

    fn push_text(&mut self, text: &str) {
        // Indentation between elements is regenerated on output.
        if text.trim().is_empty() {
            return;
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(Node::Text(text.to_string()));
        }
    }

    fn attach(&mut self, element: Element, root: &mut Option<Element>) -> Result<()> {
        match self.stack.last_mut() {
            Some(parent) => parent.push_child(element),
            None => {
                if root.is_some() {
                    return Err(Error::xml("document has more than one root element"));
                }
                *root = Some(element);
            }
        }
        Ok(())
    }

    /// Push the element's namespace scope and build it with resolved names.
    fn open(&mut self, start: &BytesStart<'_>) -> Result<Element> {
        let raw_name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| Error::xml(format!("element name is not UTF-8: {}", e)))?
            .to_string();

        let mut scope = HashMap::new();
        let mut raw_attrs: RawAttrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::xml(format!("bad attribute on <{}>: {}", raw_name, e)))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| Error::xml(format!("attribute name is not UTF-8: {}", e)))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::xml(format!("bad value for attribute {}: {}", key, e)))?
                .into_owned();
            if key == "xmlns" {
                scope.insert(String::new(), value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                if !self.prefixes.iter().any(|(_, u)| *u == value) {
                    self.prefixes.push((prefix.to_string(), value.clone()));
                }
                scope.insert(prefix.to_string(), value);
            } else {
                raw_attrs.push((key, value));
            }
        }
        self.scopes.push(scope);

        let name = self.resolve(&raw_name, true)?;
        let mut element = Element::new(name);
        for (key, value) in raw_attrs {
            let name = self.resolve(&key, false)?;
            element.attributes.push((name, value));
        }
        Ok(element)
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(prefix))
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }

    fn resolve(&self, raw: &str, is_element: bool) -> Result<QName> {
        match raw.split_once(':') {
            Some(("xml", local)) => Ok(QName::new(XML_NS, local)),
            Some((prefix, local)) => {
                let uri = self
                    .lookup(prefix)
                    .ok_or_else(|| Error::xml(format!("undeclared namespace prefix '{}' in '{}'", prefix, raw)))?;
                Ok(QName::new(uri, local))
            }
            // Unprefixed attributes never take the default namespace.
            None if is_element => Ok(match self.lookup("") {
                Some(uri) => QName::new(uri, raw),
                None => QName::unqualified(raw),
            }),
            None => Ok(QName::unqualified(raw)),
        }
    }
}
