// Small owned XML tree for OOXML parts.
//
// Names are kept exactly as written (`a:t`, `p:sp`, `r:embed`), namespace
// declarations are ordinary attributes, so a parse/write cycle leaves
// untouched parts of a slide byte-for-byte equivalent in meaning.
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Follow a chain of child names, e.g. `["p:spPr", "a:xfrm", "a:off"]`.
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }

    pub fn path_mut(&mut self, names: &[&str]) -> Option<&mut Element> {
        let mut el = self;
        for name in names {
            el = el.child_mut(name)?;
        }
        Some(el)
    }

    /// Element reached by following child indices (positions in `children`).
    pub fn at_mut(&mut self, indices: &[usize]) -> Option<&mut Element> {
        let mut el = self;
        for &i in indices {
            el = match el.children.get_mut(i)? {
                Node::Element(e) => e,
                Node::Text(_) => return None,
            };
        }
        Some(el)
    }

    /// Detach the element at `indices`. Removing shifts later siblings, so
    /// callers removing several elements should go from the last path back.
    pub fn remove_at(&mut self, indices: &[usize]) -> Option<Element> {
        let (last, parent) = indices.split_last()?;
        let parent = self.at_mut(parent)?;
        if !matches!(parent.children.get(*last), Some(Node::Element(_))) {
            return None;
        }
        match parent.children.remove(*last) {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn insert_child(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    /// Position of the first child element named `name` in `children`.
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))
    }

    /// Get or append a child element.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let pos = match self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))
        {
            Some(pos) => pos,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[pos] {
            Node::Element(e) => e,
            Node::Text(_) => unreachable!("position matched an element"),
        }
    }

    /// All descendants (depth-first, document order) with the given name.
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    pub fn find_descendant(&self, name: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn for_each_descendant_mut(&mut self, name: &str, f: &mut dyn FnMut(&mut Element)) {
        for child in self.elements_mut() {
            if child.name == name {
                f(child);
            }
            child.for_each_descendant_mut(name, f);
        }
    }

    /// Direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn set_text(&mut self, text: &str) {
        self.children.retain(|n| matches!(n, Node::Element(_)));
        if !text.is_empty() {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    /// Concatenated text of every descendant with the given name.
    pub fn text_of(&self, name: &str) -> String {
        let mut found = Vec::new();
        self.descendants(name, &mut found);
        found.iter().map(|e| e.text()).collect()
    }

    /// Drop every child element satisfying `pred`, searching the whole subtree.
    /// Returns how many were removed.
    pub fn remove_where(&mut self, pred: &dyn Fn(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if pred(e)));
        let mut removed = before - self.children.len();
        for child in self.elements_mut() {
            removed += child.remove_where(pred);
        }
        removed
    }
}

/// A parsed part: declaration (if any) plus root element.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ReportError::Template(format!("part is not UTF-8: {}", e)))?;
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(start_element(&start)?),
                Event::Empty(start) => {
                    let el = start_element(&start)?;
                    attach(&mut stack, &mut root, el);
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| ReportError::Template("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el);
                }
                Event::Text(t) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(t.unescape()?.into_owned()));
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = String::from_utf8_lossy(&c.into_inner()).into_owned();
                        parent.children.push(Node::Text(raw));
                    }
                }
                Event::Eof => break,
                // Declarations, comments and processing instructions are not
                // carried; parts are rewritten with a standard declaration.
                _ => {}
            }
        }
        let root = root.ok_or_else(|| ReportError::Template("empty XML part".into()))?;
        Ok(Self { root })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        write_element(&mut writer, &self.root)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn start_element(start: &BytesStart) -> Result<Element> {
    let mut el = Element::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(el)),
        None => *root = Some(el),
    }
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &Element) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &el.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}
