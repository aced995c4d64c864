//! The in-memory XML tree the merge engine reads from and mutates.
//!
//! Each [`XmlDocument`] owns its nodes in a private `indextree` arena. Nodes
//! are addressed by [`NodeId`] handles that are only meaningful for the
//! document that produced them; moving content between documents always goes
//! through [`XmlDocument::import_node`], which deep-copies into the
//! destination arena.

use crate::error::MergeError;
use indextree::{Arena, NodeId};
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::FromStr;

/// A single node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// The synthetic node every document is rooted at. It holds the prolog,
    /// the document element and any trailing misc nodes.
    Document,
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    Declaration(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attributes in source order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Written as `<name />` while it has no children. Only elements parsed
    /// from an empty-element tag start out self-closing.
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            self_closing: false,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Represents an in-memory XML document that can be queried with path
/// expressions and mutated by merge rules.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    arena: Arena<XmlNode>,
    root: NodeId,
}

impl XmlDocument {
    fn empty() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(XmlNode::Document);
        Self { arena, root }
    }

    /// The synthetic document node. Path evaluation starts here.
    pub fn document_node(&self) -> NodeId {
        self.root
    }

    /// The single top-level element, if the document still has one.
    pub fn root_element(&self) -> Option<NodeId> {
        self.root
            .children(&self.arena)
            .find(|id| self.element(*id).is_some())
    }

    pub fn node(&self, id: NodeId) -> Option<&XmlNode> {
        self.arena
            .get(id)
            .filter(|_| !id.is_removed(&self.arena))
            .map(|node| node.get())
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id) {
            Some(XmlNode::Element(element)) => Some(element),
            _ => None,
        }
    }

    /// Returns the parent handle, which is the document node for the
    /// document element and `None` for detached nodes.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(id).and_then(|node| node.parent())
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    /// Iterates `id` followed by all of its descendants in document order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.descendants(&self.arena)
    }

    /// Concatenated character data of the node and all its descendants.
    ///
    /// Elements without any text yield an empty string.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        for descendant in id.descendants(&self.arena) {
            match self.arena[descendant].get() {
                XmlNode::Text(value) | XmlNode::CData(value) => text.push_str(value),
                _ => {}
            }
        }
        text
    }

    /// Replaces the content of an element with a single text node.
    ///
    /// Every existing child of the element is removed first; an empty `text`
    /// leaves the element without children, written as `<name></name>`. Text and CDATA leaves have their
    /// character data overwritten in place.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), MergeError> {
        if self.element(id).is_some() {
            if let Some(XmlNode::Element(element)) =
                self.arena.get_mut(id).map(|node| node.get_mut())
            {
                element.self_closing = false;
            }
            let children: Vec<NodeId> = id.children(&self.arena).collect();
            for child in children {
                child.remove_subtree(&mut self.arena);
            }
            if !text.is_empty() {
                let leaf = self.arena.new_node(XmlNode::Text(text.to_string()));
                id.checked_append(leaf, &mut self.arena)
                    .map_err(|err| MergeError::Structural(err.to_string()))?;
            }
            return Ok(());
        }

        match self.arena.get_mut(id).map(|node| node.get_mut()) {
            Some(XmlNode::Text(value)) | Some(XmlNode::CData(value)) => {
                *value = text.to_string();
                Ok(())
            }
            _ => Err(MergeError::Structural(
                "text content can only be set on elements and text nodes".to_string(),
            )),
        }
    }

    /// Copies `node` from `source` into this document's arena.
    ///
    /// The copy is detached; attach it with [`append_child`](Self::append_child),
    /// [`insert_before`](Self::insert_before) or
    /// [`replace_child`](Self::replace_child). When `deep` is false only the
    /// node itself (with its attributes) is copied.
    pub fn import_node(&mut self, source: &XmlDocument, node: NodeId, deep: bool) -> NodeId {
        let copy = self.arena.new_node(source.arena[node].get().clone());
        if deep {
            for child in node.children(&source.arena) {
                let imported = self.import_node(source, child, true);
                copy.append(imported, &mut self.arena);
            }
        }
        copy
    }

    /// Appends `child` as the last child of the element `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), MergeError> {
        if self.element(parent).is_none() {
            return Err(MergeError::Structural(
                "cannot append a child to a non-element node".to_string(),
            ));
        }
        parent
            .checked_append(child, &mut self.arena)
            .map_err(|err| MergeError::Structural(err.to_string()))
    }

    /// Inserts `new_child` immediately before `anchor`, which must be a
    /// child of `parent`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        anchor: NodeId,
    ) -> Result<(), MergeError> {
        self.ensure_child_of(parent, anchor, "insertion anchor")?;
        anchor
            .checked_insert_before(new_child, &mut self.arena)
            .map_err(|err| MergeError::Structural(err.to_string()))
    }

    /// Puts `new_child` where `old_child` was and drops `old_child` with its
    /// subtree.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> Result<(), MergeError> {
        self.ensure_child_of(parent, old_child, "replaced node")?;
        old_child
            .checked_insert_before(new_child, &mut self.arena)
            .map_err(|err| MergeError::Structural(err.to_string()))?;
        old_child.remove_subtree(&mut self.arena);
        Ok(())
    }

    /// Removes `child` and its subtree from `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), MergeError> {
        self.ensure_child_of(parent, child, "removed node")?;
        child.remove_subtree(&mut self.arena);
        Ok(())
    }

    fn ensure_child_of(&self, parent: NodeId, child: NodeId, role: &str) -> Result<(), MergeError> {
        if self.parent(child) == Some(parent) {
            Ok(())
        } else {
            Err(MergeError::Structural(format!(
                "{role} is not a child of the given parent"
            )))
        }
    }

    /// Builds a new document whose root element is a copy of the first
    /// element named `name`, in document order.
    pub fn extract_subtree(&self, name: &str) -> Result<XmlDocument, MergeError> {
        let found = self
            .root
            .descendants(&self.arena)
            .find(|id| self.element(*id).is_some_and(|element| element.name == name))
            .ok_or_else(|| MergeError::MissingSourceRoot(name.to_string()))?;

        let mut extracted = XmlDocument::empty();
        let copy = extracted.import_node(self, found, true);
        extracted.root.append(copy, &mut extracted.arena);
        Ok(extracted)
    }

    /// Serializes the whole document back to XML text.
    ///
    /// Whitespace-only text, comments and the prolog are written back as
    /// they were parsed.
    pub fn render(&self) -> String {
        let mut output = String::new();
        for child in self.root.children(&self.arena) {
            self.write_node(child, &mut output);
        }
        output
    }

    /// Serializes a single node together with its subtree.
    pub fn outer_xml(&self, id: NodeId) -> String {
        let mut output = String::new();
        self.write_node(id, &mut output);
        output
    }

    fn write_node(&self, id: NodeId, output: &mut String) {
        match self.arena[id].get() {
            XmlNode::Document => {
                for child in id.children(&self.arena) {
                    self.write_node(child, output);
                }
            }
            XmlNode::Element(element) => {
                output.push('<');
                output.push_str(&element.name);
                for (key, value) in &element.attributes {
                    output.push(' ');
                    output.push_str(key);
                    output.push_str("=\"");
                    output.push_str(&escape(value.as_str()));
                    output.push('"');
                }
                if id.children(&self.arena).next().is_none() && element.self_closing {
                    output.push_str(" />");
                    return;
                }
                output.push('>');
                for child in id.children(&self.arena) {
                    self.write_node(child, output);
                }
                output.push_str("</");
                output.push_str(&element.name);
                output.push('>');
            }
            XmlNode::Text(text) => output.push_str(&partial_escape(text.as_str())),
            XmlNode::CData(data) => {
                output.push_str("<![CDATA[");
                output.push_str(data);
                output.push_str("]]>");
            }
            XmlNode::Comment(comment) => {
                output.push_str("<!--");
                output.push_str(comment);
                output.push_str("-->");
            }
            XmlNode::ProcessingInstruction(content) | XmlNode::Declaration(content) => {
                output.push_str("<?");
                output.push_str(content);
                output.push_str("?>");
            }
            XmlNode::DocType(content) => {
                output.push_str("<!DOCTYPE ");
                output.push_str(content);
                output.push('>');
            }
        }
    }
}

impl FromStr for XmlDocument {
    type Err = MergeError;

    /// Parses XML text into an [`XmlDocument`], keeping whitespace-only text
    /// nodes.
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut document = XmlDocument::empty();
        let mut open = vec![document.root];
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(false);

        loop {
            let event = reader.read_event().map_err(|err| {
                MergeError::XmlParse(format!("{err} (at byte {})", reader.buffer_position()))
            })?;
            let Some(&parent) = open.last() else {
                return Err(MergeError::XmlParse(
                    "unbalanced closing tag".to_string(),
                ));
            };

            let node = match event {
                Event::Start(start) => {
                    let id = document
                        .arena
                        .new_node(XmlNode::Element(element_from_start(&start, false)?));
                    parent.append(id, &mut document.arena);
                    open.push(id);
                    continue;
                }
                Event::End(_) => {
                    if open.len() == 1 {
                        return Err(MergeError::XmlParse(
                            "unbalanced closing tag".to_string(),
                        ));
                    }
                    open.pop();
                    continue;
                }
                Event::Empty(start) => XmlNode::Element(element_from_start(&start, true)?),
                Event::Text(text) => XmlNode::Text(
                    text.unescape()
                        .map_err(|err| MergeError::XmlParse(err.to_string()))?
                        .into_owned(),
                ),
                Event::CData(data) => XmlNode::CData(utf8(&data)?),
                Event::Comment(comment) => XmlNode::Comment(utf8(&comment)?),
                Event::PI(instruction) => XmlNode::ProcessingInstruction(utf8(&instruction)?),
                Event::Decl(declaration) => XmlNode::Declaration(utf8(&declaration)?),
                Event::DocType(doctype) => XmlNode::DocType(utf8(&doctype)?),
                Event::Eof => break,
            };

            let id = document.arena.new_node(node);
            parent.append(id, &mut document.arena);
        }

        if open.len() != 1 {
            return Err(MergeError::XmlParse(
                "document ended inside an open element".to_string(),
            ));
        }
        if document.root_element().is_none() {
            return Err(MergeError::XmlParse(
                "document has no root element".to_string(),
            ));
        }

        Ok(document)
    }
}

fn element_from_start(start: &BytesStart, self_closing: bool) -> Result<Element, MergeError> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    element.self_closing = self_closing;
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| MergeError::XmlParse(err.to_string()))?;
        let key = utf8(attribute.key.as_ref())?;
        let value = attribute
            .unescape_value()
            .map_err(|err| MergeError::XmlParse(err.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn utf8(bytes: &[u8]) -> Result<String, MergeError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| MergeError::XmlParse(format!("invalid UTF-8: {err}")))
}
