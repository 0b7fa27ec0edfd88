//! Document tree nodes.
//!
//! A [`Node`] is a shared handle to one tree position. Cloning the handle does
//! not copy the node: two handles compare equal only if they point to the same
//! node. Children are owned by their parent; the parent link is a weak
//! back-reference, so dropping the root releases the whole tree.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Bound, RangeBounds};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::payload::Payload;
use crate::query::{self, QueryResult};
use crate::render::Renderer;
use crate::{Result, ZemlError};

/// The four node variants.
///
/// The discriminants are the kind tags of the binary format and must never
/// change for stored documents to stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element = 0,
    Text = 1,
    Data = 2,
    Fragment = 3,
}

impl NodeKind {
    /// Get the kind tag used by the binary format
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a kind by its binary tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(NodeKind::Element),
            1 => Some(NodeKind::Text),
            2 => Some(NodeKind::Data),
            3 => Some(NodeKind::Fragment),
            _ => None,
        }
    }
}

/// Variant-specific node content
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    /// A tag with attributes, kept in insertion order
    Element {
        name: String,
        attributes: IndexMap<String, String>,
    },
    /// Literal text, escaped on output
    Text(String),
    /// Pre-formed markup, emitted verbatim
    Data(String),
    /// The root container of a document
    Fragment,
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Element { .. } => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Data(_) => NodeKind::Data,
            NodeData::Fragment => NodeKind::Fragment,
        }
    }

    /// The payload string of text and data nodes
    pub fn value(&self) -> Option<&str> {
        match self {
            NodeData::Text(value) | NodeData::Data(value) => Some(value),
            _ => None,
        }
    }

    /// The tag name of element nodes
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeData::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        match self {
            NodeData::Element { attributes, .. } => attributes.get(key).map(String::as_str),
            _ => None,
        }
    }

    fn accepts_children(&self) -> bool {
        matches!(self, NodeData::Element { .. } | NodeData::Fragment)
    }
}

pub(crate) struct Inner {
    pub(crate) data: NodeData,
    pub(crate) children: Vec<Node>,
    pub(crate) callback_data: Vec<(String, Payload)>,
    parent: Weak<RefCell<Inner>>,
}

impl Drop for Inner {
    // Release descendants from a work list so long chains cannot overflow
    // the stack. Nodes still referenced elsewhere are left alone.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let Ok(cell) = Rc::try_unwrap(node.0) {
                pending.append(&mut cell.into_inner().children);
            }
        }
    }
}

/// A handle to a node in a document tree.
#[derive(Clone)]
pub struct Node(Rc<RefCell<Inner>>);

impl Node {
    /// Create a detached node from variant data
    pub fn new(data: NodeData) -> Self {
        Node(Rc::new(RefCell::new(Inner {
            data,
            children: Vec::new(),
            callback_data: Vec::new(),
            parent: Weak::new(),
        })))
    }

    /// Create a new element node
    pub fn element(name: &str) -> Self {
        Self::new(NodeData::Element {
            name: name.to_string(),
            attributes: IndexMap::new(),
        })
    }

    /// Create a new element node with attributes
    pub fn element_with_attrs<K, V>(name: &str, attrs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(NodeData::Element {
            name: name.to_string(),
            attributes: attrs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Create a new text node
    pub fn text_node(value: impl Into<String>) -> Self {
        Self::new(NodeData::Text(value.into()))
    }

    /// Create a new data node holding already safe markup
    pub fn data_node(value: impl Into<String>) -> Self {
        Self::new(NodeData::Data(value.into()))
    }

    /// Create an empty document fragment
    pub fn fragment() -> Self {
        Self::new(NodeData::Fragment)
    }

    /// Build a node and adopt already detached children without ownership
    /// checks. Used when reconstructing trees from trusted sources.
    pub(crate) fn from_parts(
        data: NodeData,
        callback_data: Vec<(String, Payload)>,
        children: Vec<Node>,
    ) -> Self {
        let node = Self::new(data);
        for child in &children {
            child.0.borrow_mut().parent = Rc::downgrade(&node.0);
        }
        {
            let mut inner = node.0.borrow_mut();
            inner.children = children;
            inner.callback_data = callback_data;
        }
        node
    }

    pub(crate) fn inner(&self) -> Ref<'_, Inner> {
        self.0.borrow()
    }

    /// Borrow the variant data
    pub fn node_data(&self) -> Ref<'_, NodeData> {
        Ref::map(self.0.borrow(), |inner| &inner.data)
    }

    pub fn kind(&self) -> NodeKind {
        self.0.borrow().data.kind()
    }

    pub fn is_element(&self) -> bool {
        self.kind() == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind() == NodeKind::Text
    }

    pub fn is_data(&self) -> bool {
        self.kind() == NodeKind::Data
    }

    pub fn is_fragment(&self) -> bool {
        self.kind() == NodeKind::Fragment
    }

    /// Get the tag name of an element node
    pub fn name(&self) -> Option<String> {
        self.0.borrow().data.name().map(str::to_string)
    }

    /// Get the value of a text or data node
    pub fn value(&self) -> Option<String> {
        self.0.borrow().data.value().map(str::to_string)
    }

    /// Check if this is a text or data node
    pub fn has_value(&self) -> bool {
        self.0.borrow().data.value().is_some()
    }

    /// Get an attribute value by name
    pub fn attr(&self, key: &str) -> Option<String> {
        self.0.borrow().data.attr(key).map(str::to_string)
    }

    /// Check if an attribute exists
    pub fn has_attr(&self, key: &str) -> bool {
        self.0.borrow().data.attr(key).is_some()
    }

    /// Get a copy of all attributes in insertion order
    pub fn attributes(&self) -> IndexMap<String, String> {
        match &self.0.borrow().data {
            NodeData::Element { attributes, .. } => attributes.clone(),
            _ => IndexMap::new(),
        }
    }

    /// Set an attribute. Only element nodes carry attributes.
    pub fn set_attr(&self, key: &str, value: &str) -> Result<()> {
        match &mut self.0.borrow_mut().data {
            NodeData::Element { attributes, .. } => {
                attributes.insert(key.to_string(), value.to_string());
                Ok(())
            }
            other => Err(ZemlError::UnsupportedOperation(format!(
                "{:?} nodes carry no attributes",
                other.kind()
            ))),
        }
    }

    /// Remove an attribute, keeping the order of the others
    pub fn remove_attr(&self, key: &str) -> Option<String> {
        match &mut self.0.borrow_mut().data {
            NodeData::Element { attributes, .. } => attributes.shift_remove(key),
            _ => None,
        }
    }

    /// Get the containing node, if any
    pub fn parent(&self) -> Option<Node> {
        self.0.borrow().parent.upgrade().map(Node)
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Number of ancestors above this node
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(node) = current {
            depth += 1;
            current = node.parent();
        }
        depth
    }

    /// Access the child list
    pub fn children(&self) -> Children {
        Children {
            owner: self.clone(),
        }
    }

    /// Get the attached render callbacks in attachment order
    pub fn callback_data(&self) -> Vec<(String, Payload)> {
        self.0.borrow().callback_data.clone()
    }

    /// Attach a render callback, consulted at render and text-extraction time
    pub fn add_render_callback(&self, identifier: &str, data: impl Into<Payload>) {
        self.0
            .borrow_mut()
            .callback_data
            .push((identifier.to_string(), data.into()));
    }

    /// Query the descendants of this node. See [`crate::query`] for the rule syntax.
    pub fn query(&self, rule: &str) -> Result<QueryResult> {
        query::query_nodes(self.children().to_vec(), rule)
    }

    /// Render this node without render callbacks
    pub fn render(&self) -> String {
        Renderer::default().render(self)
    }

    /// Render this element with `inject` in place of its children
    pub fn render_with(&self, inject: &str) -> String {
        Renderer::default().render_with(self, Some(inject))
    }

    /// Extract the plain text of this node without render callbacks
    pub fn text(&self) -> String {
        Renderer::default().text(self)
    }

    /// Check if the node holds nothing: no children, attributes, callbacks or value
    pub fn is_empty(&self) -> bool {
        let inner = self.0.borrow();
        let data_empty = match &inner.data {
            NodeData::Element { attributes, .. } => attributes.is_empty(),
            NodeData::Text(value) | NodeData::Data(value) => value.is_empty(),
            NodeData::Fragment => true,
        };
        data_empty && inner.children.is_empty() && inner.callback_data.is_empty()
    }

    /// Compare shape and field values, ignoring identity
    pub fn structurally_eq(&self, other: &Node) -> bool {
        let mut pending = vec![(self.clone(), other.clone())];
        while let Some((a, b)) = pending.pop() {
            if a == b {
                continue;
            }
            let x = a.0.borrow();
            let y = b.0.borrow();
            if x.data != y.data
                || x.callback_data != y.callback_data
                || x.children.len() != y.children.len()
            {
                return false;
            }
            pending.extend(x.children.iter().cloned().zip(y.children.iter().cloned()));
        }
        true
    }

    /// Copy this node and its subtree. The copy has no parent.
    pub fn deep_clone(&self) -> Node {
        let root = self.shallow_clone();
        let mut pending = vec![(self.clone(), root.clone())];
        while let Some((source, copy)) = pending.pop() {
            let children: Vec<Node> = source
                .0
                .borrow()
                .children
                .iter()
                .map(|child| {
                    let child_copy = child.shallow_clone();
                    pending.push((child.clone(), child_copy.clone()));
                    child_copy
                })
                .collect();
            for child in &children {
                child.0.borrow_mut().parent = Rc::downgrade(&copy.0);
            }
            copy.0.borrow_mut().children = children;
        }
        root
    }

    fn shallow_clone(&self) -> Node {
        let inner = self.0.borrow();
        Node::from_parts(inner.data.clone(), inner.callback_data.clone(), Vec::new())
    }

    /// Short human readable label for error messages
    pub(crate) fn describe(&self) -> String {
        match &self.0.borrow().data {
            NodeData::Element { name, .. } => format!("<{}>", name),
            NodeData::Text(value) => format!("text {:?}", truncate(value, 20)),
            NodeData::Data(value) => format!("data {:?}", truncate(value, 20)),
            NodeData::Fragment => "fragment".to_string(),
        }
    }

    fn is_ancestor_of(&self, node: &Node) -> bool {
        let mut current = node.parent();
        while let Some(ancestor) = current {
            if &ancestor == self {
                return true;
            }
            current = ancestor.parent();
        }
        false
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?} {:?}>", self.kind(), self.render())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The child list of a node.
///
/// Every insertion checks that the incoming node is unbound, and every removal
/// unbinds the outgoing node, so a node is never the child of two parents.
pub struct Children {
    owner: Node,
}

impl Children {
    pub fn len(&self) -> usize {
        self.owner.0.borrow().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the child at `index`
    pub fn get(&self, index: usize) -> Option<Node> {
        self.owner.0.borrow().children.get(index).cloned()
    }

    /// Snapshot of the current children
    pub fn to_vec(&self) -> Vec<Node> {
        self.owner.0.borrow().children.clone()
    }

    /// Iterate over a snapshot of the current children
    pub fn iter(&self) -> std::vec::IntoIter<Node> {
        self.to_vec().into_iter()
    }

    /// Find the position of a child by identity
    pub fn position(&self, node: &Node) -> Option<usize> {
        self.owner
            .0
            .borrow()
            .children
            .iter()
            .position(|child| child == node)
    }

    /// Append a node to the list
    pub fn append(&self, node: Node) -> Result<()> {
        self.check_insertable(&node)?;
        self.bind(&node);
        self.owner.0.borrow_mut().children.push(node);
        Ok(())
    }

    /// Insert a node at a given position. Positions past the end append.
    pub fn insert(&self, pos: usize, node: Node) -> Result<()> {
        self.check_insertable(&node)?;
        self.bind(&node);
        let mut inner = self.owner.0.borrow_mut();
        let pos = pos.min(inner.children.len());
        inner.children.insert(pos, node);
        Ok(())
    }

    /// Add all nodes from the sequence passed
    pub fn extend(&self, nodes: impl IntoIterator<Item = Node>) -> Result<()> {
        for node in nodes {
            self.append(node)?;
        }
        Ok(())
    }

    /// Remove the node at `index` (the last one by default) and unbind it
    pub fn pop(&self, index: Option<usize>) -> Option<Node> {
        let node = {
            let mut inner = self.owner.0.borrow_mut();
            match index {
                None => inner.children.pop(),
                Some(idx) if idx < inner.children.len() => Some(inner.children.remove(idx)),
                Some(_) => None,
            }
        }?;
        unbind(&node);
        Some(node)
    }

    /// Remove a range of children and unbind them
    pub fn drain(&self, range: impl RangeBounds<usize>) -> Vec<Node> {
        let removed: Vec<Node> = {
            let mut inner = self.owner.0.borrow_mut();
            let (start, end) = clamp_range(&range, inner.children.len());
            inner.children.drain(start..end).collect()
        };
        removed.iter().for_each(unbind);
        removed
    }

    /// Remove all children
    pub fn clear(&self) -> Vec<Node> {
        self.drain(..)
    }

    /// Put `node` at `index`, returning the unbound node it replaced
    pub fn set(&self, index: usize, node: Node) -> Result<Node> {
        if index >= self.len() {
            return Err(ZemlError::NotFound(format!(
                "child index {} of {}",
                index,
                self.owner.describe()
            )));
        }
        self.check_insertable(&node)?;
        self.bind(&node);
        let old = std::mem::replace(&mut self.owner.0.borrow_mut().children[index], node);
        unbind(&old);
        Ok(old)
    }

    /// Replace a range of children with `nodes`, returning the removed ones.
    ///
    /// All incoming nodes are checked before the list is touched.
    pub fn splice(
        &self,
        range: impl RangeBounds<usize>,
        nodes: impl IntoIterator<Item = Node>,
    ) -> Result<Vec<Node>> {
        let incoming: Vec<Node> = nodes.into_iter().collect();
        for (i, node) in incoming.iter().enumerate() {
            self.check_insertable(node)?;
            if incoming[..i].contains(node) {
                return Err(ZemlError::OwnershipViolation {
                    node: node.describe(),
                    reason: "it appears twice in the same assignment".to_string(),
                });
            }
        }
        incoming.iter().for_each(|node| self.bind(node));
        let removed: Vec<Node> = {
            let mut inner = self.owner.0.borrow_mut();
            let (start, end) = clamp_range(&range, inner.children.len());
            inner.children.splice(start..end, incoming).collect()
        };
        removed.iter().for_each(unbind);
        Ok(removed)
    }

    /// Replace `old` (found by identity) with `new`
    pub fn replace(&self, old: &Node, new: Node) -> Result<()> {
        let index = self
            .position(old)
            .ok_or_else(|| ZemlError::NotFound(format!("{} in child list", old.describe())))?;
        self.set(index, new).map(|_| ())
    }

    /// Remove a node (found by identity) from the list
    pub fn remove(&self, node: &Node) -> Result<()> {
        let index = self
            .position(node)
            .ok_or_else(|| ZemlError::NotFound(format!("{} in child list", node.describe())))?;
        self.pop(Some(index));
        Ok(())
    }

    /// Repeating a child list would put the same nodes under one parent twice.
    pub fn repeat(&self, _times: usize) -> Result<()> {
        Err(ZemlError::UnsupportedOperation(
            "child lists cannot be repeated".to_string(),
        ))
    }

    fn check_insertable(&self, node: &Node) -> Result<()> {
        if !self.owner.0.borrow().data.accepts_children() {
            return Err(ZemlError::UnsupportedOperation(format!(
                "{} cannot hold children",
                self.owner.describe()
            )));
        }
        if let Some(parent) = node.parent() {
            return Err(ZemlError::OwnershipViolation {
                node: node.describe(),
                reason: format!("already bound to {}", parent.describe()),
            });
        }
        if node == &self.owner || node.is_ancestor_of(&self.owner) {
            return Err(ZemlError::OwnershipViolation {
                node: node.describe(),
                reason: format!("it contains {}", self.owner.describe()),
            });
        }
        Ok(())
    }

    fn bind(&self, node: &Node) {
        node.0.borrow_mut().parent = Rc::downgrade(&self.owner.0);
    }
}

impl IntoIterator for &Children {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn unbind(node: &Node) {
    node.0.borrow_mut().parent = Weak::new();
}

fn clamp_range(range: &impl RangeBounds<usize>, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s + 1,
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e + 1,
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    let end = end.min(len);
    (start.min(end), end)
}
