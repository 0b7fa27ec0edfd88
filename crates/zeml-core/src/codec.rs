//! Binary persistence for document trees.
//!
//! Parsed documents are stored next to their source text so they do not have
//! to be parsed again on every request. The format is explicit and versioned:
//!
//! ```text
//! document := "ZEML" version:u8 node
//! node     := kind:u8 fields callbacks:u32 (string payload)* children:u32 node*
//! fields   := Element: name:string attrs:u32 (string string)*
//!           | Text, Data: value:string
//!           | Fragment: (nothing)
//! string   := length:u32 utf8-bytes
//! payload  := 'N' | 'I' i64 | 'S' string | 'L' u32 payload* | 'M' u32 (string payload)*
//! ```
//!
//! All integers are big-endian. Kind tags are the [`NodeKind`] discriminants.
//! An empty fragment is stored as zero bytes.

use indexmap::IndexMap;

use crate::node::{Node, NodeData, NodeKind};
use crate::payload::Payload;
use crate::{Result, ZemlError, MAX_DEPTH};

const MAGIC: &[u8; 4] = b"ZEML";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

const OP_NULL: u8 = b'N';
const OP_INT: u8 = b'I';
const OP_STR: u8 = b'S';
const OP_LIST: u8 = b'L';
const OP_MAP: u8 = b'M';

/// Dump a tree into bytes
pub fn dump(tree: &Node) -> Vec<u8> {
    // special case: empty tree
    if tree.is_fragment() && tree.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    write_node(tree, &mut out);
    out
}

/// Load a tree from bytes produced by [`dump`]
pub fn load(data: &[u8]) -> Result<Node> {
    // special case: empty data, return empty fragment
    if data.is_empty() {
        return Ok(Node::fragment());
    }
    let mut reader = Reader { data, pos: 0 };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(reader.corrupt_at(0, "missing ZEML header"));
    }
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(reader.corrupt_at(4, &format!("unsupported format version {}", version)));
    }
    let tree = reader.node(0)?;
    if reader.pos != data.len() {
        return Err(reader.corrupt(&format!(
            "{} trailing bytes",
            data.len() - reader.pos
        )));
    }
    Ok(tree)
}

fn write_node(node: &Node, out: &mut Vec<u8>) {
    let inner = node.inner();
    out.push(inner.data.kind().tag());
    match &inner.data {
        NodeData::Element { name, attributes } => {
            write_str(name, out);
            write_len(attributes.len(), out);
            for (key, value) in attributes {
                write_str(key, out);
                write_str(value, out);
            }
        }
        NodeData::Text(value) | NodeData::Data(value) => write_str(value, out),
        NodeData::Fragment => {}
    }
    write_len(inner.callback_data.len(), out);
    for (identifier, data) in &inner.callback_data {
        write_str(identifier, out);
        write_payload(data, out);
    }
    write_len(inner.children.len(), out);
    for child in &inner.children {
        write_node(child, out);
    }
}

fn write_payload(payload: &Payload, out: &mut Vec<u8>) {
    match payload {
        Payload::Null => out.push(OP_NULL),
        Payload::Int(value) => {
            out.push(OP_INT);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Payload::Str(value) => {
            out.push(OP_STR);
            write_str(value, out);
        }
        Payload::List(items) => {
            out.push(OP_LIST);
            write_len(items.len(), out);
            for item in items {
                write_payload(item, out);
            }
        }
        Payload::Map(map) => {
            out.push(OP_MAP);
            write_len(map.len(), out);
            for (key, value) in map {
                write_str(key, out);
                write_payload(value, out);
            }
        }
    }
}

fn write_len(len: usize, out: &mut Vec<u8>) {
    // lengths above u32::MAX cannot come out of a parsed document
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
}

fn write_str(s: &str, out: &mut Vec<u8>) {
    write_len(s.len(), out);
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn corrupt(&self, reason: &str) -> ZemlError {
        self.corrupt_at(self.pos, reason)
    }

    fn corrupt_at(&self, offset: usize, reason: &str) -> ZemlError {
        ZemlError::CorruptSerializedData {
            offset,
            reason: reason.to_string(),
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.corrupt(&format!(
                "need {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }

    /// Read an item count, rejecting counts the remaining bytes cannot hold
    fn count(&mut self) -> Result<usize> {
        let count = self.u32()? as usize;
        if count > self.remaining() {
            return Err(self.corrupt(&format!("count {} exceeds remaining data", count)));
        }
        Ok(count)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let start = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| self.corrupt_at(start, "invalid UTF-8 in string"))
    }

    fn node(&mut self, depth: usize) -> Result<Node> {
        // elements nest MAX_DEPTH levels below the root, leaves sit one lower
        if depth > MAX_DEPTH + 1 {
            return Err(ZemlError::DepthExceeded(MAX_DEPTH));
        }
        let offset = self.pos;
        let tag = self.u8()?;
        let kind = NodeKind::from_tag(tag)
            .ok_or_else(|| self.corrupt_at(offset, &format!("unknown node kind {}", tag)))?;

        let data = match kind {
            NodeKind::Element => {
                let name = self.string()?;
                let count = self.count()?;
                let mut attributes = IndexMap::with_capacity(count);
                for _ in 0..count {
                    let key = self.string()?;
                    let value = self.string()?;
                    attributes.insert(key, value);
                }
                NodeData::Element { name, attributes }
            }
            NodeKind::Text => NodeData::Text(self.string()?),
            NodeKind::Data => NodeData::Data(self.string()?),
            NodeKind::Fragment => NodeData::Fragment,
        };

        let count = self.count()?;
        let mut callback_data = Vec::with_capacity(count);
        for _ in 0..count {
            let identifier = self.string()?;
            let payload = self.payload(0)?;
            callback_data.push((identifier, payload));
        }

        let count = self.count()?;
        if count > 0 && matches!(kind, NodeKind::Text | NodeKind::Data) {
            return Err(self.corrupt(&format!("{:?} node with children", kind)));
        }
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            children.push(self.node(depth + 1)?);
        }

        Ok(Node::from_parts(data, callback_data, children))
    }

    fn payload(&mut self, depth: usize) -> Result<Payload> {
        if depth > MAX_DEPTH {
            return Err(ZemlError::DepthExceeded(MAX_DEPTH));
        }
        let offset = self.pos;
        match self.u8()? {
            OP_NULL => Ok(Payload::Null),
            OP_INT => Ok(Payload::Int(self.i64()?)),
            OP_STR => Ok(Payload::Str(self.string()?)),
            OP_LIST => {
                let count = self.count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.payload(depth + 1)?);
                }
                Ok(Payload::List(items))
            }
            OP_MAP => {
                let count = self.count()?;
                let mut map = IndexMap::with_capacity(count);
                for _ in 0..count {
                    let key = self.string()?;
                    map.insert(key, self.payload(depth + 1)?);
                }
                Ok(Payload::Map(map))
            }
            op => Err(self.corrupt_at(offset, &format!("unknown payload opcode {:#04x}", op))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Node {
        let frag = Node::fragment();
        let p = Node::element_with_attrs("p", [("class", "intro"), ("id", "first")]);
        p.children()
            .extend([Node::text_node("Hello "), Node::element("br"), Node::text_node("wörld")])
            .unwrap();
        let span = Node::element("span");
        span.add_render_callback("clock", None::<&str>);
        let mut options = IndexMap::new();
        options.insert("format".to_string(), Payload::from("%H:%M"));
        options.insert(
            "zones".to_string(),
            Payload::List(vec![Payload::from("UTC"), Payload::Int(-5)]),
        );
        span.add_render_callback("clock/zones", Payload::Map(options));
        frag.children()
            .extend([p, span, Node::data_node("<svg></svg>")])
            .unwrap();
        frag
    }

    fn assert_parent_links(node: &Node) {
        for child in node.children().iter() {
            assert_eq!(child.parent().as_ref(), Some(node));
            assert_parent_links(&child);
        }
    }

    #[test]
    fn test_round_trip() {
        let tree = sample();
        let bytes = dump(&tree);
        assert_eq!(&bytes[..4], b"ZEML");
        assert_eq!(bytes[4], FORMAT_VERSION);

        let restored = load(&bytes).unwrap();
        assert!(restored.structurally_eq(&tree));
        assert!(restored.is_root());
        assert_parent_links(&restored);
        assert_eq!(restored.render(), tree.render());
    }

    #[test]
    fn test_empty_tree() {
        assert!(dump(&Node::fragment()).is_empty());
        let empty = load(b"").unwrap();
        assert!(empty.is_fragment());
        assert!(empty.children().is_empty());
        let again = load(&dump(&Node::fragment())).unwrap();
        assert!(again.is_fragment() && again.children().is_empty());
    }

    #[test]
    fn test_non_fragment_root() {
        let div = Node::element_with_attrs("div", [("id", "x")]);
        let restored = load(&dump(&div)).unwrap();
        assert!(restored.is_element());
        assert!(restored.structurally_eq(&div));
    }

    #[test]
    fn test_stable_layout() {
        let frag = Node::fragment();
        frag.children().append(Node::text_node("hi")).unwrap();
        let expected: &[u8] = &[
            b'Z', b'E', b'M', b'L', 1, // header
            3, 0, 0, 0, 0, 0, 0, 0, 1, // fragment, no callbacks, one child
            1, 0, 0, 0, 2, b'h', b'i', 0, 0, 0, 0, 0, 0, 0, 0, // text "hi"
        ];
        assert_eq!(dump(&frag), expected);
    }

    #[test]
    fn test_corrupt_data() {
        let bytes = dump(&sample());
        let cases: Vec<Vec<u8>> = vec![
            b"garbage".to_vec(),
            bytes[..bytes.len() - 3].to_vec(),
            [bytes.clone(), vec![0]].concat(),
            [&bytes[..4], &[9u8][..], &bytes[5..]].concat(),
            [&bytes[..5], &[7u8][..], &bytes[6..]].concat(),
        ];
        for case in cases {
            assert!(
                matches!(load(&case), Err(ZemlError::CorruptSerializedData { .. })),
                "{:?} should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_text_with_children_is_corrupt() {
        let mut bytes = b"ZEML\x01".to_vec();
        bytes.extend_from_slice(&[1, 0, 0, 0, 1, b'x', 0, 0, 0, 0, 0, 0, 0, 1]);
        bytes.extend_from_slice(&[1, 0, 0, 0, 1, b'y', 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            load(&bytes),
            Err(ZemlError::CorruptSerializedData { .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = b"ZEML\x01".to_vec();
        for _ in 0..MAX_DEPTH + 3 {
            // fragment, no callbacks, one child
            bytes.extend_from_slice(&[3, 0, 0, 0, 0, 0, 0, 0, 1]);
        }
        assert!(matches!(load(&bytes), Err(ZemlError::DepthExceeded(_))));
    }

    fn element_chain(levels: usize) -> (Node, Node) {
        let root = Node::fragment();
        let mut deepest = root.clone();
        for _ in 0..levels {
            let div = Node::element("div");
            deepest.children().append(div.clone()).unwrap();
            deepest = div;
        }
        (root, deepest)
    }

    #[test]
    fn test_deepest_elements_load() {
        let (root, deepest) = element_chain(MAX_DEPTH);
        deepest.children().append(Node::text_node("x")).unwrap();
        let mut nested = Payload::from("leaf");
        for _ in 0..MAX_DEPTH {
            nested = Payload::List(vec![nested]);
        }
        deepest.add_render_callback("nested", nested);

        let restored = load(&dump(&root)).unwrap();
        assert!(restored.structurally_eq(&root));
    }

    #[test]
    fn test_too_deep_elements_rejected() {
        let (root, deepest) = element_chain(MAX_DEPTH + 1);
        deepest.children().append(Node::text_node("x")).unwrap();
        assert!(matches!(
            load(&dump(&root)),
            Err(ZemlError::DepthExceeded(MAX_DEPTH))
        ));
    }

    #[derive(Debug, Clone)]
    enum TreeShape {
        Element {
            name: String,
            attrs: Vec<(String, String)>,
            callbacks: Vec<(String, Payload)>,
            children: Vec<TreeShape>,
        },
        Text(String),
        Data(String),
    }

    fn build(shape: &TreeShape) -> Node {
        match shape {
            TreeShape::Element {
                name,
                attrs,
                callbacks,
                children,
            } => {
                let node = Node::element_with_attrs(name, attrs.clone());
                for (identifier, data) in callbacks {
                    node.add_render_callback(identifier, data.clone());
                }
                for child in children {
                    node.children().append(build(child)).unwrap();
                }
                node
            }
            TreeShape::Text(value) => Node::text_node(value.as_str()),
            TreeShape::Data(value) => Node::data_node(value.as_str()),
        }
    }

    fn arb_payload() -> impl Strategy<Value = Payload> {
        let leaf = prop_oneof![
            Just(Payload::Null),
            any::<i64>().prop_map(Payload::Int),
            ".{0,8}".prop_map(Payload::Str),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Payload::List),
                prop::collection::vec(("[a-z]{1,5}", inner), 0..4)
                    .prop_map(|pairs| Payload::Map(pairs.into_iter().collect())),
            ]
        })
    }

    fn arb_tree() -> impl Strategy<Value = TreeShape> {
        let leaf = prop_oneof![
            ".{0,12}".prop_map(TreeShape::Text),
            ".{0,12}".prop_map(TreeShape::Data),
        ];
        leaf.prop_recursive(4, 48, 5, |inner| {
            (
                "[a-z]{1,6}",
                prop::collection::vec(("[a-z:-]{1,6}", ".{0,8}"), 0..3),
                prop::collection::vec(("[a-z/]{1,8}", arb_payload()), 0..2),
                prop::collection::vec(inner, 0..5),
            )
                .prop_map(|(name, attrs, callbacks, children)| TreeShape::Element {
                    name,
                    attrs,
                    callbacks,
                    children,
                })
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(shapes in prop::collection::vec(arb_tree(), 0..4)) {
            let tree = Node::fragment();
            for shape in &shapes {
                tree.children().append(build(shape)).unwrap();
            }
            let restored = load(&dump(&tree)).unwrap();
            prop_assert!(restored.structurally_eq(&tree));
            assert_parent_links(&restored);
        }
    }
}
