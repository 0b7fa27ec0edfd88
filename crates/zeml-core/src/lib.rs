//! zeml-core - document tree, queries, rendering and persistence
//!
//! This crate provides the ZEML document model: a small tree of element,
//! text, data and fragment nodes with single-parent ownership, a selector
//! language to find nodes, an HTML renderer with render-time callbacks and a
//! stable binary format for storing parsed documents.
//!
//! Parsing markup into a tree lives in the `zeml` crate.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────┐ query  ┌─────────────┐
//! zeml parser ───▶ │   Node   │ ─────▶ │ QueryResult │
//!                  │   tree   │        └─────────────┘
//!                  └──────────┘
//!                   │       ▲
//!            render │       │ load
//!                   ▼       │
//!              HTML text   bytes ◀── dump
//! ```
//!
//! # Example
//!
//! ```rust
//! use zeml_core::{codec, Node, Renderer};
//!
//! let doc = Node::fragment();
//! let p = Node::element("p");
//! p.children().append(Node::text_node("Hello <World>")).unwrap();
//! doc.children().append(p).unwrap();
//!
//! assert_eq!(doc.render(), "<p>Hello &lt;World&gt;</p>");
//! assert_eq!(doc.text(), "Hello <World>\n\n");
//!
//! let restored = codec::load(&codec::dump(&doc)).unwrap();
//! assert!(restored.structurally_eq(&doc));
//!
//! let renderer = Renderer::new();
//! assert_eq!(renderer.render(&restored), doc.render());
//! ```

pub mod codec;
mod node;
mod payload;
pub mod query;
mod render;
mod utilities;

pub use node::{Children, Node, NodeData, NodeKind};
pub use payload::Payload;
pub use query::{QueryResult, Selector};
pub use render::{CallbackContext, CallbackFn, Renderer};
pub use utilities::*;

/// Maximum nesting depth accepted when building trees from external input.
pub const MAX_DEPTH: usize = 256;

/// Error type for ZEML tree operations
#[derive(Debug, thiserror::Error)]
pub enum ZemlError {
    #[error("Cannot bind {node}: {reason}")]
    OwnershipViolation { node: String, reason: String },

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid query {rule:?}: {reason}")]
    InvalidQuery { rule: String, reason: String },

    #[error("Maximum nesting depth of {0} exceeded")]
    DepthExceeded(usize),

    #[error("Corrupt serialized data at byte {offset}: {reason}")]
    CorruptSerializedData { offset: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, ZemlError>;
