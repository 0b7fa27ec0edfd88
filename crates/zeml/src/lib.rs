//! # zeml
//!
//! Parse blog markup into a queryable document tree and render it back.
//!
//! The tree itself, queries, rendering and the storage format live in
//! `zeml-core` and are re-exported here. This crate adds the tolerant
//! [`MarkupParser`] and [`ZemlService`], which wires the parser, the renderer
//! and plugin hooks together. [`PlainTextParser`] is an alternate parser for
//! text without markup and [`Sanitizer`] cleans trees from untrusted authors.
//!
//! ## Hooks
//!
//! - switch parser: pick an alternate [`Parser`] for some input or reason
//! - process tree: inspect, mutate or replace freshly parsed trees
//! - setup parser: adjust [`ParserConfig`] before the parser is built
//! - node callback: produce dynamic output for nodes at render time
//!
//! ## Example
//!
//! ```rust
//! use zeml::ZemlService;
//!
//! let mut service = ZemlService::new();
//! service
//!     .on_process_tree("greeting", |tree, _, _| {
//!         for node in &tree.query("span[class=name]").ok()? {
//!             node.add_render_callback("visitor", "Guest");
//!         }
//!         None
//!     })
//!     .on_node_callback("greeting", |ctx| {
//!         let name = ctx.data.as_str()?;
//!         match (ctx.identifier, ctx.text_only) {
//!             ("visitor", true) => Some(name.to_string()),
//!             ("visitor", false) => Some(ctx.renderer.render_with(ctx.node, Some(name))),
//!             _ => None,
//!         }
//!     });
//!
//! let tree = service
//!     .parse("<p>Hello <span class=name>you</span>", "post")
//!     .unwrap();
//! assert_eq!(
//!     service.render(&tree),
//!     "<p>Hello <span class=\"name\">Guest</span></p>"
//! );
//!
//! // Stored trees keep their callbacks
//! let restored = service.load_tree(&service.dump_tree(&tree)).unwrap();
//! assert_eq!(service.text(&restored), "Hello Guest\n\n");
//! ```

mod config;
mod hooks;
#[cfg(feature = "html")]
pub mod html;
pub mod parser;
mod plain;
mod sanitize;
mod service;

pub use config::ParserConfig;
pub use hooks::{Hooks, ProcessTreeFn, SetupParserFn, SwitchParserFn};
#[cfg(feature = "html")]
pub use html::Html5Parser;
pub use parser::{decode_entities, MarkupParser, Parser};
pub use plain::PlainTextParser;
pub use sanitize::{sanitize_comments, Sanitizer};
pub use service::ZemlService;

pub use zeml_core::{
    codec, query, CallbackContext, CallbackFn, Children, Node, NodeData, NodeKind, Payload,
    QueryResult, Renderer, Result, Selector, ZemlError, MAX_DEPTH,
};
