//! ZemlService - the main entry point for parsing, rendering and storing
//! documents.

use once_cell::sync::OnceCell;
use zeml_core::{codec, CallbackContext, Node, Renderer, Result, ZemlError};

use crate::config::ParserConfig;
use crate::hooks::Hooks;
use crate::parser::{MarkupParser, Parser};

/// Parses markup into trees and renders them, with plugin hooks on both sides
pub struct ZemlService {
    config: ParserConfig,
    hooks: Hooks,
    renderer: Renderer,
    parser: OnceCell<MarkupParser>,
}

impl ZemlService {
    /// Create a new ZemlService with the default parser configuration
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Create a ZemlService with a custom parser configuration
    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            hooks: Hooks::new(),
            renderer: Renderer::new(),
            parser: OnceCell::new(),
        }
    }

    /// Parse markup into a Fragment-rooted tree.
    ///
    /// An alternate parser picked by a switch hook takes over completely.
    /// Otherwise the cached default parser runs and the tree processors get
    /// to inspect or replace the result.
    pub fn parse(&self, input: &str, reason: &str) -> Result<Node> {
        if let Some(parser) = self.hooks.switch_parser(input, reason) {
            return parser.parse(input, reason);
        }
        let tree = self.parser().parse(input, reason)?;
        Ok(self.hooks.process_tree(tree, input, reason))
    }

    /// Render a tree to markup, resolving node callbacks
    pub fn render(&self, node: &Node) -> String {
        self.renderer.render(node)
    }

    /// Render a node with `inject` in place of its children
    pub fn render_with(&self, node: &Node, inject: &str) -> String {
        self.renderer.render_with(node, Some(inject))
    }

    /// Extract the plain text of a tree, resolving node callbacks
    pub fn text(&self, node: &Node) -> String {
        self.renderer.text(node)
    }

    /// Serialize a tree for storage
    pub fn dump_tree(&self, tree: &Node) -> Vec<u8> {
        codec::dump(tree)
    }

    /// Restore a stored tree.
    ///
    /// Corrupt data yields an empty Fragment so a broken cache entry never
    /// takes a page down. Other failures propagate.
    pub fn load_tree(&self, data: &[u8]) -> Result<Node> {
        match codec::load(data) {
            Err(ZemlError::CorruptSerializedData { offset, reason }) => {
                tracing::warn!(offset, %reason, "discarding corrupt serialized tree");
                Ok(Node::fragment())
            }
            other => other,
        }
    }

    /// Register an alternate parser hook
    pub fn on_switch_parser<F>(&mut self, key: &str, hook: F) -> &mut Self
    where
        F: Fn(&str, &str) -> Option<Box<dyn Parser>> + Send + Sync + 'static,
    {
        self.hooks.add_switch_parser(key, hook);
        self
    }

    /// Register a tree processor, run after the default parser
    pub fn on_process_tree<F>(&mut self, key: &str, hook: F) -> &mut Self
    where
        F: Fn(&Node, &str, &str) -> Option<Node> + Send + Sync + 'static,
    {
        self.hooks.add_process_tree(key, hook);
        self
    }

    /// Register a parser setup hook.
    ///
    /// Setup hooks run when the default parser is built. A hook added after
    /// that only takes effect after [`ZemlService::teardown`].
    pub fn on_setup_parser<F>(&mut self, key: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut ParserConfig) + Send + Sync + 'static,
    {
        if self.parser.get().is_some() {
            tracing::warn!(hook = key, "setup hook registered after the parser was built");
        }
        self.hooks.add_setup_parser(key, hook);
        self
    }

    /// Register a node callback resolver
    pub fn on_node_callback<F>(&mut self, key: &str, resolver: F) -> &mut Self
    where
        F: Fn(&CallbackContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.renderer.add_callback(key, resolver);
        self
    }

    /// Remove the hooks and the node callback registered under `key`
    pub fn remove_hook(&mut self, key: &str) -> bool {
        let hooks = self.hooks.remove(key);
        self.renderer.remove_callback(key) || hooks
    }

    /// Apply a plugin
    pub fn use_plugin<F>(&mut self, plugin: F) -> &mut Self
    where
        F: FnOnce(&mut Self),
    {
        plugin(self);
        self
    }

    /// Drop the cached parser. The next parse rebuilds it and runs the setup
    /// hooks again.
    pub fn teardown(&mut self) {
        if self.parser.take().is_some() {
            tracing::debug!("markup parser released");
        }
    }

    /// Get the base parser configuration
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Get mutable access to the base configuration. Releases the cached
    /// parser.
    pub fn config_mut(&mut self) -> &mut ParserConfig {
        self.teardown();
        &mut self.config
    }

    /// Get the renderer holding the node callbacks
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Get the default parser, building it on first use
    pub fn parser(&self) -> &MarkupParser {
        self.parser.get_or_init(|| {
            let mut config = self.config.clone();
            self.hooks.setup(&mut config);
            tracing::debug!(
                setup_hooks = self.hooks.setup_count(),
                max_depth = config.max_depth,
                "building markup parser"
            );
            MarkupParser::new(config)
        })
    }
}

impl Default for ZemlService {
    fn default() -> Self {
        Self::new()
    }
}
