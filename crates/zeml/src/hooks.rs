//! Extension points for plugins.
//!
//! Hooks are stored under a key so a plugin can replace or remove what it
//! registered. Within each registry they run in registration order.

use indexmap::IndexMap;
use zeml_core::Node;

use crate::config::ParserConfig;
use crate::parser::Parser;

/// Picks an alternate parser for `(input, reason)`
pub type SwitchParserFn = Box<dyn Fn(&str, &str) -> Option<Box<dyn Parser>> + Send + Sync>;

/// Inspects or rewrites a freshly parsed tree, given `(tree, input, reason)`
pub type ProcessTreeFn = Box<dyn Fn(&Node, &str, &str) -> Option<Node> + Send + Sync>;

/// Adjusts the parser configuration before the default parser is built
pub type SetupParserFn = Box<dyn Fn(&mut ParserConfig) + Send + Sync>;

/// Registered hook functions
#[derive(Default)]
pub struct Hooks {
    switch_parser: IndexMap<String, SwitchParserFn>,
    process_tree: IndexMap<String, ProcessTreeFn>,
    setup_parser: IndexMap<String, SetupParserFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_switch_parser<F>(&mut self, key: &str, hook: F)
    where
        F: Fn(&str, &str) -> Option<Box<dyn Parser>> + Send + Sync + 'static,
    {
        self.switch_parser.insert(key.to_string(), Box::new(hook));
    }

    pub fn add_process_tree<F>(&mut self, key: &str, hook: F)
    where
        F: Fn(&Node, &str, &str) -> Option<Node> + Send + Sync + 'static,
    {
        self.process_tree.insert(key.to_string(), Box::new(hook));
    }

    pub fn add_setup_parser<F>(&mut self, key: &str, hook: F)
    where
        F: Fn(&mut ParserConfig) + Send + Sync + 'static,
    {
        self.setup_parser.insert(key.to_string(), Box::new(hook));
    }

    /// Remove every hook registered under `key`. Returns true if any existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let switch = self.switch_parser.shift_remove(key).is_some();
        let process = self.process_tree.shift_remove(key).is_some();
        let setup = self.setup_parser.shift_remove(key).is_some();
        switch || process || setup
    }

    /// Ask the switch hooks for an alternate parser. The first answer wins.
    pub fn switch_parser(&self, input: &str, reason: &str) -> Option<Box<dyn Parser>> {
        self.switch_parser.iter().find_map(|(key, hook)| {
            let parser = hook(input, reason)?;
            tracing::trace!(hook = %key, reason, "alternate parser selected");
            Some(parser)
        })
    }

    /// Run every tree processor over `tree`.
    ///
    /// Processors may mutate the tree in place. The first one returning a
    /// replacement decides the result, but later processors still run on the
    /// original tree.
    pub fn process_tree(&self, tree: Node, input: &str, reason: &str) -> Node {
        let mut replacement = None;
        for (key, hook) in &self.process_tree {
            if let Some(node) = hook(&tree, input, reason) {
                if replacement.is_none() {
                    tracing::trace!(hook = %key, reason, "tree replaced");
                    replacement = Some(node);
                }
            }
        }
        replacement.unwrap_or(tree)
    }

    /// Run every setup hook over `config`
    pub fn setup(&self, config: &mut ParserConfig) {
        for hook in self.setup_parser.values() {
            hook(config);
        }
    }

    pub fn setup_count(&self) -> usize {
        self.setup_parser.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MarkupParser;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Constant(&'static str);

    impl Parser for Constant {
        fn parse(&self, _input: &str, _reason: &str) -> zeml_core::Result<Node> {
            let frag = Node::fragment();
            frag.children().append(Node::text_node(self.0))?;
            Ok(frag)
        }
    }

    #[test]
    fn test_switch_parser_first_answer_wins() {
        let mut hooks = Hooks::new();
        hooks.add_switch_parser("skip", |_, _| None);
        hooks.add_switch_parser(
            "plain",
            |_, reason| (reason == "comment").then(|| Box::new(Constant("first")) as Box<dyn Parser>),
        );
        hooks.add_switch_parser("other", |_, _| {
            Some(Box::new(Constant("second")) as Box<dyn Parser>)
        });

        let parser = hooks.switch_parser("x", "comment").unwrap();
        assert_eq!(parser.parse("x", "comment").unwrap().text(), "first");
        let parser = hooks.switch_parser("x", "post").unwrap();
        assert_eq!(parser.parse("x", "post").unwrap().text(), "second");
    }

    #[test]
    fn test_process_tree_runs_all() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut hooks = Hooks::new();
        for key in ["a", "b", "c"] {
            let calls = Arc::clone(&calls);
            hooks.add_process_tree(key, move |_, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                (key != "a").then(|| Node::text_node(key))
            });
        }

        let tree = hooks.process_tree(Node::fragment(), "", "post");
        assert_eq!(tree.value().unwrap(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_process_tree_mutates_in_place() {
        let mut hooks = Hooks::new();
        hooks.add_process_tree("strip", |tree, _, _| {
            for node in &tree.query("*[@class]").ok()? {
                node.remove_attr("class");
            }
            None
        });
        let tree = MarkupParser::default()
            .parse_markup("<p class=\"x\">a</p>")
            .unwrap();
        let tree = hooks.process_tree(tree, "", "post");
        assert_eq!(tree.render(), "<p>a</p>");
    }

    #[test]
    fn test_remove_by_key() {
        let mut hooks = Hooks::new();
        hooks.add_setup_parser("plugin", |config| config.max_depth = 1);
        hooks.add_process_tree("plugin", |_, _, _| None);
        assert!(hooks.remove("plugin"));
        assert!(!hooks.remove("plugin"));

        let mut config = ParserConfig::default();
        hooks.setup(&mut config);
        assert_eq!(config, ParserConfig::default());
    }
}
