//! Markup rendering and text extraction with render-time callbacks.
//!
//! Collaborators attach callback identifiers to nodes (see
//! [`Node::add_render_callback`]) and register resolver functions on a
//! [`Renderer`]. When the renderer reaches a node with callbacks, every
//! `(identifier, data)` pair is offered to every resolver in order and the
//! first `Some` replaces the node's normal output. This keeps the stored tree
//! static while still allowing dynamic content.

use indexmap::IndexMap;

use crate::node::{Node, NodeData};
use crate::payload::Payload;
use crate::utilities::{escape_attr, escape_text, is_self_closing};

/// Type alias for node callback resolvers
pub type CallbackFn = Box<dyn Fn(&CallbackContext<'_>) -> Option<String> + Send + Sync>;

/// What a resolver gets to see when a callback node is rendered
pub struct CallbackContext<'a> {
    /// The identifier passed to `add_render_callback`
    pub identifier: &'a str,
    /// The data passed alongside the identifier
    pub data: &'a Payload,
    /// The node being rendered
    pub node: &'a Node,
    /// True during text extraction, false during markup rendering
    pub text_only: bool,
    /// The renderer, for resolvers that render the node themselves
    pub renderer: &'a Renderer,
}

/// Renders trees to markup or plain text.
///
/// Rendering recurses once per tree level. Parsed and loaded trees are at
/// most [`MAX_DEPTH`](crate::MAX_DEPTH) elements deep.
#[derive(Default)]
pub struct Renderer {
    callbacks: IndexMap<String, CallbackFn>,
}

impl Renderer {
    /// Create a renderer without callback resolvers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback resolver under `key`. Resolvers run in
    /// registration order; registering a key again replaces the resolver in
    /// place.
    pub fn add_callback<F>(&mut self, key: &str, resolver: F) -> &mut Self
    where
        F: Fn(&CallbackContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.callbacks.insert(key.to_string(), Box::new(resolver));
        self
    }

    /// Builder form of [`Renderer::add_callback`]
    pub fn with_callback<F>(mut self, key: &str, resolver: F) -> Self
    where
        F: Fn(&CallbackContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.add_callback(key, resolver);
        self
    }

    /// Remove the resolver registered under `key`
    pub fn remove_callback(&mut self, key: &str) -> bool {
        self.callbacks.shift_remove(key).is_some()
    }

    /// Render a node to markup
    pub fn render(&self, node: &Node) -> String {
        self.render_with(node, None)
    }

    /// Render a node to markup.
    ///
    /// For element nodes, `inject` replaces the rendered children and skips
    /// the callback lookup for this node. Self-closing elements ignore it.
    pub fn render_with(&self, node: &Node, inject: Option<&str>) -> String {
        let mut out = String::new();
        self.render_into(node, inject, &mut out);
        out
    }

    /// Extract the plain text of a node
    pub fn text(&self, node: &Node) -> String {
        let mut out = String::new();
        self.text_into(node, &mut out);
        out
    }

    fn render_into(&self, node: &Node, inject: Option<&str>, out: &mut String) {
        if node.is_element() && inject.is_none() {
            if let Some(rv) = self.resolve_callback(node, false) {
                out.push_str(&rv);
                return;
            }
        }

        let (name, children) = {
            let inner = node.inner();
            match &inner.data {
                NodeData::Text(value) => {
                    out.push_str(&escape_text(value));
                    return;
                }
                NodeData::Data(value) => {
                    out.push_str(value);
                    return;
                }
                NodeData::Fragment => (None, inner.children.clone()),
                NodeData::Element { name, attributes } => {
                    out.push('<');
                    out.push_str(name);
                    for (key, value) in attributes {
                        out.push(' ');
                        out.push_str(key);
                        out.push_str("=\"");
                        out.push_str(&escape_attr(value));
                        out.push('"');
                    }
                    out.push('>');
                    if is_self_closing(name) {
                        return;
                    }
                    (Some(name.clone()), inner.children.clone())
                }
            }
        };

        match (inject, &name) {
            (Some(text), Some(_)) => out.push_str(text),
            _ => {
                for child in &children {
                    self.render_into(child, None, out);
                }
            }
        }

        if let Some(name) = name {
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        }
    }

    fn text_into(&self, node: &Node, out: &mut String) {
        let (name, children) = {
            let inner = node.inner();
            match &inner.data {
                NodeData::Text(value) => {
                    out.push_str(value);
                    return;
                }
                NodeData::Data(_) => return,
                NodeData::Fragment => (None, inner.children.clone()),
                NodeData::Element { name, .. } => (Some(name.clone()), inner.children.clone()),
            }
        };

        if let Some(rv) = self.resolve_callback(node, true) {
            out.push_str(&rv);
            return;
        }

        // <br> thingies are linebreaks
        if name.as_deref() == Some("br") {
            out.push('\n');
            return;
        }
        for child in &children {
            self.text_into(child, out);
        }
        if name.as_deref() == Some("p") {
            out.push_str("\n\n");
        }
    }

    fn resolve_callback(&self, node: &Node, text_only: bool) -> Option<String> {
        if self.callbacks.is_empty() {
            return None;
        }
        // resolvers may mutate the node, so hold no borrow while they run
        let callback_data = node.callback_data();
        for (identifier, data) in &callback_data {
            let ctx = CallbackContext {
                identifier,
                data,
                node,
                text_only,
                renderer: self,
            };
            if let Some(rv) = self.callbacks.values().find_map(|resolver| resolver(&ctx)) {
                return Some(rv);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph() -> Node {
        let p = Node::element("p");
        p.children()
            .extend([Node::text_node("a"), Node::element("br"), Node::text_node("b")])
            .unwrap();
        p
    }

    #[test]
    fn test_render_element() {
        let a = Node::element_with_attrs("a", [("href", "/x?a=1&b=2"), ("title", "say \"hi\"")]);
        a.children().append(Node::text_node("Link <here>")).unwrap();
        assert_eq!(
            a.render(),
            "<a href=\"/x?a=1&amp;b=2\" title=\"say &quot;hi&quot;\">Link &lt;here&gt;</a>"
        );
    }

    #[test]
    fn test_render_fragment_and_data() {
        let frag = Node::fragment();
        frag.children()
            .extend([Node::data_node("<svg/>"), Node::text_node("1 < 2")])
            .unwrap();
        assert_eq!(frag.render(), "<svg/>1 &lt; 2");
    }

    #[test]
    fn test_self_closing_never_renders_children() {
        let br = Node::element_with_attrs("br", [("class", "x")]);
        br.children().append(Node::text_node("ignored")).unwrap();
        assert_eq!(br.render(), "<br class=\"x\">");
        assert_eq!(br.render_with("HELLO"), "<br class=\"x\">");
    }

    #[test]
    fn test_inject_bypasses_children() {
        let span = Node::element_with_attrs("span", [("id", "clock")]);
        span.children().append(Node::text_node("time goes here")).unwrap();
        assert_eq!(span.render_with("HELLO"), "<span id=\"clock\">HELLO</span>");
        assert_eq!(span.children().len(), 1);
    }

    #[test]
    fn test_inject_skips_callbacks() {
        let span = Node::element("span");
        span.add_render_callback("any", None::<&str>);
        let renderer = Renderer::new().with_callback("x", |_| Some("X".to_string()));
        assert_eq!(renderer.render_with(&span, Some("HELLO")), "<span>HELLO</span>");
    }

    #[test]
    fn test_text_extraction() {
        let frag = Node::fragment();
        frag.children().append(paragraph()).unwrap();
        frag.children().append(Node::data_node("<hr>")).unwrap();
        assert_eq!(frag.text(), "a\nb\n\n");
    }

    #[test]
    fn test_callback_short_circuit() {
        let span = Node::element("span");
        span.children().append(Node::text_node("static")).unwrap();
        span.add_render_callback("first", None::<&str>);
        span.add_render_callback("second", None::<&str>);

        let renderer = Renderer::new().with_callback("second", |ctx| match ctx.identifier {
            "second" => Some("X".to_string()),
            _ => None,
        });
        assert_eq!(renderer.render(&span), "X");
    }

    #[test]
    fn test_callback_receives_context() {
        let span = Node::element_with_attrs("span", [("data-city", "berlin")]);
        span.add_render_callback("weather", "celsius");

        let renderer = Renderer::new().with_callback("weather", |ctx| {
            if ctx.identifier != "weather" {
                return None;
            }
            let unit = ctx.data.as_str().unwrap_or("?");
            let city = ctx.node.attr("data-city").unwrap_or_default();
            if ctx.text_only {
                return Some(format!("{} in {}", city, unit));
            }
            let injected = format!("{}:{}", city, unit);
            Some(ctx.renderer.render_with(ctx.node, Some(injected.as_str())))
        });

        assert_eq!(
            renderer.render(&span),
            "<span data-city=\"berlin\">berlin:celsius</span>"
        );
        assert_eq!(renderer.text(&span), "berlin in celsius");
    }

    #[test]
    fn test_callback_may_mutate_node() {
        let span = Node::element_with_attrs("span", [("tp:contents", "clock")]);
        span.add_render_callback("clock", None::<&str>);
        let renderer = Renderer::new().with_callback("clock", |ctx| {
            ctx.node.remove_attr("tp:contents");
            Some(ctx.node.render_with("12:00"))
        });
        assert_eq!(renderer.render(&span), "<span>12:00</span>");
    }

    #[test]
    fn test_callbacks_on_nested_nodes() {
        let div = Node::element("div");
        let inner = Node::element("em");
        inner.add_render_callback("shout", None::<&str>);
        div.children().append(inner).unwrap();

        let renderer = Renderer::new().with_callback("shout", |_| Some("!".to_string()));
        assert_eq!(renderer.render(&div), "<div>!</div>");
        assert_eq!(div.render(), "<div><em></em></div>");
    }

    #[test]
    fn test_keyed_callbacks() {
        let span = Node::element("span");
        span.add_render_callback("mood", None::<&str>);

        let mut renderer = Renderer::new();
        renderer
            .add_callback("happy", |_| Some(":)".to_string()))
            .add_callback("sad", |_| Some(":(".to_string()));
        assert_eq!(renderer.render(&span), ":)");

        renderer.add_callback("happy", |_| None);
        assert_eq!(renderer.render(&span), ":(");

        assert!(renderer.remove_callback("sad"));
        assert!(!renderer.remove_callback("sad"));
        assert_eq!(renderer.render(&span), "<span></span>");
    }
}
