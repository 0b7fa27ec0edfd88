//! HTML5 parsing support.
//!
//! [`Html5Parser`] runs input through html5ever (via scraper) and converts the
//! result into the same Fragment-rooted tree the default parser produces.
//! Register it with a switch hook for sources that need standards-compliant
//! error recovery.

use scraper::{ElementRef, Html, Node as ScraperNode};
use zeml_core::{Node, Result, ZemlError, MAX_DEPTH};

use crate::parser::Parser;

/// Alternate parser backed by html5ever.
///
/// # Example
///
/// ```rust
/// use zeml::{Html5Parser, Parser, ZemlService};
///
/// let mut service = ZemlService::new();
/// service.on_switch_parser("html5", |_, reason| {
///     (reason == "import").then(|| Box::new(Html5Parser::default()) as Box<dyn Parser>)
/// });
///
/// let tree = service.parse("<table><td>cell</table>", "import").unwrap();
/// assert_eq!(
///     service.render(&tree),
///     "<table><tbody><tr><td>cell</td></tr></tbody></table>"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Html5Parser {
    max_depth: usize,
}

impl Html5Parser {
    /// Create a parser accepting `max_depth` levels of element nesting,
    /// capped at [`MAX_DEPTH`]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.min(MAX_DEPTH),
        }
    }

    /// Convert the children of a scraper element into `target`
    fn convert_children(
        &self,
        element: ElementRef<'_>,
        target: &Node,
        depth: usize,
    ) -> Result<()> {
        for child in element.children() {
            match child.value() {
                ScraperNode::Text(text) => {
                    target.children().append(Node::text_node(&*text.text))?;
                }
                ScraperNode::Element(_) => {
                    let Some(child_element) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if depth > self.max_depth {
                        return Err(ZemlError::DepthExceeded(self.max_depth));
                    }
                    let value = child_element.value();
                    let node = Node::element_with_attrs(value.name(), value.attrs());
                    target.children().append(node.clone())?;
                    self.convert_children(child_element, &node, depth + 1)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for Html5Parser {
    fn default() -> Self {
        Self::new(MAX_DEPTH)
    }
}

impl Parser for Html5Parser {
    fn parse(&self, input: &str, reason: &str) -> Result<Node> {
        tracing::debug!(reason, bytes = input.len(), "parsing html5 fragment");
        let document = Html::parse_fragment(input);
        let root = Node::fragment();
        self.convert_children(document.root_element(), &root, 1)?;
        Ok(root)
    }
}
