//! Markup parsing.
//!
//! [`MarkupParser`] turns loosely written HTML into a Fragment-rooted tree.
//! It never rejects input: unknown constructs become text, unclosed tags are
//! closed at the end and tags that cannot nest close their open siblings
//! according to the tag classes in [`ParserConfig`].

mod entities;
mod tokenizer;

use std::collections::{HashMap, HashSet};

use zeml_core::{is_self_closing, Node, Result, ZemlError, MAX_DEPTH};

use crate::config::ParserConfig;
pub use entities::decode_entities;
use tokenizer::{tokenize, Token};

/// Anything that can turn markup into a document tree.
///
/// `reason` names what the markup is for (`"post"`, `"comment"`, ...), so
/// parsers may treat sources differently.
pub trait Parser {
    fn parse(&self, input: &str, reason: &str) -> Result<Node>;
}

const LIST_NESTING: &[(&str, &[&str])] = &[
    ("ol", &[]),
    ("ul", &[]),
    ("li", &["ul", "ol"]),
    ("dl", &[]),
    ("dd", &["dl"]),
    ("dt", &["dl"]),
];

const TABLE_NESTING: &[(&str, &[&str])] = &[
    ("table", &[]),
    ("tr", &["table", "tbody", "tfoot", "thead"]),
    ("td", &["tr"]),
    ("th", &["tr"]),
    ("thead", &["table"]),
    ("tbody", &["table"]),
    ("tfoot", &["table"]),
];

/// The default markup parser
#[derive(Debug, Clone)]
pub struct MarkupParser {
    config: ParserConfig,
    /// Tags that may nest, mapped to the open tags that stop implicit closing
    nestable: HashMap<String, Vec<String>>,
    /// Block, list and table tags
    reset_nesting: HashSet<String>,
    /// `config.max_depth`, capped at what the codec can store
    max_depth: usize,
}

impl MarkupParser {
    pub fn new(config: ParserConfig) -> Self {
        let mut nestable: HashMap<String, Vec<String>> = config
            .nestable_inline_tags
            .iter()
            .chain(&config.nestable_block_tags)
            .map(|tag| (tag.clone(), Vec::new()))
            .collect();
        for (tag, triggers) in LIST_NESTING.iter().chain(TABLE_NESTING) {
            let triggers = triggers.iter().map(|t| t.to_string()).collect();
            nestable.insert(tag.to_string(), triggers);
        }

        let reset_nesting = config
            .nestable_block_tags
            .iter()
            .chain(&config.non_nestable_block_tags)
            .cloned()
            .chain(std::iter::once("noscript".to_string()))
            .chain(
                LIST_NESTING
                    .iter()
                    .chain(TABLE_NESTING)
                    .map(|(tag, _)| tag.to_string()),
            )
            .collect();

        Self {
            max_depth: config.max_depth.min(MAX_DEPTH),
            config,
            nestable,
            reset_nesting,
        }
    }

    /// Get the configuration the parser was built with
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Build a tree from markup
    pub fn parse_markup(&self, input: &str) -> Result<Node> {
        let mut builder = TreeBuilder {
            parser: self,
            stack: vec![Node::fragment()],
        };
        for token in tokenize(input, &self.config) {
            builder.feed(token)?;
        }
        Ok(builder.stack.swap_remove(0))
    }
}

impl Default for MarkupParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl Parser for MarkupParser {
    fn parse(&self, input: &str, reason: &str) -> Result<Node> {
        tracing::debug!(reason, bytes = input.len(), "parsing markup");
        self.parse_markup(input)
    }
}

struct TreeBuilder<'a> {
    parser: &'a MarkupParser,
    /// Open nodes, the root fragment first
    stack: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn current(&self) -> &Node {
        &self.stack[self.stack.len() - 1]
    }

    fn feed(&mut self, token: Token) -> Result<()> {
        match token {
            Token::Text(value) => self.current().children().append(Node::text_node(value)),
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                let void = self_closing || is_self_closing(&name);
                if !void {
                    self.smart_pop(&name);
                }
                if self.stack.len() > self.parser.max_depth {
                    return Err(ZemlError::DepthExceeded(self.parser.max_depth));
                }
                let element = Node::element_with_attrs(&name, attrs);
                self.current().children().append(element.clone())?;
                if !void {
                    self.stack.push(element);
                }
                Ok(())
            }
            Token::EndTag(name) => {
                if let Some(idx) = self.find_open(&name) {
                    self.stack.truncate(idx);
                }
                Ok(())
            }
        }
    }

    /// Index of the most recent open element called `name`
    fn find_open(&self, name: &str) -> Option<usize> {
        (1..self.stack.len())
            .rev()
            .find(|&i| self.stack[i].name().as_deref() == Some(name))
    }

    /// Close the open elements a new `name` tag may not live inside.
    fn smart_pop(&mut self, name: &str) {
        let triggers = self.parser.nestable.get(name);
        let resets = self.parser.reset_nesting.contains(name);

        for i in (1..self.stack.len()).rev() {
            let Some(open) = self.stack[i].name() else {
                continue;
            };
            if triggers.is_none() && open == name {
                self.stack.truncate(i);
                return;
            }
            let stops = match triggers {
                Some(triggers) => triggers.iter().any(|t| *t == open),
                None => resets && self.parser.reset_nesting.contains(&open),
            };
            if stops {
                self.stack.truncate(i + 1);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Node {
        MarkupParser::default().parse(input, "test").unwrap()
    }

    #[test]
    fn test_root_is_fragment() {
        let tree = parse("Hello <b>World</b>");
        assert!(tree.is_fragment());
        assert_eq!(tree.render(), "Hello <b>World</b>");
        assert!(parse("").is_fragment());
    }

    #[test]
    fn test_unclosed_tags_close_at_end() {
        assert_eq!(parse("<div><em>x").render(), "<div><em>x</em></div>");
    }

    #[test]
    fn test_paragraphs_close_each_other() {
        assert_eq!(parse("<p>a<p>b").render(), "<p>a</p><p>b</p>");
        assert_eq!(
            parse("<div><p>a<div>b<p>c</div>").render(),
            "<div><p>a<div>b<p>c</p></div></p></div>"
        );
    }

    #[test]
    fn test_non_nestable_inline() {
        assert_eq!(parse("<b>a<b>b").render(), "<b>a</b><b>b</b>");
        assert_eq!(parse("<span>a<span>b").render(), "<span>a<span>b</span></span>");
    }

    #[test]
    fn test_list_items() {
        assert_eq!(
            parse("<ul><li>a<li>b<ul><li>c</ul></ul>").render(),
            "<ul><li>a</li><li>b<ul><li>c</li></ul></li></ul>"
        );
    }

    #[test]
    fn test_table_cells() {
        assert_eq!(
            parse("<table><tr><td>1<td>2<tr><td>3</table>").render(),
            "<table><tr><td>1</td><td>2</td></tr><tr><td>3</td></tr></table>"
        );
    }

    #[test]
    fn test_stray_end_tags_ignored() {
        assert_eq!(parse("a</div>b<br></br>").render(), "ab<br>");
        let tree = parse("a</div>b");
        assert_eq!(tree.children().len(), 2);
    }

    #[test]
    fn test_self_closing_never_opens() {
        assert_eq!(
            parse("<p>a<br>b<img src=\"x.png\">c").render(),
            "<p>a<br>b<img src=\"x.png\">c</p>"
        );
    }

    #[test]
    fn test_isolated_tags() {
        let tree = parse("<pre><b>&amp;</b></pre><p>x");
        let pre = tree.children().get(0).unwrap();
        assert_eq!(pre.children().len(), 1);
        assert_eq!(pre.children().get(0).unwrap().value().unwrap(), "<b>&amp;</b>");
    }

    #[test]
    fn test_entities_decoded() {
        let tree = parse("<a title=\"&quot;x&quot;\">&copy; 2008</a>");
        let a = tree.children().get(0).unwrap();
        assert_eq!(a.attr("title").unwrap(), "\"x\"");
        assert_eq!(a.text(), "\u{a9} 2008");
    }

    #[test]
    fn test_parent_links() {
        let tree = parse("<div><p>x</p></div>");
        let x = tree.query("#").unwrap().first().unwrap();
        assert_eq!(x.depth(), 3);
        assert_eq!(x.parent().unwrap().name().unwrap(), "p");
    }

    #[test]
    fn test_depth_limit() {
        let config = ParserConfig {
            max_depth: 3,
            ..ParserConfig::default()
        };
        let parser = MarkupParser::new(config);
        assert!(parser.parse_markup("<div><div><div>x</div></div></div>").is_ok());
        let err = parser
            .parse_markup("<div><div><div><div>x</div></div></div></div>")
            .unwrap_err();
        assert!(matches!(err, ZemlError::DepthExceeded(3)));
    }

    #[test]
    fn test_depth_limit_is_capped() {
        let config = ParserConfig {
            max_depth: MAX_DEPTH + 10,
            ..ParserConfig::default()
        };
        let parser = MarkupParser::new(config);
        let deeper = "<div>".repeat(MAX_DEPTH + 1);
        assert!(matches!(
            parser.parse_markup(&deeper),
            Err(ZemlError::DepthExceeded(MAX_DEPTH))
        ));
        assert!(parser.parse_markup(&"<div>".repeat(MAX_DEPTH)).is_ok());
    }

    #[test]
    fn test_many_isolated_siblings() {
        let tree = parse(&"<pre>x</pre>".repeat(20_000));
        assert_eq!(tree.children().len(), 20_000);
        assert_eq!(tree.children().get(19_999).unwrap().text(), "x");
    }

    #[test]
    fn test_custom_tag_classes() {
        let mut config = ParserConfig::default();
        config.nestable_inline_tags.push("b".to_string());
        let parser = MarkupParser::new(config);
        let tree = parser.parse_markup("<b>a<b>b").unwrap();
        assert_eq!(tree.render(), "<b>a<b>b</b></b>");
    }
}
