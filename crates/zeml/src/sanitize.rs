//! Sanitizing untrusted trees.
//!
//! Comments and other user supplied markup go through a [`Sanitizer`] before
//! they are stored. Elements outside the whitelist are unwrapped (their
//! children take their place), unknown attributes are dropped, links must use
//! a known protocol and inline styles are reduced to harmless properties.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use zeml_core::{Node, NodeKind, Result};

use crate::service::ZemlService;

const ACCEPTABLE_ELEMENTS: &[&str] = &[
    "a", "abbr", "acronym", "address", "area", "b", "big", "blockquote", "br", "button",
    "caption", "center", "cite", "code", "col", "colgroup", "dd", "del", "dfn", "dir", "div",
    "dl", "dt", "em", "fieldset", "font", "form", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "img", "input", "ins", "kbd", "label", "legend", "li", "map", "menu", "ol",
    "optgroup", "option", "p", "pre", "q", "s", "samp", "select", "small", "span", "strike",
    "strong", "sub", "sup", "table", "tbody", "td", "textarea", "tfoot", "th", "thead", "tr",
    "tt", "u", "ul", "var",
];

const ACCEPTABLE_ATTRIBUTES: &[&str] = &[
    "abbr", "accept", "accept-charset", "accesskey", "action", "align", "alt", "axis",
    "border", "cellpadding", "cellspacing", "char", "charoff", "charset", "checked", "cite",
    "class", "clear", "cols", "colspan", "color", "compact", "coords", "datetime", "dir",
    "disabled", "enctype", "for", "frame", "headers", "height", "href", "hreflang", "hspace",
    "id", "ismap", "label", "lang", "longdesc", "maxlength", "media", "method", "multiple",
    "name", "nohref", "noshade", "nowrap", "prompt", "readonly", "rel", "rev", "rows",
    "rowspan", "rules", "scope", "selected", "shape", "size", "span", "src", "start", "style",
    "summary", "tabindex", "target", "title", "type", "usemap", "valign", "value", "vspace",
    "width",
];

const URI_ATTRIBUTES: &[&str] = &["href", "src", "cite", "action", "longdesc"];

const ACCEPTABLE_CSS_PROPERTIES: &[&str] = &[
    "azimuth", "background-color", "border-bottom-color", "border-collapse", "border-color",
    "border-left-color", "border-right-color", "border-top-color", "clear", "color", "cursor",
    "direction", "display", "elevation", "float", "font", "font-family", "font-size",
    "font-style", "font-variant", "font-weight", "height", "letter-spacing", "line-height",
    "overflow", "pause", "pause-after", "pause-before", "pitch", "pitch-range", "richness",
    "speak", "speak-header", "speak-numeral", "speak-punctuation", "speech-rate", "stress",
    "text-align", "text-decoration", "text-indent", "unicode-bidi", "vertical-align",
    "voice-family", "volume", "white-space", "width",
];

const ACCEPTABLE_CSS_KEYWORDS: &[&str] = &[
    "auto", "aqua", "black", "block", "blue", "bold", "both", "bottom", "brown", "center",
    "collapse", "dashed", "dotted", "fuchsia", "gray", "green", "!important", "italic",
    "left", "lime", "maroon", "medium", "none", "navy", "normal", "nowrap", "olive",
    "pointer", "purple", "red", "right", "solid", "silver", "teal", "top", "transparent",
    "underline", "white", "yellow",
];

const ACCEPTABLE_PROTOCOLS: &[&str] = &[
    "ed2k", "ftp", "http", "https", "irc", "mailto", "news", "gopher", "nntp", "telnet",
    "webcal", "xmpp", "callto", "feed", "urn", "aim", "rsync", "tag", "ssh", "sftp", "rtsp",
    "afs", "git", "msn",
];

/// Shorthand prefixes whose values are checked keyword by keyword
const CSS_SHORTHANDS: &[&str] = &["background", "border", "margin", "padding"];

static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"url\s*\(\s*[^\s)]+?\s*\)\s*").expect("valid css url regex"));

static CSS_SANITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:[:,;#%.\sa-zA-Z0-9!]|[0-9A-Za-z_]-[0-9A-Za-z_]|'[\s0-9A-Za-z_]+'|"[\s0-9A-Za-z_]+"|\([\d,\s]+\))*$"#,
    )
    .expect("valid css sanity regex")
});

static CSS_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([-\w]+)\s*:\s*([^:;]*)").expect("valid css pair regex"));

static CSS_UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:#[0-9a-f]+|rgb\(\d+%?,\d*%?,?\d*%?\)?|\d{0,2}\.?\d{0,2}(?:cm|em|ex|in|mm|pc|pt|px|%|,|\))?)$",
    )
    .expect("valid css unit regex")
});

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Whitelist based tree cleaner.
///
/// The lists are public so plugins can widen or narrow them.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    pub acceptable_elements: HashSet<String>,
    pub acceptable_attributes: HashSet<String>,
    /// Attributes holding URIs, checked against `acceptable_protocols`
    pub uri_attributes: HashSet<String>,
    pub acceptable_css_properties: HashSet<String>,
    pub acceptable_css_keywords: HashSet<String>,
    pub acceptable_protocols: HashSet<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            acceptable_elements: set(ACCEPTABLE_ELEMENTS),
            acceptable_attributes: set(ACCEPTABLE_ATTRIBUTES),
            uri_attributes: set(URI_ATTRIBUTES),
            acceptable_css_properties: set(ACCEPTABLE_CSS_PROPERTIES),
            acceptable_css_keywords: set(ACCEPTABLE_CSS_KEYWORDS),
            acceptable_protocols: set(ACCEPTABLE_PROTOCOLS),
        }
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clean the subtree below `node` in place.
    ///
    /// Data nodes become text nodes so their markup is escaped on output.
    pub fn sanitize(&self, node: &Node) -> Result<()> {
        let mut kept = Vec::new();
        for child in node.children().clear() {
            self.sanitize(&child)?;
            match child.kind() {
                NodeKind::Text => kept.push(child),
                NodeKind::Data => {
                    kept.push(Node::text_node(child.value().unwrap_or_default()));
                }
                NodeKind::Fragment => kept.extend(child.children().clear()),
                NodeKind::Element => {
                    let allowed = child
                        .name()
                        .is_some_and(|name| self.acceptable_elements.contains(&name));
                    if allowed {
                        self.clean_attributes(&child)?;
                        kept.push(child);
                    } else {
                        tracing::trace!(element = ?child.name(), "unwrapping element");
                        kept.extend(child.children().clear());
                    }
                }
            }
        }
        node.children().extend(kept)
    }

    fn clean_attributes(&self, element: &Node) -> Result<()> {
        for (key, value) in element.attributes() {
            let rejected = !self.acceptable_attributes.contains(&key)
                || (self.uri_attributes.contains(&key) && !self.is_allowed_uri(&value));
            if rejected {
                element.remove_attr(&key);
            }
        }
        if let Some(style) = element.attr("style") {
            let clean = self.clean_css(&style);
            if clean.is_empty() {
                element.remove_attr("style");
            } else {
                element.set_attr("style", &clean)?;
            }
        }
        Ok(())
    }

    /// Check the scheme of a URI. Relative URIs have none and pass.
    ///
    /// Whitespace and control characters are ignored when looking for the
    /// scheme, as browsers do.
    pub fn is_allowed_uri(&self, uri: &str) -> bool {
        let compact: String = uri
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect();
        match compact.find([':', '/', '?', '#']) {
            Some(pos) if compact[pos..].starts_with(':') => self
                .acceptable_protocols
                .contains(&compact[..pos].to_ascii_lowercase()),
            _ => true,
        }
    }

    /// Reduce an inline style to whitelisted declarations.
    ///
    /// Returns an empty string when nothing survives.
    pub fn clean_css(&self, css: &str) -> String {
        let css = CSS_URL_RE.replace_all(css, " ");
        if !CSS_SANITY_RE.is_match(&css) {
            return String::new();
        }

        let mut clean = Vec::new();
        for caps in CSS_PAIR_RE.captures_iter(&css) {
            let property = &caps[1];
            let value = caps[2].trim();
            if value.is_empty() {
                continue;
            }
            let lower = property.to_ascii_lowercase();
            let shorthand = lower.split('-').next().unwrap_or_default();
            let accepted = self.acceptable_css_properties.contains(&lower)
                || (CSS_SHORTHANDS.contains(&shorthand)
                    && value.split_whitespace().all(|keyword| {
                        self.acceptable_css_keywords.contains(keyword)
                            || CSS_UNIT_RE.is_match(keyword)
                    }));
            if accepted {
                clean.push(format!("{}: {}", property, value));
            }
        }
        clean.join("; ")
    }
}

/// Plugin that sanitizes every tree parsed with the reason `"comment"`.
///
/// ```rust
/// use zeml::{sanitize_comments, ZemlService};
///
/// let mut service = ZemlService::new();
/// service.use_plugin(sanitize_comments);
///
/// let tree = service
///     .parse("<p onclick=\"x()\">hi<script>alert(1)</script></p>", "comment")
///     .unwrap();
/// assert_eq!(service.render(&tree), "<p>hialert(1)</p>");
/// ```
pub fn sanitize_comments(service: &mut ZemlService) {
    service.on_process_tree("sanitize", |tree, _, reason| {
        if reason != "comment" {
            return None;
        }
        match Sanitizer::default().sanitize(tree) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(error = %err, "sanitizing failed, dropping the tree");
                Some(Node::fragment())
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MarkupParser;

    fn clean(input: &str) -> String {
        let tree = MarkupParser::default().parse_markup(input).unwrap();
        Sanitizer::default().sanitize(&tree).unwrap();
        tree.render()
    }

    #[test]
    fn test_unwraps_unknown_elements() {
        assert_eq!(
            clean("<p>a <blink>b <em>c</em></blink> d</p>"),
            "<p>a b <em>c</em> d</p>"
        );
        assert_eq!(clean("<iframe src=\"x\">inner</iframe>"), "inner");
    }

    #[test]
    fn test_isolated_content_is_escaped() {
        assert_eq!(
            clean("<script>alert(\"<b>\")</script>"),
            "alert(\"&lt;b&gt;\")"
        );
    }

    #[test]
    fn test_data_nodes_become_text() {
        let frag = Node::fragment();
        frag.children().append(Node::data_node("<img src=x>")).unwrap();
        Sanitizer::default().sanitize(&frag).unwrap();
        let child = frag.children().get(0).unwrap();
        assert!(child.is_text());
        assert_eq!(frag.render(), "&lt;img src=x&gt;");
    }

    #[test]
    fn test_attribute_whitelist() {
        assert_eq!(
            clean("<a href=\"/post\" onclick=\"steal()\" title=\"t\">x</a>"),
            "<a href=\"/post\" title=\"t\">x</a>"
        );
    }

    #[test]
    fn test_uri_protocols() {
        let sanitizer = Sanitizer::default();
        assert!(sanitizer.is_allowed_uri("http://example.com/"));
        assert!(sanitizer.is_allowed_uri("MAILTO:me@example.com"));
        assert!(sanitizer.is_allowed_uri("/relative/path:with-colon"));
        assert!(sanitizer.is_allowed_uri("#top"));
        assert!(!sanitizer.is_allowed_uri("javascript:alert(1)"));
        assert!(!sanitizer.is_allowed_uri(" java\tscript:alert(1)"));
        assert!(!sanitizer.is_allowed_uri("data:text/html,x"));

        assert_eq!(
            clean("<a href=\"javascript:evil()\">x</a><img src=\"http://x/y.png\">"),
            "<a>x</a><img src=\"http://x/y.png\">"
        );
    }

    #[test]
    fn test_clean_css() {
        let sanitizer = Sanitizer::default();
        assert_eq!(
            sanitizer.clean_css("color: red; position: absolute; font-weight: bold"),
            "color: red; font-weight: bold"
        );
        assert_eq!(
            sanitizer.clean_css("margin: 0 auto; border: 1px solid #fff; padding: evil"),
            "margin: 0 auto; border: 1px solid #fff"
        );
        assert_eq!(
            sanitizer.clean_css("background-color: red; background: url(http://x/a.png)"),
            "background-color: red"
        );
        assert_eq!(sanitizer.clean_css("color: expression(alert(1))"), "");
    }

    #[test]
    fn test_style_attribute() {
        assert_eq!(
            clean("<span style=\"color: red; top: 0\">x</span>"),
            "<span style=\"color: red\">x</span>"
        );
        assert_eq!(
            clean("<span style=\"position: fixed\">x</span>"),
            "<span>x</span>"
        );
    }

    #[test]
    fn test_comment_plugin_only_touches_comments() {
        let mut service = ZemlService::new();
        service.use_plugin(sanitize_comments);
        let input = "<blink>x</blink>";
        assert_eq!(service.render(&service.parse(input, "comment").unwrap()), "x");
        assert_eq!(service.render(&service.parse(input, "post").unwrap()), input);
    }

    #[test]
    fn test_whitelist_is_configurable() {
        let mut sanitizer = Sanitizer::default();
        sanitizer.acceptable_elements.insert("blink".to_string());
        sanitizer.acceptable_elements.remove("em");
        let tree = MarkupParser::default()
            .parse_markup("<blink><em>x</em></blink>")
            .unwrap();
        sanitizer.sanitize(&tree).unwrap();
        assert_eq!(tree.render(), "<blink>x</blink>");
    }
}
