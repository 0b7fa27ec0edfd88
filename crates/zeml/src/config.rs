//! Parser configuration.

/// Tag classes and limits used by [`MarkupParser`](crate::MarkupParser).
///
/// Setup hooks registered on [`ZemlService`](crate::ZemlService) receive a
/// mutable reference to this struct before the parser is built, so plugins
/// can add their own tags to any class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Tags whose content is kept verbatim up to the matching close tag
    pub isolated_tags: Vec<String>,

    /// Block tags that may contain themselves
    pub nestable_block_tags: Vec<String>,

    /// Block tags that implicitly close an open tag of the same name
    pub non_nestable_block_tags: Vec<String>,

    /// Inline tags that may contain themselves
    pub nestable_inline_tags: Vec<String>,

    /// Deepest element nesting accepted before parsing fails
    pub max_depth: usize,
}

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            isolated_tags: tags(&["script", "style", "pre"]),
            nestable_block_tags: tags(&["blockquote", "div", "fieldset", "ins", "del"]),
            non_nestable_block_tags: tags(&["address", "form", "p"]),
            nestable_inline_tags: tags(&[
                "span", "font", "q", "object", "bdo", "sub", "sup", "center",
            ]),
            max_depth: zeml_core::MAX_DEPTH,
        }
    }
}

impl ParserConfig {
    /// Check if a tag keeps its content verbatim
    pub fn is_isolated(&self, tag: &str) -> bool {
        self.isolated_tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classes() {
        let config = ParserConfig::default();
        assert!(config.is_isolated("pre"));
        assert!(!config.is_isolated("p"));
        assert_eq!(config.non_nestable_block_tags, ["address", "form", "p"]);
        assert_eq!(config.max_depth, 256);
    }
}
