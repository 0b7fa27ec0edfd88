//! Markup tokenizer.
//!
//! Splits input into start tags, end tags and text. Comments, doctype
//! declarations and processing instructions are dropped, CDATA sections
//! become text. Anything that does not look like markup stays text, so the
//! tokenizer never fails.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::entities::decode_entities;
use crate::config::ParserConfig;

static START_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<([a-zA-Z][a-zA-Z0-9:_.\-]*)").expect("valid start tag regex"));

static END_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^</([a-zA-Z][a-zA-Z0-9:_.\-]*)\s*>").expect("valid end tag regex")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("valid attribute regex")
});

static TAG_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(/?)>").expect("valid tag end regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Text(String),
    StartTag {
        name: String,
        attrs: IndexMap<String, String>,
        self_closing: bool,
    },
    EndTag(String),
}

/// Split markup into tokens
pub(crate) fn tokenize(input: &str, config: &ParserConfig) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let Some(lt) = rest.find('<') else {
            push_text(&mut tokens, &decode_entities(rest));
            break;
        };
        if lt > 0 {
            push_text(&mut tokens, &decode_entities(&rest[..lt]));
            pos += lt;
            continue;
        }

        if let Some(body) = rest.strip_prefix("<!--") {
            pos += 4 + body.find("-->").map_or(body.len(), |end| end + 3);
        } else if let Some(body) = rest.strip_prefix("<![CDATA[") {
            let end = body.find("]]>").unwrap_or(body.len());
            push_text(&mut tokens, &body[..end]);
            pos += 9 + (end + 3).min(body.len());
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            pos += rest.find('>').map_or(rest.len(), |end| end + 1);
        } else if let Some(caps) = END_TAG_RE.captures(rest) {
            tokens.push(Token::EndTag(caps[1].to_ascii_lowercase()));
            pos += caps[0].len();
        } else if let Some((token, consumed)) = start_tag(rest) {
            pos += consumed;
            let raw_name = match &token {
                Token::StartTag {
                    name,
                    self_closing: false,
                    ..
                } if config.is_isolated(name) => Some(name.clone()),
                _ => None,
            };
            tokens.push(token);
            if let Some(name) = raw_name {
                pos += raw_content(&input[pos..], &name, &mut tokens);
            }
        } else {
            push_text(&mut tokens, "<");
            pos += 1;
        }
    }

    tokens
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Token::Text(last)) = tokens.last_mut() {
        last.push_str(text);
    } else {
        tokens.push(Token::Text(text.to_string()));
    }
}

/// Parse a start tag at the beginning of `input`, returning the token and
/// the number of bytes it spans.
fn start_tag(input: &str) -> Option<(Token, usize)> {
    let caps = START_TAG_RE.captures(input)?;
    let name = caps[1].to_ascii_lowercase();
    let mut pos = caps[0].len();
    let mut attrs = IndexMap::new();

    loop {
        let rest = &input[pos..];
        if let Some(end) = TAG_END_RE.captures(rest) {
            let token = Token::StartTag {
                name,
                attrs,
                self_closing: !end[1].is_empty(),
            };
            return Some((token, pos + end[0].len()));
        }
        if let Some(attr) = ATTR_RE.captures(rest) {
            let key = attr[1].to_ascii_lowercase();
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map_or_else(|| key.clone(), |m| decode_entities(m.as_str()));
            attrs.insert(key, value);
            pos += attr[0].len();
            continue;
        }
        // skip junk like a stray slash or quote inside the tag
        let mut chars = rest.chars();
        match chars.next() {
            Some('<') | None => return None,
            Some(c) => pos += c.len_utf8(),
        }
    }
}

/// Emit the verbatim content of an isolated element and its end tag.
fn raw_content(input: &str, name: &str, tokens: &mut Vec<Token>) -> usize {
    let mut from = 0;

    while let Some(found) = input[from..].find("</") {
        let start = from + found;
        let name_end = start + 2 + name.len();
        let matches_name = input
            .as_bytes()
            .get(start + 2..name_end)
            .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name.as_bytes()));
        if matches_name {
            let after = &input[name_end..];
            if let Some(end) = TAG_END_RE.captures(after).filter(|end| end[1].is_empty()) {
                push_text(tokens, &input[..start]);
                tokens.push(Token::EndTag(name.to_string()));
                return name_end + end[0].len();
            }
        }
        from = start + 2;
    }

    push_text(tokens, input);
    input.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        tokenize(input, &ParserConfig::default())
    }

    fn start(name: &str, attrs: &[(&str, &str)]) -> Token {
        Token::StartTag {
            name: name.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            self_closing: false,
        }
    }

    fn text(value: &str) -> Token {
        Token::Text(value.to_string())
    }

    #[test]
    fn test_simple_markup() {
        assert_eq!(
            lex("<P>Hi</P>"),
            vec![start("p", &[]), text("Hi"), Token::EndTag("p".to_string())]
        );
    }

    #[test]
    fn test_attribute_forms() {
        let tokens = lex(r#"<input Type="text" value='a &amp; b' size=3 checked tp:contents=clock>"#);
        assert_eq!(
            tokens,
            vec![start(
                "input",
                &[
                    ("type", "text"),
                    ("value", "a & b"),
                    ("size", "3"),
                    ("checked", "checked"),
                    ("tp:contents", "clock"),
                ]
            )]
        );
    }

    #[test]
    fn test_attributes_without_separating_space() {
        assert_eq!(
            lex(r#"<a href="x"title='y'>"#),
            vec![start("a", &[("href", "x"), ("title", "y")])]
        );
    }

    #[test]
    fn test_self_closing_syntax() {
        assert_eq!(
            lex("<br/><img src=x />"),
            vec![
                Token::StartTag {
                    name: "br".to_string(),
                    attrs: IndexMap::new(),
                    self_closing: true,
                },
                Token::StartTag {
                    name: "img".to_string(),
                    attrs: [("src".to_string(), "x".to_string())].into_iter().collect(),
                    self_closing: true,
                },
            ]
        );
    }

    #[test]
    fn test_comments_and_declarations_dropped() {
        assert_eq!(
            lex("<!DOCTYPE html>a<!-- note -->b<?php echo 1 ?>c"),
            vec![text("abc")]
        );
    }

    #[test]
    fn test_cdata_becomes_text() {
        assert_eq!(lex("<![CDATA[1 < 2 &amp;]]>"), vec![text("1 < 2 &amp;")]);
    }

    #[test]
    fn test_stray_lt_is_text() {
        assert_eq!(lex("1 < 2 <3"), vec![text("1 < 2 <3")]);
        assert_eq!(lex("a <b"), vec![text("a <b")]);
    }

    #[test]
    fn test_entities_in_text() {
        assert_eq!(lex("&lt;b&gt; &#x41;"), vec![text("<b> A")]);
    }

    #[test]
    fn test_isolated_content_is_raw() {
        assert_eq!(
            lex("<script>if (a < b && c) { x = '</p>'; }</SCRIPT >after"),
            vec![
                start("script", &[]),
                text("if (a < b && c) { x = '</p>'; }"),
                Token::EndTag("script".to_string()),
                text("after"),
            ]
        );
        assert_eq!(
            lex("<pre>&amp;<b>"),
            vec![start("pre", &[]), text("&amp;<b>")]
        );
    }

    #[test]
    fn test_raw_close_tag_case_and_lookalikes() {
        assert_eq!(
            lex("<pre></prefix></ pre></Pre>x"),
            vec![
                start("pre", &[]),
                text("</prefix></ pre>"),
                Token::EndTag("pre".to_string()),
                text("x"),
            ]
        );
    }

    #[test]
    fn test_many_isolated_elements() {
        let tokens = lex(&"<pre>x</pre>".repeat(20_000));
        assert_eq!(tokens.len(), 60_000);
        assert_eq!(tokens[59_999], Token::EndTag("pre".to_string()));
    }
}
