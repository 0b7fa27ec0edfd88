//! Plain text input.
//!
//! [`PlainTextParser`] turns text typed without any markup into a tree:
//! blank lines separate paragraphs, `>` quotes, `*`, `-` and `•` start
//! bullet items, `#` and `1.` start numbered items, and web or mail
//! addresses become links. Everything else is literal text.

use once_cell::sync::Lazy;
use regex::Regex;
use zeml_core::{Node, Result, ZemlError, MAX_DEPTH};

use crate::parser::{decode_entities, Parser};

/// Lines shorter than this keep their line break
const SHORT_LINE: usize = 50;

/// Characters that never end an autolinked URL
const URL_END_PUNCTUATION: &[char] = &[']', '.', '}', '>', ')', ',', '?', '!', ';', ':', '"', '\''];

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)(?P<url>(?:(?:https?|webcal|feed|ftp|news|nntp)://(?:[-\w]+(?::[-\w]+)?@)?|www\.)",
        r"(?:[-\w]+\.)+\w\w+(?:/[-\w$.+!*'(),;:@%&=?/~#]*)?)",
        r#"|(?P<email>[^()<>@,;:"\[\]\s]+@(?:[-\w]+\.)+\w\w+)"#,
    ))
    .expect("valid link regex")
});

static ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\t ]*(?:(?P<bullet>[*\-•])|(?P<number>#|\d+\.))[\t ]+")
        .expect("valid list item regex")
});

/// Parser for unformatted text
#[derive(Debug, Clone, Default)]
pub struct PlainTextParser;

impl PlainTextParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for PlainTextParser {
    fn parse(&self, input: &str, reason: &str) -> Result<Node> {
        tracing::debug!(reason, bytes = input.len(), "parsing plain text");
        let lines: Vec<&str> = input.lines().collect();
        let root = Node::fragment();
        append_blocks(&root, &lines, 0)?;
        Ok(root)
    }
}

#[derive(Default)]
enum Block<'a> {
    #[default]
    Nothing,
    Paragraph(Vec<&'a str>),
    List {
        numbered: bool,
        items: Vec<Vec<&'a str>>,
    },
}

fn append_blocks<'a>(target: &Node, lines: &[&'a str], quotes: usize) -> Result<()> {
    // a quote level plus list, item and link below it
    if quotes + 4 > MAX_DEPTH {
        return Err(ZemlError::DepthExceeded(MAX_DEPTH));
    }
    let mut block = Block::Nothing;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            flush(target, &mut block)?;
            i += 1;
            continue;
        }

        if is_quoted(line) {
            flush(target, &mut block)?;
            let start = i;
            while i < lines.len() && is_quoted(lines[i]) {
                i += 1;
            }
            let inner: Vec<&str> = lines[start..i].iter().copied().map(unquote).collect();
            let quote = Node::element("blockquote");
            target.children().append(quote.clone())?;
            append_blocks(&quote, &inner, quotes + 1)?;
            continue;
        }

        if let Some(caps) = ITEM_RE.captures(line) {
            let numbered = caps.name("number").is_some();
            let text = &line[caps[0].len()..];
            match &mut block {
                Block::List {
                    numbered: open,
                    items,
                } if *open == numbered => items.push(vec![text]),
                _ => {
                    flush(target, &mut block)?;
                    block = Block::List {
                        numbered,
                        items: vec![vec![text]],
                    };
                }
            }
        } else {
            match &mut block {
                Block::Paragraph(open) => open.push(line),
                Block::List { items, .. } => {
                    if let Some(item) = items.last_mut() {
                        item.push(line);
                    }
                }
                Block::Nothing => block = Block::Paragraph(vec![line]),
            }
        }
        i += 1;
    }

    flush(target, &mut block)
}

fn is_quoted(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

/// Strip one level of quoting
fn unquote(line: &str) -> &str {
    let rest = &line.trim_start()[1..];
    rest.strip_prefix([' ', '\t']).unwrap_or(rest)
}

fn flush(target: &Node, block: &mut Block<'_>) -> Result<()> {
    match std::mem::take(block) {
        Block::Nothing => {}
        Block::Paragraph(lines) => {
            let p = Node::element("p");
            append_lines(&p, &lines)?;
            target.children().append(p)?;
        }
        Block::List { numbered, items } => {
            let list = Node::element(if numbered { "ol" } else { "ul" });
            for item in items {
                let li = Node::element("li");
                append_lines(&li, &item)?;
                list.children().append(li)?;
            }
            target.children().append(list)?;
        }
    }
    Ok(())
}

/// Check if a line break survives before line `i`.
///
/// Runs of short lines (poems, addresses) keep their breaks, so does a
/// long line closing such a run. Other lines flow together.
fn keeps_break(lengths: &[usize], i: usize) -> bool {
    let short = |len: usize| len > 0 && len < SHORT_LINE;
    let previous = lengths[i - 1];
    let before_previous = if i >= 2 { lengths[i - 2] } else { 0 };
    if lengths[i] < SHORT_LINE {
        short(previous) || lengths.get(i + 1).is_some_and(|&next| short(next))
    } else {
        short(previous) && short(before_previous)
    }
}

fn append_lines(target: &Node, lines: &[&str]) -> Result<()> {
    let lengths: Vec<usize> = lines.iter().map(|line| line.trim().chars().count()).collect();
    let mut text = String::new();

    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            if keeps_break(&lengths, i) {
                flush_text(target, &mut text)?;
                target.children().append(Node::element("br"))?;
            } else {
                text.push(' ');
            }
        }

        let line = line.trim();
        let mut last = 0;
        for caps in LINK_RE.captures_iter(line) {
            let (found, link) = match (caps.name("url"), caps.name("email")) {
                (Some(url), _) => {
                    let address = url.as_str().trim_end_matches(URL_END_PUNCTUATION);
                    (url.start()..url.start() + address.len(), web_link(address)?)
                }
                (None, Some(email)) => (email.range(), mail_link(email.as_str())?),
                (None, None) => continue,
            };
            text.push_str(&decode_entities(&line[last..found.start]));
            flush_text(target, &mut text)?;
            target.children().append(link)?;
            last = found.end;
        }
        text.push_str(&decode_entities(&line[last..]));
    }

    flush_text(target, &mut text)
}

fn web_link(url: &str) -> Result<Node> {
    let href = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    let label = href.strip_prefix("http://").unwrap_or(&href).to_string();
    let a = Node::element_with_attrs("a", [("href", href.as_str()), ("class", "external")]);
    a.children().append(Node::text_node(label))?;
    Ok(a)
}

fn mail_link(address: &str) -> Result<Node> {
    let href = format!("mailto:{}", address);
    let a = Node::element_with_attrs("a", [("href", href.as_str())]);
    a.children().append(Node::text_node(address))?;
    Ok(a)
}

fn flush_text(target: &Node, text: &mut String) -> Result<()> {
    if !text.is_empty() {
        target.children().append(Node::text_node(std::mem::take(text)))?;
    }
    Ok(())
}
