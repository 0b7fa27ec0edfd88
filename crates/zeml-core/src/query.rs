//! Node queries.
//!
//! A rule is a `/`-separated path of node tests, evaluated left to right:
//!
//! - `element/subelement`: every `subelement` below an `element` anywhere
//!   below the context node.
//! - `/element/subelement`: the same, but `element` must be a direct child of
//!   the context node.
//! - `*/span`: all non top level spans.
//! - `*/#`: all non top level text and data nodes.
//! - `/+`: all top level element nodes.
//! - `*[id=foo]`: all elements with the id "foo".
//! - `div[class!=syntax]`: all divs whose class is not "syntax".
//! - `p[class~=note]`: all paragraphs with "note" among their classes.
//! - `a[@id]`: all links with an id.
//! - `h1[!id]`: all headlines without an id.
//!
//! Rules are compiled eagerly into a [`Selector`], so syntax errors surface
//! immediately. Matching is lazy: a [`QueryResult`] only walks as much of the
//! tree as its consumer asks for and remembers what it has seen.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::node::{Node, NodeData};
use crate::{Result, ZemlError};

type NodeIter = Box<dyn Iterator<Item = Node>>;

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// `*`
    Any,
    /// `#`, text and data nodes
    Valued,
    /// `+`, element and fragment nodes
    Unvalued,
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Equals(String, String),
    NotEquals(String, String),
    ContainsWord(String, String),
    Absent(String),
    Present(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    direct: bool,
    test: NodeTest,
    predicate: Option<Predicate>,
}

impl Step {
    fn matches(&self, node: &Node) -> bool {
        let inner = node.inner();
        let data = &inner.data;
        let test = match &self.test {
            NodeTest::Any => true,
            NodeTest::Valued => data.value().is_some(),
            NodeTest::Unvalued => data.value().is_none(),
            NodeTest::Name(name) => data.name() == Some(name.as_str()),
        };
        test && self.predicate.as_ref().map_or(true, |p| p.matches(data))
    }
}

impl Predicate {
    fn matches(&self, data: &NodeData) -> bool {
        match self {
            Predicate::Equals(key, value) => data.attr(key) == Some(value.as_str()),
            Predicate::NotEquals(key, value) => data.attr(key) != Some(value.as_str()),
            Predicate::ContainsWord(key, word) => data
                .attr(key)
                .map_or(false, |v| v.split_whitespace().any(|w| w == word)),
            Predicate::Absent(key) => data.attr(key).is_none(),
            Predicate::Present(key) => data.attr(key).is_some(),
        }
    }
}

/// A compiled query rule
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    steps: Rc<[Step]>,
}

impl Selector {
    /// Compile a rule
    pub fn parse(rule: &str) -> Result<Self> {
        let invalid = |reason: &str| ZemlError::InvalidQuery {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let mut rest = rule;
        loop {
            let direct = rest.starts_with('/');
            if direct {
                rest = &rest[1..];
            }
            let (part, tail) = split_segment(rest);
            steps.push(parse_step(part, direct).map_err(|reason| invalid(&reason))?);
            match tail {
                // a trailing slash is ignored
                Some(tail) if !tail.is_empty() => rest = tail,
                _ => break,
            }
        }

        Ok(Self {
            steps: steps.into(),
        })
    }

    /// Evaluate against the descendants of `node`
    pub fn apply(&self, node: &Node) -> QueryResult {
        self.apply_to(node.children().to_vec())
    }

    /// Evaluate against a set of context nodes
    pub fn apply_to<I>(&self, context: I) -> QueryResult
    where
        I: IntoIterator<Item = Node>,
        I::IntoIter: 'static,
    {
        let matches = evaluate(Box::new(context.into_iter()), self.steps.clone(), 0);
        QueryResult::new(Box::new(Unique::new(matches)))
    }
}

/// Split off the first path segment, ignoring slashes inside brackets
fn split_segment(rule: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    for (idx, c) in rule.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => return (&rule[..idx], Some(&rule[idx + 1..])),
            _ => {}
        }
    }
    (rule, None)
}

fn parse_step(part: &str, direct: bool) -> std::result::Result<Step, String> {
    if part.is_empty() {
        return Err("empty path segment".to_string());
    }

    let (name, predicate) = match part.find('[') {
        Some(idx) => {
            let Some(body) = part[idx + 1..].strip_suffix(']') else {
                return Err(format!("unterminated predicate in {:?}", part));
            };
            (&part[..idx], Some(parse_predicate(body)?))
        }
        None if part.contains(']') => return Err(format!("stray ']' in {:?}", part)),
        None => (part, None),
    };

    let test = match name {
        "" => return Err(format!("missing node test before predicate in {:?}", part)),
        "*" => NodeTest::Any,
        "#" => NodeTest::Valued,
        "+" => NodeTest::Unvalued,
        name => NodeTest::Name(name.to_string()),
    };

    Ok(Step {
        direct,
        test,
        predicate,
    })
}

fn parse_predicate(body: &str) -> std::result::Result<Predicate, String> {
    if body.contains('[') || body.contains(']') {
        return Err(format!("nested brackets in predicate {:?}", body));
    }
    let key_value = |sep: &str| -> std::result::Result<(String, String), String> {
        let (key, value) = body.split_once(sep).unwrap_or((body, ""));
        if key.is_empty() {
            return Err(format!("missing attribute name in predicate {:?}", body));
        }
        Ok((key.to_string(), value.to_string()))
    };

    if body.contains("!=") {
        let (key, value) = key_value("!=")?;
        Ok(Predicate::NotEquals(key, value))
    } else if body.contains("~=") {
        let (key, value) = key_value("~=")?;
        Ok(Predicate::ContainsWord(key, value))
    } else if body.contains('=') {
        let (key, value) = key_value("=")?;
        Ok(Predicate::Equals(key, value))
    } else if let Some(key) = body.strip_prefix('!') {
        if key.is_empty() {
            return Err("missing attribute name after '!'".to_string());
        }
        Ok(Predicate::Absent(key.to_string()))
    } else if let Some(key) = body.strip_prefix('@') {
        if key.is_empty() {
            return Err("missing attribute name after '@'".to_string());
        }
        Ok(Predicate::Present(key.to_string()))
    } else {
        Err(format!("unknown predicate {:?}", body))
    }
}

/// Query a set of context nodes with a rule
pub(crate) fn query_nodes<I>(context: I, rule: &str) -> Result<QueryResult>
where
    I: IntoIterator<Item = Node>,
    I::IntoIter: 'static,
{
    Ok(Selector::parse(rule)?.apply_to(context))
}

fn evaluate(context: NodeIter, steps: Rc<[Step]>, index: usize) -> NodeIter {
    let candidates: NodeIter = if steps[index].direct {
        context
    } else {
        Box::new(IterAll::new(context))
    };

    let filter_steps = steps.clone();
    let filtered = candidates.filter(move |node| filter_steps[index].matches(node));
    if index + 1 == steps.len() {
        return Box::new(filtered);
    }
    Box::new(filtered.flat_map(move |node| {
        evaluate(
            Box::new(node.children().to_vec().into_iter()),
            steps.clone(),
            index + 1,
        )
    }))
}

/// Every node reachable from the inputs, each once, in document order
struct IterAll {
    roots: NodeIter,
    stack: Vec<Node>,
    seen: HashSet<Node>,
}

impl IterAll {
    fn new(roots: NodeIter) -> Self {
        Self {
            roots,
            stack: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for IterAll {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        loop {
            let node = match self.stack.pop() {
                Some(node) => node,
                None => self.roots.next()?,
            };
            if !self.seen.insert(node.clone()) {
                continue;
            }
            self.stack.extend(node.children().to_vec().into_iter().rev());
            return Some(node);
        }
    }
}

/// Drops nodes that were already yielded
struct Unique {
    inner: NodeIter,
    seen: HashSet<Node>,
}

impl Unique {
    fn new(inner: NodeIter) -> Self {
        Self {
            inner,
            seen: HashSet::new(),
        }
    }
}

impl Iterator for Unique {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let seen = &mut self.seen;
        self.inner.find(|node| seen.insert(node.clone()))
    }
}

struct State {
    /// `None` once the source is exhausted
    source: RefCell<Option<NodeIter>>,
    results: RefCell<Vec<Node>>,
}

/// The lazily materialized result of a query.
///
/// Nodes are produced on demand and buffered, so iterating a second time
/// replays the buffer instead of walking the tree again. Clones share the
/// same buffer.
#[derive(Clone)]
pub struct QueryResult(Rc<State>);

impl QueryResult {
    fn new(source: NodeIter) -> Self {
        QueryResult(Rc::new(State {
            source: RefCell::new(Some(source)),
            results: RefCell::new(Vec::new()),
        }))
    }

    /// Pull one more node from the source into the buffer
    fn fetch_next(&self) -> Option<Node> {
        let mut source = self.0.source.borrow_mut();
        match source.as_mut()?.next() {
            Some(node) => {
                self.0.results.borrow_mut().push(node.clone());
                Some(node)
            }
            None => {
                *source = None;
                None
            }
        }
    }

    fn fetch_all(&self) {
        while self.fetch_next().is_some() {}
    }

    /// Number of nodes materialized so far
    pub fn materialized(&self) -> usize {
        self.0.results.borrow().len()
    }

    /// Check if the source has been fully consumed
    pub fn is_exhausted(&self) -> bool {
        self.0.source.borrow().is_none()
    }

    /// Get a specific result.
    ///
    /// Non-negative indices only drive the query as far as needed. Negative
    /// indices count from the end and force full materialization.
    pub fn get(&self, index: isize) -> Result<Node> {
        let not_found = || ZemlError::NotFound(format!("query result index {}", index));
        if index < 0 {
            self.fetch_all();
            let results = self.0.results.borrow();
            let idx = results
                .len()
                .checked_sub(index.unsigned_abs())
                .ok_or_else(not_found)?;
            return Ok(results[idx].clone());
        }

        let idx = index as usize;
        while self.materialized() <= idx {
            if self.fetch_next().is_none() {
                return Err(not_found());
            }
        }
        Ok(self.0.results.borrow()[idx].clone())
    }

    /// Get the first node
    pub fn first(&self) -> Result<Node> {
        self.get(0)
    }

    /// Get the last node. This materializes all results, so prefer
    /// [`QueryResult::first`] where possible.
    pub fn last(&self) -> Result<Node> {
        self.get(-1)
    }

    /// Fetch all nodes and return the number of results
    pub fn len(&self) -> usize {
        self.fetch_all();
        self.materialized()
    }

    pub fn is_empty(&self) -> bool {
        self.get(0).is_err()
    }

    pub fn iter(&self) -> Iter {
        Iter {
            result: self.clone(),
            pos: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<Node> {
        self.fetch_all();
        self.0.results.borrow().clone()
    }

    /// Return the joined values of all text and data nodes in the result
    pub fn text(&self) -> String {
        self.iter().filter_map(|node| node.value()).collect()
    }

    /// Apply a rule to all result nodes
    pub fn query(&self, rule: &str) -> Result<QueryResult> {
        query_nodes(self.iter(), rule)
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("results", &self.0.results.borrow())
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Iterator over a [`QueryResult`], replaying buffered nodes first
pub struct Iter {
    result: QueryResult,
    pos: usize,
}

impl Iterator for Iter {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let buffered = self.result.0.results.borrow().get(self.pos).cloned();
        let node = match buffered {
            Some(node) => node,
            None => self.result.fetch_next()?,
        };
        self.pos += 1;
        Some(node)
    }
}

impl IntoIterator for &QueryResult {
    type Item = Node;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}
