//! Parser for one NWKA tree.
//!
//! A node's text is either a leaf (`name:length[attributes]`) or a parenthesised
//! list of children followed by the node's own attributes. Children are found by
//! splitting at commas outside any `()`, `[]` or `{}` nesting, quotes or escapes.
//!
//! The text is tokenized once. Open internal nodes live on an explicit stack, so
//! nesting depth costs heap rather than call stack. A node's attribute text is
//! parsed when the segment holding it ends: at the next sibling comma or at the
//! parent's closing `)`.
//!
//! The attribute section is read by a small state machine that reproduces the
//! established disambiguation rules for bare tokens:
//! - a token after `:` is the length if numeric;
//! - a token after `/` is the support if numeric;
//! - a bare token is the name when it is quoted, when the node is a leaf with no
//!   name, length or support yet, or when it does not start with a digit;
//!   otherwise it is the support if numeric;
//! - anything else is kept as `Unknown`, `Unknown2`, `Unknown3`, ...
//!
//! Bracketed `key=value` pairs may carry `&` or `!` sigils (`[&rate=0.1]`). A
//! `prob` attribute fills in a missing support.

use crate::attributes::{Attributes, LENGTH, NAME, SUPPORT, parse_number};
use crate::error::NwkaError;
use crate::tokenizer::{CharSource, StrSource, Token, TokenizerState, next_token};
use crate::tree::{NodeIndex, Tree};

/// Parses a single tree. A trailing `;` is optional.
///
/// # Example
/// ```
/// # use treenode::nwka::parse_tree;
/// let tree = parse_tree("(A:1,B:2)C:3;").unwrap();
/// let root = &tree[tree.root()];
/// assert_eq!(root.name(), "C");
/// assert_eq!(root.length(), 3.0);
/// assert_eq!(tree.leaf_names(tree.root()), vec!["A", "B"]);
/// ```
pub fn parse_tree(text: &str) -> Result<Tree, NwkaError> {
    if text.trim().is_empty() {
        return Err(NwkaError::Empty);
    }
    let lead = text.len() - text.trim_start().len();
    let trimmed = text.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);

    let mut tree = Tree::new();
    let root = tree.root();
    if !body.starts_with('(') {
        let mut source = StrSource::new(body);
        parse_attributes(&mut source, tree.attributes_mut(root), 0, lead)?;
        return Ok(tree);
    }
    let close = parse_children(&mut tree, body, lead)?;
    let child_count = tree[root].children().len();
    let mut rest = StrSource::new(&body[close + 1..]);
    parse_attributes(&mut rest, tree.attributes_mut(root), child_count, lead + close + 1)?;
    Ok(tree)
}

/// Parses text that must contain exactly one tree, optionally preceded by a
/// tree name.
pub fn parse_single_tree(text: &str) -> Result<Tree, NwkaError> {
    let mut trees = super::parse_trees(text).collect::<Result<Vec<_>, _>>()?;
    match trees.len() {
        1 => Ok(trees.remove(0)),
        0 => Err(NwkaError::Empty),
        count => Err(NwkaError::MultipleTrees { count }),
    }
}

/// An internal node whose closing `)` has not been seen yet.
#[derive(Debug)]
struct Open {
    node: NodeIndex,
    /// Unmatched `(` that did not open a child node.
    round: i32,
    /// Bracket depths when the node was opened.
    square_base: i32,
    curly_base: i32,
    /// Start of the current child segment.
    segment_start: usize,
    /// No token seen yet in the current segment.
    fresh: bool,
    /// Internal child of the current segment and the position of its `)`.
    closed_child: Option<(NodeIndex, usize)>,
}

impl Open {
    fn new(node: NodeIndex, segment_start: usize, square_base: i32, curly_base: i32) -> Self {
        Open {
            node,
            round: 0,
            square_base,
            curly_base,
            segment_start,
            fresh: true,
            closed_child: None,
        }
    }
}

/// Builds every node below the root of `body`, which starts with `(`. Returns the
/// position of the root's closing `)`.
fn parse_children(tree: &mut Tree, body: &str, lead: usize) -> Result<usize, NwkaError> {
    let mut source = StrSource::new(body);
    let mut state = TokenizerState::default();
    // the leading '('
    next_token(&mut source, &mut state);

    let (mut square, mut curly) = (0i32, 0i32);
    let mut stack = vec![Open::new(tree.root(), 1, 0, 0)];

    loop {
        let Some(token) = next_token(&mut source, &mut state) else {
            return Err(NwkaError::UnbalancedParentheses { position: lead + body.len() });
        };
        let depth = stack.len() - 1;
        if !token.is_structural() {
            stack[depth].fresh = false;
            continue;
        }
        let at = source.position() - token.ch.len_utf8();
        let top = &mut stack[depth];
        match token.ch {
            '(' if top.fresh => {
                top.fresh = false;
                let child = tree.push_child(top.node, Attributes::new());
                stack.push(Open::new(child, at + 1, square, curly));
            }
            '(' => top.round += 1,
            ')' if top.round == 0 => {
                let Some(open) = stack.pop() else { break Ok(at) };
                finish_segment(tree, body, lead, &open, at)?;
                match stack.last_mut() {
                    Some(parent) => parent.closed_child = Some((open.node, at)),
                    None => break Ok(at),
                }
            }
            ')' => top.round -= 1,
            ',' if top.round == 0 && square == top.square_base && curly == top.curly_base => {
                finish_segment(tree, body, lead, top, at)?;
                top.segment_start = at + 1;
                top.fresh = true;
                top.closed_child = None;
            }
            ch => {
                top.fresh = false;
                match ch {
                    '[' => square += 1,
                    ']' => square -= 1,
                    '{' => curly += 1,
                    '}' => curly -= 1,
                    _ => {}
                }
            }
        }
    }
}

/// Creates or completes the child held by `open`'s segment ending at `end`.
fn finish_segment(
    tree: &mut Tree,
    body: &str,
    lead: usize,
    open: &Open,
    end: usize,
) -> Result<(), NwkaError> {
    let segment = &body[open.segment_start..end];
    let from = open.segment_start + (segment.len() - segment.trim_start().len());
    let trimmed = segment.trim();
    let to = from + trimmed.strip_suffix(';').unwrap_or(trimmed).len();

    match open.closed_child {
        Some((child, close)) => {
            let start = (close + 1).min(to);
            let child_count = tree[child].children().len();
            let mut source = StrSource::new(&body[start..to]);
            parse_attributes(&mut source, tree.attributes_mut(child), child_count, lead + start)
        }
        None => {
            let child = tree.push_child(open.node, Attributes::new());
            let mut source = StrSource::new(&body[from..to]);
            parse_attributes(&mut source, tree.attributes_mut(child), 0, lead + from)
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Accumulated text of a name or value, without escape marks.
#[derive(Debug, Default)]
struct Word {
    text: String,
    opening_quote: Option<char>,
    closing_quote: Option<char>,
    chars: usize,
}

impl Word {
    fn push(&mut self, token: &Token) {
        if token.escape_mark {
            return;
        }
        if self.text.is_empty() && token.quote_mark {
            self.opening_quote = Some(token.ch);
        }
        self.closing_quote = token.quote_mark.then_some(token.ch);
        self.text.push(token.ch);
        self.chars += 1;
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The text between matching delimiting quotes, if the word is quoted.
    fn unquoted(&self) -> Option<&str> {
        match (self.opening_quote, self.closing_quote) {
            (Some(open), Some(close)) if open == close && self.chars >= 2 => {
                let q = open.len_utf8();
                Some(&self.text[q..self.text.len() - q])
            }
            _ => None,
        }
    }

    fn value(&self) -> &str {
        self.unquoted().unwrap_or(&self.text)
    }

    fn clear(&mut self) {
        *self = Word::default();
    }
}

/// Bracket bookkeeping for the attribute state machine.
#[derive(Debug)]
struct Scope {
    square: i32,
    curly: i32,
    /// No outer `[` has been opened since the last reset.
    start: bool,
    expecting_close: bool,
    closed_outer: bool,
    within_brackets: bool,
}

impl Scope {
    fn new() -> Self {
        Scope {
            square: 0,
            curly: 0,
            start: true,
            expecting_close: false,
            closed_outer: false,
            within_brackets: false,
        }
    }

    /// Called on every character: leaves a just-closed outer bracket and records
    /// whether we are inside one.
    fn settle(&mut self) {
        if self.closed_outer {
            self.closed_outer = false;
            self.expecting_close = false;
            self.start = true;
            self.within_brackets = false;
        }
        if self.expecting_close {
            self.within_brackets = true;
        }
    }
}

fn parse_attributes<S: CharSource>(
    source: &mut S,
    attrs: &mut Attributes,
    child_count: usize,
    base: usize,
) -> Result<(), NwkaError> {
    let mut state = TokenizerState::default();
    let mut scope = Scope::new();
    let mut name = Word::default();
    let mut value = Word::default();
    let mut name_finished = false;
    let mut last_separator = ',';

    loop {
        let token = if scope.closed_outer {
            Some(Token {
                ch: ',',
                escaped: false,
                escape_mark: false,
                quoted: false,
                quote_mark: false,
            })
        } else {
            next_token(source, &mut state)
        };

        let Some(token) = token else {
            if state.in_quotes() {
                return Err(NwkaError::UnterminatedQuote { position: base + source.position() });
            }
            flush(attrs, &name, &value, last_separator, child_count, &scope)?;
            break;
        };

        let structural = token.is_structural();
        let mut ch = token.ch;
        if scope.start && structural && ch == '[' {
            scope.expecting_close = true;
            scope.start = false;
            ch = ',';
        }

        if structural && ch == '=' {
            name_finished = true;
            scope.settle();
        } else if structural
            && matches!(ch, ':' | '/' | ',')
            && scope.square == 0
            && scope.curly == 0
        {
            flush(attrs, &name, &value, last_separator, child_count, &scope)?;
            last_separator = ch;
            name_finished = false;
            name.clear();
            value.clear();
            scope.settle();
        } else {
            scope.settle();
            if structural {
                match ch {
                    '[' => scope.square += 1,
                    ']' if scope.square > 0 => scope.square -= 1,
                    ']' if scope.expecting_close => scope.closed_outer = true,
                    '{' => scope.curly += 1,
                    '}' if scope.curly > 0 => scope.curly -= 1,
                    _ => {}
                }
            }
            if !scope.closed_outer {
                if name_finished {
                    value.push(&token);
                } else {
                    name.push(&token);
                }
            }
        }
    }

    if attrs.support().is_nan() {
        let prob = attrs
            .get("prob")
            .map(|p| p.as_number().or_else(|| p.as_text().and_then(parse_number)));
        if let Some(prob) = prob {
            attrs.set_support(prob.unwrap_or(f64::NAN));
        }
    }
    Ok(())
}

/// Stores the token pair accumulated since the last separator.
fn flush(
    attrs: &mut Attributes,
    name: &Word,
    value: &Word,
    last_separator: char,
    child_count: usize,
    scope: &Scope,
) -> Result<(), NwkaError> {
    if !value.is_empty() {
        let key = name.text.strip_prefix('&').unwrap_or(&name.text);
        let key = key.strip_prefix('!').unwrap_or(key);
        let number = |attribute: &str| {
            parse_number(&value.text).ok_or_else(|| NwkaError::InvalidNumber {
                attribute: attribute.to_string(),
                value: value.text.clone(),
            })
        };

        if key.eq_ignore_ascii_case(NAME) {
            attrs.set_name(value.value());
        } else if key.eq_ignore_ascii_case(SUPPORT) {
            attrs.set_support(number(SUPPORT)?);
        } else if key.eq_ignore_ascii_case(LENGTH) {
            attrs.set_length(number(LENGTH)?);
        } else {
            match parse_number(&value.text) {
                Some(n) => attrs.insert(key, n),
                None => attrs.insert(key, value.value()),
            };
        }
        return Ok(());
    }

    if name.is_empty() {
        return Ok(());
    }
    let raw = name.text.as_str();

    match last_separator {
        ':' => match parse_number(raw) {
            Some(length) => attrs.set_length(length),
            None => insert_unknown(attrs, raw),
        },
        '/' => match parse_number(raw) {
            Some(support) => attrs.set_support(support),
            None => insert_unknown(attrs, raw),
        },
        _ => {
            let (text, mut is_name) = match name.unquoted() {
                Some(unquoted) => (unquoted, true),
                None => (raw, false),
            };
            if child_count == 0
                && attrs.name().is_empty()
                && attrs.length().is_nan()
                && attrs.support().is_nan()
            {
                is_name = true;
            }

            let starts_with_digit = text.starts_with(|c: char| c.is_ascii_digit());
            if attrs.name().is_empty()
                && !scope.within_brackets
                && !scope.closed_outer
                && (is_name || !starts_with_digit)
            {
                attrs.set_name(text);
            } else {
                match parse_number(text).filter(|_| attrs.support().is_nan()) {
                    Some(support) => attrs.set_support(support),
                    None => insert_unknown(attrs, text),
                }
            }
        }
    }
    Ok(())
}

/// Stores `value` under the first free key of `Unknown`, `Unknown2`, `Unknown3`, ...
fn insert_unknown(attrs: &mut Attributes, value: &str) {
    let mut key = String::from("Unknown");
    let mut suffix = 2;
    while attrs.contains_key(&key) {
        key = format!("Unknown{suffix}");
        suffix += 1;
    }
    attrs.insert(key, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_attrs(text: &str) -> Attributes {
        let tree = parse_tree(text).unwrap();
        tree[tree.root()].attributes.clone()
    }

    #[test]
    fn internal_name_and_lengths() {
        let tree = parse_tree("(A:1,B:2)C:3;").unwrap();
        let root = tree.root();
        assert_eq!(tree[root].name(), "C");
        assert_eq!(tree[root].length(), 3.0);
        let children = tree[root].children();
        assert_eq!(children.len(), 2);
        assert_eq!(tree[children[0]].name(), "A");
        assert_eq!(tree[children[0]].length(), 1.0);
        assert_eq!(tree[children[1]].name(), "B");
        assert_eq!(tree[children[1]].length(), 2.0);
    }

    #[test]
    fn bracketed_support_with_sigil() {
        let attrs = root_attrs("(A,B)[&support=0.95];");
        assert_eq!(attrs.support(), 0.95);
        assert_eq!(attrs.name(), "");
    }

    #[test]
    fn numeric_internal_label_is_support() {
        let attrs = root_attrs("(A,B)0.87:0.1;");
        assert_eq!(attrs.support(), 0.87);
        assert_eq!(attrs.length(), 0.1);
        assert_eq!(attrs.name(), "");
    }

    #[test]
    fn numeric_leaf_label_is_name() {
        let tree = parse_tree("(123:1,B);").unwrap();
        let first = tree[tree.root()].children()[0];
        assert_eq!(tree[first].name(), "123");
        assert_eq!(tree[first].length(), 1.0);
    }

    #[test]
    fn quoted_internal_numeric_label_is_name() {
        assert_eq!(root_attrs("(A,B)'42';").name(), "42");
    }

    #[test]
    fn slash_support_and_unknowns() {
        let attrs = root_attrs("(A,B)x/0.5:2;");
        assert_eq!(attrs.name(), "x");
        assert_eq!(attrs.support(), 0.5);
        assert_eq!(attrs.length(), 2.0);

        let attrs = root_attrs("(A,B)x:abc:def;");
        assert_eq!(attrs.get_text("Unknown"), Some("abc"));
        assert_eq!(attrs.get_text("Unknown2"), Some("def"));

        // a second numeric label cannot be the support again
        let attrs = root_attrs("(A,B)0.9/0.8;");
        assert_eq!(attrs.support(), 0.8);
        let attrs = root_attrs("(A,B)1,2;");
        assert_eq!(attrs.support(), 1.0);
        assert_eq!(attrs.get_text("Unknown"), Some("2"));
    }

    #[test]
    fn beast_style_attributes() {
        let tree = parse_tree(
            "((A[&rate=0.5,host=\"human\"]:1.5,B:2)[&height_95%_HPD={1.0,2.5},posterior=0.99]:0.3,C:4);",
        )
        .unwrap();
        let a = tree.node_by_name("A").unwrap();
        assert_eq!(tree[a].length(), 1.5);
        assert_eq!(tree[a].attributes.get_number("rate"), Some(0.5));
        assert_eq!(tree[a].attributes.get_text("host"), Some("human"));

        let clade = tree[tree.root()].children()[0];
        let attrs = &tree[clade].attributes;
        assert_eq!(attrs.get_text("height_95%_HPD"), Some("{1.0,2.5}"));
        assert_eq!(attrs.get_number("posterior"), Some(0.99));
        assert_eq!(attrs.length(), 0.3);
        assert_eq!(attrs.name(), "");
    }

    #[test]
    fn prob_fills_missing_support() {
        let attrs = root_attrs("(A,B)[&prob=0.75];");
        assert_eq!(attrs.support(), 0.75);
        let attrs = root_attrs("(A,B)[&prob=0.75,support=0.5];");
        assert_eq!(attrs.support(), 0.5);
    }

    #[test]
    fn quoted_and_escaped_names() {
        let tree = parse_tree("('a,b':1,c\\,d,'O\\'Brien');").unwrap();
        assert_eq!(tree.leaf_names(tree.root()), vec!["a,b", "c,d", "O'Brien"]);
        let tree = parse_tree("(\"it's\",'say \"hi\"');").unwrap();
        assert_eq!(tree.leaf_names(tree.root()), vec!["it's", "say \"hi\""]);
    }

    #[test]
    fn whitespace_outside_quotes_is_ignored() {
        let tree = parse_tree(" ( A : 1 ,\n B : 2 ) C ; ").unwrap();
        assert_eq!(tree.leaf_names(tree.root()), vec!["A", "B"]);
        assert_eq!(tree[tree.root()].name(), "C");
        let tree = parse_tree("('a b',c);").unwrap();
        assert_eq!(tree.leaf_names(tree.root()), vec!["a b", "c"]);
    }

    #[test]
    fn named_reserved_attributes() {
        let attrs = root_attrs("(A,B)[&Name='root node',Length=2,!support=1];");
        assert_eq!(attrs.name(), "root node");
        assert_eq!(attrs.length(), 2.0);
        assert_eq!(attrs.support(), 1.0);
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn nested_parentheses_and_empty_children() {
        let tree = parse_tree("(((A,B),(C,D)),());").unwrap();
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.leaf_count(), 5);
    }

    /// `((..((L0,L1:1),L2:2)..),Ln-1:n-1);`
    fn caterpillar(n: usize) -> String {
        let mut text = "(".repeat(n - 1);
        text.push_str("L0");
        for i in 1..n {
            text.push_str(&format!(",L{i}:{i})"));
        }
        text.push(';');
        text
    }

    #[test]
    fn deep_caterpillar() {
        let n = 50_000;
        let tree = parse_tree(&caterpillar(n)).unwrap();
        assert_eq!(tree.len(), 2 * n - 1);
        assert_eq!(tree.leaf_count(), n);
        let l0 = tree.node_by_name("L0").unwrap();
        assert_eq!(tree.ancestors(l0).len(), n);
        let last = tree[tree.root()].children()[1];
        assert_eq!(tree[last].name(), format!("L{}", n - 1));
        assert_eq!(tree[last].length(), (n - 1) as f64);

        let text = crate::nwka::write_tree(&tree, &crate::nwka::WriteOptions::newick());
        assert_eq!(text, caterpillar(n));
    }

    #[test]
    fn attributes_after_nested_clades() {
        let tree = parse_tree("(((A,B)x:1[&a={1,2}],C)y:2,(D,E)[&b=3]);").unwrap();
        let x = tree.node_by_name("x").unwrap();
        assert_eq!(tree[x].length(), 1.0);
        assert_eq!(tree[x].attributes.get_text("a"), Some("{1,2}"));
        assert_eq!(tree[x].children().len(), 2);
        let y = tree.node_by_name("y").unwrap();
        assert_eq!(tree[y].children().len(), 2);
        assert_eq!(tree[y].length(), 2.0);
        let de = tree[tree.root()].children()[1];
        assert_eq!(tree[de].attributes.get_number("b"), Some(3.0));
        assert_eq!(tree.leaf_names(tree.root()), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn format_errors() {
        assert!(matches!(parse_tree("((A,B);"), Err(NwkaError::UnbalancedParentheses { .. })));
        assert!(matches!(parse_tree("(A,'B);"), Err(NwkaError::UnbalancedParentheses { .. })));
        assert!(matches!(parse_tree("(A,B)'x;"), Err(NwkaError::UnterminatedQuote { .. })));
        assert!(matches!(
            parse_tree("(A,B)[support=high];"),
            Err(NwkaError::InvalidNumber { .. })
        ));
        assert!(matches!(parse_tree("   "), Err(NwkaError::Empty)));
    }

    #[test]
    fn single_tree_guard() {
        assert!(parse_single_tree("(A,B);").is_ok());
        assert!(matches!(
            parse_single_tree("(A,B);(C,D);"),
            Err(NwkaError::MultipleTrees { count: 2 })
        ));
    }
}
