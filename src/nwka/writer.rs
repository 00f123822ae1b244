//! Newick and NWKA serialization.

use crate::attributes::AttributeRef;
use crate::tree::{NodeIndex, Tree};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Output flavour for [`write_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Emit a `[...]` block with support and every custom attribute, and quote
    /// all names.
    pub attributes: bool,
    /// Always single-quote leaf names, even when they need no quoting.
    pub single_quoted: bool,
}

impl WriteOptions {
    /// Plain Newick: names, lengths and internal support labels only.
    pub fn newick() -> Self {
        WriteOptions { attributes: false, single_quoted: false }
    }

    /// Full NWKA with attribute blocks.
    pub fn nwka() -> Self {
        WriteOptions { attributes: true, single_quoted: true }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::nwka()
    }
}

/// Serializes `tree` to a single `;`-terminated line.
///
/// ```
/// # use treenode::nwka::{WriteOptions, parse_tree, write_tree};
/// let tree = parse_tree("((A:1,B:2)0.9:1,C:3);").unwrap();
/// assert_eq!(write_tree(&tree, &WriteOptions::newick()), "((A:1,B:2)0.9:1,C:3);");
/// assert_eq!(
///     write_tree(&tree, &WriteOptions::nwka()),
///     "(('A':1,'B':2):1[Support=0.9],'C':3);"
/// );
/// ```
pub fn write_tree(tree: &Tree, options: &WriteOptions) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), options, &mut out);
    out.push(';');
    out
}

/// Serializes several trees, one per line.
pub fn write_trees<'a>(trees: impl IntoIterator<Item = &'a Tree>, options: &WriteOptions) -> String {
    let mut out = String::new();
    for tree in trees {
        out.push_str(&write_tree(tree, options));
        out.push('\n');
    }
    out
}

/// Writes the sub-tree below `start`; open nodes sit on an explicit stack with the
/// number of children already written.
fn write_node(tree: &Tree, start: NodeIndex, options: &WriteOptions, out: &mut String) {
    let mut stack = vec![(start, 0usize)];
    while let Some((node, written)) = stack.pop() {
        let children = tree[node].children();
        if written < children.len() {
            out.push(if written == 0 { '(' } else { ',' });
            stack.push((node, written + 1));
            stack.push((children[written], 0));
            continue;
        }
        if !children.is_empty() {
            out.push(')');
        }
        write_label(tree, node, options, out);
    }
}

fn write_label(tree: &Tree, node: NodeIndex, options: &WriteOptions, out: &mut String) {
    let current = &tree[node];
    let name = current.name();
    if options.attributes {
        if !name.is_empty() {
            push_quoted(out, name, '\'');
        }
    } else if current.is_leaf() {
        push_name(out, name, options.single_quoted, false);
    } else if !current.support().is_nan() {
        let _ = write!(out, "{}", current.support());
    } else if !name.is_empty() {
        push_name(out, name, false, true);
    }

    let length = current.length();
    if !length.is_nan() {
        let _ = write!(out, ":{length}");
    }

    if options.attributes {
        write_block(current.attributes.support(), current.attributes.custom(), out);
    }
}

fn write_block<'a>(
    support: f64,
    custom: impl Iterator<Item = (&'a str, AttributeRef<'a>)>,
    out: &mut String,
) {
    let mut entries = Vec::new();
    if support >= 0.0 {
        entries.push(format!("Support={support}"));
    }
    for (key, value) in custom {
        let mut entry = String::new();
        match value {
            AttributeRef::Number(n) if n.is_nan() => continue,
            AttributeRef::Text("") => continue,
            AttributeRef::Number(n) => {
                push_escaped_key(&mut entry, key);
                let _ = write!(entry, "={n}");
            }
            AttributeRef::Text(text) => {
                push_escaped_key(&mut entry, key);
                entry.push('=');
                let quote = if text.contains('\'') { '"' } else { '\'' };
                push_quoted(&mut entry, text, quote);
            }
        }
        entries.push(entry);
    }
    if !entries.is_empty() {
        out.push('[');
        out.push_str(&entries.join(","));
        out.push(']');
    }
}

/// True for characters that would be read as structure or dropped outside quotes.
fn needs_quoting(ch: char) -> bool {
    ch.is_whitespace() || "()[]{},:;/=\\'\"".contains(ch)
}

fn push_name(out: &mut String, name: &str, force_quotes: bool, internal: bool) {
    if name.is_empty() {
        return;
    }
    let ambiguous = internal && name.starts_with(|c: char| c.is_ascii_digit());
    if force_quotes || ambiguous || name.chars().any(needs_quoting) {
        push_quoted(out, name, '\'');
    } else {
        out.push_str(name);
    }
}

fn push_quoted(out: &mut String, text: &str, quote: char) {
    out.push(quote);
    for ch in text.chars() {
        if ch == '\\' || ch == quote {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push(quote);
}

fn push_escaped_key(out: &mut String, key: &str) {
    for ch in key.chars() {
        if needs_quoting(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Streams trees to an [`io::Write`], one per line.
#[derive(Debug)]
pub struct NwkaWriter<W> {
    inner: W,
    options: WriteOptions,
    written: usize,
}

impl<W: Write> NwkaWriter<W> {
    pub fn new(inner: W, options: WriteOptions) -> Self {
        NwkaWriter { inner, options, written: 0 }
    }

    pub fn write_tree(&mut self, tree: &Tree) -> io::Result<()> {
        writeln!(self.inner, "{}", write_tree(tree, &self.options))?;
        self.written += 1;
        Ok(())
    }

    /// Number of trees written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
