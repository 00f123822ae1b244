//! Splitting a text stream into `;`-terminated trees.

use super::parse_tree;
use crate::error::NwkaError;
use crate::tokenizer::{CharSource, ReaderSource, StrSource, TokenizerState, next_token};
use crate::tree::Tree;
use std::io::BufRead;
use tracing::warn;

/// Lazily parses consecutive trees from a character source.
///
/// Each tree ends at an unquoted, unescaped `;`. Text before the first `(` of a
/// tree is taken as its name and stored in the root's `TreeName` attribute. After
/// the first error the iterator yields that error and then stops.
#[derive(Debug)]
pub struct NwkaReader<S> {
    source: S,
    state: TokenizerState,
    index: usize,
    failed: bool,
}

impl<R: BufRead> NwkaReader<ReaderSource<R>> {
    pub fn new(reader: R) -> Self {
        Self::with_source(ReaderSource::new(reader))
    }
}

impl<'a> NwkaReader<StrSource<'a>> {
    pub fn from_text(text: &'a str) -> Self {
        Self::with_source(StrSource::new(text))
    }
}

impl<S: CharSource> NwkaReader<S> {
    pub fn with_source(source: S) -> Self {
        NwkaReader { source, state: TokenizerState::default(), index: 0, failed: false }
    }

    /// Collects the significant characters of the next tree, `;` excluded.
    fn next_text(&mut self) -> Option<String> {
        let mut text = String::new();
        while let Some(token) = next_token(&mut self.source, &mut self.state) {
            if token.ch == ';' && token.is_structural() {
                return Some(text);
            }
            text.push(token.ch);
        }
        (!text.is_empty()).then_some(text)
    }
}

/// Parses one tree's text, moving any leading name into `TreeName`.
fn parse_named(text: &str) -> Result<Tree, NwkaError> {
    let (name, body) = match text.find('(') {
        Some(open) => (text[..open].trim(), &text[open..]),
        None => ("", text),
    };
    let name = ['\'', '"']
        .iter()
        .find_map(|&q| name.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(name);
    let mut tree = parse_tree(body)?;
    if !name.is_empty() && tree.name().is_none() {
        tree.set_name(name);
    }
    Ok(tree)
}

impl<S: CharSource> Iterator for NwkaReader<S> {
    type Item = Result<Tree, NwkaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = loop {
            match self.next_text() {
                Some(text) if text.trim().is_empty() => continue,
                Some(text) => break parse_named(&text),
                None => return None,
            }
        };
        self.index += 1;
        if let Err(e) = &result {
            warn!(tree = self.index, error = %e, "stopping after malformed tree");
            self.failed = true;
        }
        Some(result)
    }
}

impl<R: BufRead> NwkaReader<ReaderSource<R>> {
    /// Returns a read error that ended the stream early, if any.
    pub fn take_error(&mut self) -> Option<NwkaError> {
        self.source.take_error().map(NwkaError::from)
    }
}

/// Parses every tree in `text`.
///
/// # Example
/// ```
/// # use treenode::nwka::parse_trees;
/// let trees: Vec<_> = parse_trees("first(A,B);\nsecond(C,D);")
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(trees.len(), 2);
/// assert_eq!(trees[1].name(), Some("second"));
/// ```
pub fn parse_trees(text: &str) -> NwkaReader<StrSource<'_>> {
    NwkaReader::from_text(text)
}

/// Reads every tree from a buffered reader, failing on the first malformed one
/// or on a read error.
pub fn read_trees<R: BufRead>(reader: R) -> Result<Vec<Tree>, NwkaError> {
    let mut trees = NwkaReader::new(reader);
    let parsed = trees.by_ref().collect::<Result<Vec<_>, _>>()?;
    match trees.take_error() {
        Some(e) => Err(e),
        None => Ok(parsed),
    }
}
