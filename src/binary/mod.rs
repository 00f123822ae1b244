//! Seekable binary tree format.
//!
//! # Layout
//! ```text
//! +----------------------+
//! | #TRE (23 54 52 45)   |
//! | flags                |  bit0 global names, bit1 global attributes
//! +----------------------+
//! | global names         |  int count, strings          (flag bit0)
//! | global attributes    |  int count, (string, kind)   (flag bit1)
//! +----------------------+
//! | tree 0               |  attribute table or 0, topology, node attributes
//! | tree 1               |
//! | ...                  |
//! +----------------------+
//! | additional data      |  opaque bytes
//! +----------------------+
//! | int count            |  ← trailer address
//! | i64 × count          |  tree addresses
//! | i64                  |  trailer address
//! | END\xFF              |
//! +----------------------+
//! ```
//!
//! Trees can be read by index without touching the others. A file whose trailer is
//! missing (say, a truncated stream) can still be read front to back.

mod primitives;
mod reader;
mod writer;

pub use primitives::{CountingWriter, ShortIntReader, ShortIntWriter};
pub use reader::{
    BinaryTreeIter, BinaryTreeMetadata, read_additional_data, read_all_trees, read_metadata,
    read_tree, read_tree_at,
};
pub use writer::{BinaryStreamWriter, write_trees};

use crate::attributes::{AttributeRef, Attributes, NAME};
use crate::tree::Tree;
use std::collections::HashMap;

/// Magic bytes at the start of every binary tree stream.
pub const MAGIC: [u8; 4] = *b"#TRE";

/// Magic bytes closing the trailer.
pub const END_MAGIC: [u8; 4] = [b'E', b'N', b'D', 0xFF];

const GLOBAL_NAMES: u8 = 0b01;
const GLOBAL_ATTRIBUTES: u8 = 0b10;

/// Name index byte announcing a literal name string.
const LITERAL_NAME: u8 = 255;

/// Value type of an attribute table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Text,
    Number,
}

impl AttributeKind {
    fn code(self) -> usize {
        match self {
            AttributeKind::Text => 1,
            AttributeKind::Number => 2,
        }
    }

    fn from_code(code: usize) -> Option<Self> {
        match code {
            1 => Some(AttributeKind::Text),
            2 => Some(AttributeKind::Number),
            _ => None,
        }
    }

    fn of(value: &AttributeRef<'_>) -> Self {
        match value {
            AttributeRef::Number(_) => AttributeKind::Number,
            AttributeRef::Text(_) => AttributeKind::Text,
        }
    }
}

/// One entry of an attribute table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
}

impl AttributeSpec {
    fn is_name(&self) -> bool {
        self.kind == AttributeKind::Text && self.name.eq_ignore_ascii_case(NAME)
    }
}

/// Ordered attribute table; entries are unique by (case-insensitive name, kind).
#[derive(Debug, Clone, Default)]
pub(crate) struct AttributeTable {
    entries: Vec<AttributeSpec>,
    lookup: HashMap<(String, AttributeKind), usize>,
}

impl AttributeTable {
    /// Every (key, kind) used by any node of `tree`, in first-seen pre-order.
    fn of_tree(tree: &Tree) -> Self {
        let mut table = AttributeTable::default();
        for node in tree.preorder(tree.root()) {
            table.extend(&tree[node].attributes);
        }
        table
    }

    fn extend(&mut self, attributes: &Attributes) {
        for (key, value) in attributes.iter() {
            self.insert(key, AttributeKind::of(&value));
        }
    }

    /// Adds an entry, returning `true` when it was not there yet.
    fn insert(&mut self, name: &str, kind: AttributeKind) -> bool {
        let key = (name.to_ascii_lowercase(), kind);
        if self.lookup.contains_key(&key) {
            return false;
        }
        self.lookup.insert(key, self.entries.len());
        self.entries.push(AttributeSpec { name: name.to_string(), kind });
        true
    }

    fn position(&self, name: &str, kind: AttributeKind) -> Option<usize> {
        self.lookup.get(&(name.to_ascii_lowercase(), kind)).copied()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> &[AttributeSpec] {
        &self.entries
    }
}

/// Ordered table of distinct node names.
#[derive(Debug, Clone, Default)]
pub(crate) struct NameTable {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl NameTable {
    fn insert(&mut self, name: &str) -> bool {
        if self.lookup.contains_key(name) {
            return false;
        }
        self.lookup.insert(name.to_string(), self.names.len());
        self.names.push(name.to_string());
        true
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}
