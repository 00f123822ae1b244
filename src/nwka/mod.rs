//! NWKA: Newick with bracketed key/value attributes.
//!
//! NWKA extends Newick with `[key=value,...]` blocks after a node's name and
//! length, in the style used by BEAST and MrBayes (`[&rate=0.1]`). Plain Newick
//! reads as NWKA without attributes.
//!
//! - [`parse_tree`] / [`parse_single_tree`]: one tree from a string
//! - [`parse_trees`] / [`NwkaReader`]: lazy multi-tree parsing from text or a reader
//! - [`write_tree`] / [`NwkaWriter`]: serialization in Newick or NWKA flavour

mod parser;
mod reader;
mod writer;

pub use parser::{parse_single_tree, parse_tree};
pub use reader::{NwkaReader, parse_trees, read_trees};
pub use writer::{NwkaWriter, WriteOptions, write_tree, write_trees};
