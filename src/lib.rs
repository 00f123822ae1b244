//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `attributes`: per-node attribute dictionary with the reserved `Name`, `Length`, `Support` keys.
//! - `tree`: arena-backed rooted tree, structural edits, queries and splits.
//! - `tokenizer`: quote-aware character stream reader shared by the text codec.
//! - `nwka`: Newick / NWKA parsing and writing, single trees and streams.
//! - `binary`: the seekable binary tree format (reader, batch and streamed writers).
//! - `collection`: tree collections kept in memory or left in a binary stream.
//! - `bitset`: compact bitset representation for tree partitions.
//! - `snapshot`: flat split store for efficient distance calculations.
//! - `distances`: parallel RF / weighted RF / edge-length distance matrices.
//! - `consensus`: threshold consensus trees.
//! - `io`: file helpers (format detection, gzip, TSV matrices).
//! - `error`: error types.

pub mod attributes;
pub mod binary;
pub mod bitset;
pub mod collection;
pub mod consensus;
pub mod distances;
pub mod error;
pub mod io;
pub mod nwka;
pub mod snapshot;
pub mod tokenizer;
pub mod tree;

// Re-export frequently used types & functions
pub use attributes::{AttributeValue, Attributes};
pub use bitset::Bitset;
pub use collection::TreeCollection;
pub use consensus::{ConsensusOptions, consensus};
pub use distances::{DistanceMatrices, DistanceOptions, PruneMode, fill_distance_matrix};
pub use error::{Error, Result};
pub use io::{read_trees_file, write_matrix_tsv};
pub use nwka::{WriteOptions, parse_tree, write_tree};
pub use snapshot::SplitStore;
pub use tree::{NodeId, NodeIndex, Tree, TreeNode};
