//! Error types for the tree toolkit.
//!
//! Every fallible operation returns a structured error instead of panicking.
//! Format errors carry the byte position at which the input stopped making sense.

use thiserror::Error;

/// Top-level error type.
///
/// Each variant wraps the error of one failure domain:
/// - NWKA: textual tree parsing
/// - Binary: the seekable binary tree format
/// - Tree: structural operations on a tree
/// - Distance: bulk distance and consensus computation
#[derive(Debug, Error)]
pub enum Error {
    #[error("NWKA error: {0}")]
    Nwka(#[from] NwkaError),

    #[error("binary tree format error: {0}")]
    Binary(#[from] BinaryError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("distance error: {0}")]
    Distance(#[from] DistanceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid option combination supplied by the caller.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while parsing NWKA / Newick text.
#[derive(Debug, Error)]
pub enum NwkaError {
    #[error("empty tree string")]
    Empty,

    #[error("unbalanced parentheses: expected ')' before byte {position}")]
    UnbalancedParentheses { position: usize },

    #[error("unterminated quote opened in attributes ending at byte {position}")]
    UnterminatedQuote { position: usize },

    #[error("attribute '{attribute}' expects a number, found '{value}'")]
    InvalidNumber { attribute: String, value: String },

    #[error("expected a single tree, found {count}")]
    MultipleTrees { count: usize },

    #[error("I/O error while reading trees: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the binary tree codec.
#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("invalid header: expected #TRE, found {found:02X?}")]
    InvalidHeader { found: [u8; 4] },

    #[error("invalid header flags {flags:#010b}")]
    InvalidFlags { flags: u8 },

    #[error("unexpected end of stream at byte {position}")]
    UnexpectedEof { position: u64 },

    #[error("attribute index {index} out of range ({available} attributes) at byte {position}")]
    InvalidAttributeIndex { index: u32, available: usize, position: u64 },

    #[error("name index {index} out of range ({available} names) at byte {position}")]
    InvalidNameIndex { index: u32, available: usize, position: u64 },

    #[error("unknown attribute type {kind} at byte {position}")]
    InvalidAttributeKind { kind: u32, position: u64 },

    #[error("invalid UTF-16 string at byte {position}")]
    InvalidString { position: u64 },

    #[error("value {value} does not fit the variable-width integer encoding")]
    IntegerOverflow { value: u64 },

    #[error("tree index {index} out of range ({count} trees)")]
    TreeIndexOutOfRange { index: usize, count: usize },

    #[error("no tree addresses available: {0}")]
    MissingAddresses(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by structural tree operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node index {0} does not belong to this tree")]
    NodeNotFound(usize),

    #[error("nodes {0} and {1} share no common ancestor")]
    DisconnectedNodes(usize, usize),

    #[error("cannot remove the root node")]
    RemoveRoot,
}

/// Errors raised by the distance engine and consensus builder.
#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("tree {tree} contains a leaf without a name")]
    UnnamedLeaf { tree: usize },

    #[error("tree {tree} contains leaf {name:?} more than once")]
    DuplicateLeaf { tree: usize, name: String },

    #[error("no trees supplied")]
    NoTrees,

    #[error("threshold {0} outside [0, 1]")]
    InvalidThreshold(f64),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
