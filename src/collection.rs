//! Indexed tree collections that may leave trees on disk until they are needed.
//!
//! A [`TreeCollection`] opened from a binary tree file only reads the header and the
//! tree address list. Each tree is decoded when it is first accessed; a tree that is
//! modified or replaced is kept in memory from then on, while untouched trees keep
//! pointing into the file.
//!
//! ```
//! # use treenode::collection::TreeCollection;
//! # use treenode::binary::write_trees;
//! # use treenode::nwka::parse_tree;
//! # use std::io::Cursor;
//! let trees = vec![parse_tree("(A,B);").unwrap(), parse_tree("(C,D);").unwrap()];
//! let bytes = write_trees(Vec::new(), &trees, &[]).unwrap();
//!
//! let mut collection = TreeCollection::from_binary_reader(Cursor::new(bytes)).unwrap();
//! assert_eq!(collection.len(), 2);
//! assert!(!collection.is_loaded(1));
//! collection.get_mut(1).unwrap().set_name("second");
//! assert!(collection.is_loaded(1));
//! assert_eq!(collection.get(1).unwrap().name(), Some("second"));
//! ```

use crate::binary::{BinaryStreamWriter, BinaryTreeMetadata, read_metadata, read_tree_at};
use crate::error::{BinaryError, Error};
use crate::tree::Tree;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// A binary stream shared by all slots that still point into it.
struct StreamSource {
    input: Mutex<Box<dyn ReadSeek>>,
    metadata: BinaryTreeMetadata,
}

impl StreamSource {
    fn read(&self, index: usize) -> Result<Tree, BinaryError> {
        let mut input = self
            .input
            .lock()
            .map_err(|_| BinaryError::Io(io::Error::other("binary source lock poisoned")))?;
        read_tree_at(&mut *input, &self.metadata, index)
    }
}

#[derive(Clone)]
enum Slot {
    Memory(Tree),
    /// Index of the tree in the shared stream.
    Stream(usize),
}

/// Ordered trees, each either in memory or still in a binary stream.
#[derive(Clone, Default)]
pub struct TreeCollection {
    slots: Vec<Slot>,
    source: Option<Arc<StreamSource>>,
}

impl fmt::Debug for TreeCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeCollection")
            .field("len", &self.slots.len())
            .field("loaded", &self.slots.iter().filter(|s| matches!(s, Slot::Memory(_))).count())
            .finish_non_exhaustive()
    }
}

impl TreeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trees(trees: Vec<Tree>) -> Self {
        TreeCollection {
            slots: trees.into_iter().map(Slot::Memory).collect(),
            source: None,
        }
    }

    /// Reads the metadata of a binary stream; trees are decoded on access.
    pub fn from_binary_reader<R>(mut input: R) -> Result<Self, BinaryError>
    where
        R: Read + Seek + Send + 'static,
    {
        let metadata = read_metadata(&mut input)?;
        let slots = (0..metadata.tree_count()).map(Slot::Stream).collect();
        Ok(TreeCollection {
            slots,
            source: Some(Arc::new(StreamSource {
                input: Mutex::new(Box::new(input)),
                metadata,
            })),
        })
    }

    /// Opens a binary tree file.
    pub fn open_binary(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(Self::from_binary_reader(BufReader::new(file))?)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True when tree `index` is held in memory.
    pub fn is_loaded(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Memory(_)))
    }

    fn out_of_range(&self, index: usize) -> BinaryError {
        BinaryError::TreeIndexOutOfRange { index, count: self.slots.len() }
    }

    fn read_stream(&self, index: usize) -> Result<Tree, BinaryError> {
        match &self.source {
            Some(source) => source.read(index),
            None => Err(BinaryError::MissingAddresses("collection has no binary source")),
        }
    }

    /// Tree `index`, borrowed when in memory and decoded otherwise.
    pub fn get(&self, index: usize) -> Result<Cow<'_, Tree>, BinaryError> {
        match self.slots.get(index) {
            Some(Slot::Memory(tree)) => Ok(Cow::Borrowed(tree)),
            Some(Slot::Stream(at)) => Ok(Cow::Owned(self.read_stream(*at)?)),
            None => Err(self.out_of_range(index)),
        }
    }

    /// Mutable access; a tree still in the stream is decoded and kept in memory.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Tree, BinaryError> {
        let at = match self.slots.get(index) {
            Some(Slot::Stream(at)) => Some(*at),
            Some(Slot::Memory(_)) => None,
            None => return Err(self.out_of_range(index)),
        };
        if let Some(at) = at {
            let tree = self.read_stream(at)?;
            self.slots[index] = Slot::Memory(tree);
        }
        match &mut self.slots[index] {
            Slot::Memory(tree) => Ok(tree),
            Slot::Stream(_) => Err(BinaryError::MissingAddresses("tree was not loaded")),
        }
    }

    /// Replaces tree `index`, returning the previous one.
    pub fn set(&mut self, index: usize, tree: Tree) -> Result<Tree, BinaryError> {
        let previous = self.get(index)?.into_owned();
        self.slots[index] = Slot::Memory(tree);
        Ok(previous)
    }

    pub fn push(&mut self, tree: Tree) {
        self.slots.push(Slot::Memory(tree));
    }

    pub fn insert(&mut self, index: usize, tree: Tree) -> Result<(), BinaryError> {
        if index > self.slots.len() {
            return Err(self.out_of_range(index));
        }
        self.slots.insert(index, Slot::Memory(tree));
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Tree, BinaryError> {
        let removed = self.get(index)?.into_owned();
        self.slots.remove(index);
        Ok(removed)
    }

    /// Drops every tree; the stream is released once no slot refers to it.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.source = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Cow<'_, Tree>, BinaryError>> + '_ {
        (0..self.slots.len()).map(move |i| self.get(i))
    }

    /// Every tree, decoding the ones still in the stream.
    pub fn into_trees(self) -> Result<Vec<Tree>, BinaryError> {
        let mut trees = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            trees.push(match slot {
                Slot::Memory(tree) => tree.clone(),
                Slot::Stream(at) => self.read_stream(*at)?,
            });
        }
        Ok(trees)
    }

    /// Streams the collection to `out` in the binary format, one tree at a time.
    pub fn write_binary<W: Write>(&self, out: W) -> Result<W, BinaryError> {
        let mut writer = BinaryStreamWriter::begin(out)?;
        for tree in self.iter() {
            writer.push_tree(&*tree?)?;
        }
        writer.finish(&[])
    }
}

impl From<Vec<Tree>> for TreeCollection {
    fn from(trees: Vec<Tree>) -> Self {
        Self::from_trees(trees)
    }
}

impl FromIterator<Tree> for TreeCollection {
    fn from_iter<I: IntoIterator<Item = Tree>>(iter: I) -> Self {
        Self::from_trees(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::write_trees;
    use crate::nwka::parse_tree;
    use std::io::Cursor;

    fn sample() -> Vec<Tree> {
        ["((A:1,B:2):1,C:3);", "((A,C),B);", "(A,(B,C));"]
            .iter()
            .map(|t| parse_tree(t).unwrap())
            .collect()
    }

    fn streamed() -> TreeCollection {
        let bytes = write_trees(Vec::new(), &sample(), &[]).unwrap();
        TreeCollection::from_binary_reader(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn stream_slots_decode_on_access() {
        let collection = streamed();
        let trees = sample();
        assert_eq!(collection.len(), 3);
        assert!((0..3).all(|i| !collection.is_loaded(i)));
        assert!(matches!(collection.get(2).unwrap(), Cow::Owned(_)));
        assert_eq!(*collection.get(2).unwrap(), trees[2]);
        assert!(!collection.is_loaded(2));
        let all: Vec<Tree> = collection.iter().map(|t| t.unwrap().into_owned()).collect();
        assert_eq!(all, trees);
    }

    #[test]
    fn edits_promote_single_slots() {
        let mut collection = streamed();
        let root = collection.get_mut(0).unwrap().root();
        collection.get_mut(0).unwrap().attributes_mut(root).insert("edited", 1.0);
        assert!(collection.is_loaded(0));
        assert!(!collection.is_loaded(1));
        assert!(matches!(collection.get(0).unwrap(), Cow::Borrowed(_)));

        let replaced = collection.set(1, parse_tree("(X,Y);").unwrap()).unwrap();
        assert_eq!(replaced, sample()[1]);
        let removed = collection.remove(2).unwrap();
        assert_eq!(removed, sample()[2]);
        collection.push(parse_tree("(Z,W);").unwrap());

        let trees = collection.into_trees().unwrap();
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[0].attributes(trees[0].root()).get_number("edited"), Some(1.0));
        assert_eq!(trees[1].leaf_names(trees[1].root()), vec!["X", "Y"]);
        assert_eq!(trees[2].leaf_names(trees[2].root()), vec!["Z", "W"]);
    }

    #[test]
    fn memory_collection_and_range_errors() {
        let mut collection: TreeCollection = sample().into_iter().collect();
        assert!(collection.is_loaded(0));
        assert!(matches!(
            collection.get(3),
            Err(BinaryError::TreeIndexOutOfRange { index: 3, count: 3 })
        ));
        assert!(collection.insert(5, Tree::new()).is_err());
        collection.insert(0, parse_tree("(P,Q);").unwrap()).unwrap();
        assert_eq!(collection.len(), 4);
        collection.clear();
        assert!(collection.is_empty());
    }

    #[test]
    fn write_binary_mixes_memory_and_stream() {
        let mut collection = streamed();
        collection.set(0, parse_tree("(X,Y);").unwrap()).unwrap();
        let bytes = collection.write_binary(Vec::new()).unwrap();
        let copy = TreeCollection::from_binary_reader(Cursor::new(bytes)).unwrap();
        let trees = copy.into_trees().unwrap();
        assert_eq!(trees[0], parse_tree("(X,Y);").unwrap());
        assert_eq!(trees[1..], sample()[1..]);
    }
}
