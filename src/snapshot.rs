//! Flat split store for many trees over one leaf universe.
//!
//! # Overview
//! Every branch of every tree is encoded once as a bitset over the sorted union of
//! all leaf names. The bitsets live back to back in a single `Vec<u64>`; each tree
//! keeps the offset and count of its splits, their branch lengths, and a mask of
//! the leaves it contains. The store is built single-threaded and then shared
//! read-only between comparison workers.
//!
//! # Why names, not node indices
//! Arena indices depend on parse order and differ across trees. Leaf names are
//! consistent, so identical taxa map to the same bit in every tree.
//!
//! ```text
//!        root                 universe: A=0 B=1 C=2 D=3
//!       /    \
//!    x:0.5    D:1             splits (pre-order, root skipped):
//!    /   \                      x  → 0b0111  length 0.5
//!   A:1  n:2                    A  → 0b0001  length 1
//!        / \                    n  → 0b0110  length 2
//!      B:1  C:1                 B  → 0b0010  ...
//! ```

use crate::bitset::{Bitset, words_for};
use crate::error::DistanceError;
use crate::tree::Tree;
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Sorted union of the leaf names of `trees`.
///
/// A leaf name is a bit in every split, so each tree must name its leaves
/// uniquely.
pub(crate) fn leaf_universe<T: Borrow<Tree>>(trees: &[T]) -> Result<Vec<String>, DistanceError> {
    let mut names = BTreeSet::new();
    for (i, tree) in trees.iter().enumerate() {
        let tree = tree.borrow();
        let mut seen = HashSet::new();
        for name in tree.leaf_names(tree.root()) {
            if name.is_empty() {
                return Err(DistanceError::UnnamedLeaf { tree: i });
            }
            if !seen.insert(name) {
                return Err(DistanceError::DuplicateLeaf { tree: i, name: name.to_string() });
            }
            names.insert(name);
        }
    }
    Ok(names.into_iter().map(String::from).collect())
}

/// Per-tree view into a [`SplitStore`].
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Index of the tree's first split in the store.
    first: usize,
    /// Branch length of each split, unspecified lengths as 0.
    pub lengths: Vec<f64>,
    /// Leaves present in this tree.
    pub leaf_mask: Bitset,
}

impl TreeSnapshot {
    /// Number of splits, leaf branches included.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

/// Split bitsets of a set of trees, stored in one flat buffer.
#[derive(Debug, Clone)]
pub struct SplitStore {
    leaves: Vec<String>,
    words: usize,
    bits: Vec<u64>,
    trees: Vec<TreeSnapshot>,
}

impl SplitStore {
    /// Encodes every non-root branch of every tree.
    ///
    /// # Errors
    /// [`DistanceError::UnnamedLeaf`] when a tree has a leaf without a name,
    /// [`DistanceError::DuplicateLeaf`] when one tree uses a leaf name twice.
    pub fn build<T: Borrow<Tree>>(trees: &[T]) -> Result<Self, DistanceError> {
        // Step 1: sorted union of leaf names
        let leaves = leaf_universe(trees)?;
        let index: HashMap<&str, usize> =
            leaves.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let words = words_for(leaves.len()).max(1);

        // Step 2: bottom-up bitsets per tree, emitted in pre-order
        let mut bits = Vec::new();
        let mut snapshots = Vec::with_capacity(trees.len());
        let mut first = 0;
        for tree in trees {
            let tree = tree.borrow();
            let order: Vec<usize> = tree.preorder(tree.root()).collect();
            let mut node_bits = vec![0u64; tree.len() * words];
            let mut leaf_mask = Bitset::zeros(words);

            for &node in order.iter().rev() {
                let here = node * words;
                if tree[node].is_leaf() {
                    // names were validated above
                    if let Some(&leaf) = index.get(tree[node].name()) {
                        node_bits[here + (leaf >> 6)] |= 1u64 << (leaf & 63);
                        leaf_mask.set(leaf);
                    }
                } else {
                    for &child in tree[node].children() {
                        for w in 0..words {
                            node_bits[here + w] |= node_bits[child * words + w];
                        }
                    }
                }
            }

            let mut lengths = Vec::with_capacity(order.len().saturating_sub(1));
            for &node in order.iter().filter(|&&n| n != tree.root()) {
                bits.extend_from_slice(&node_bits[node * words..(node + 1) * words]);
                let length = tree[node].length();
                lengths.push(if length.is_nan() { 0.0 } else { length });
            }
            let count = lengths.len();
            snapshots.push(TreeSnapshot { first, lengths, leaf_mask });
            first += count;
        }

        debug!(
            trees = snapshots.len(),
            leaves = leaves.len(),
            splits = first,
            "built split store"
        );
        Ok(SplitStore { leaves, words, bits, trees: snapshots })
    }

    /// The sorted leaf universe; bit `i` stands for `leaves()[i]`.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// Words per split bitset.
    pub fn words(&self) -> usize {
        self.words
    }

    /// Number of trees.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn tree(&self, index: usize) -> &TreeSnapshot {
        &self.trees[index]
    }

    /// Bitset words of split `split` of tree `tree`.
    #[inline]
    pub fn split(&self, tree: usize, split: usize) -> &[u64] {
        let start = (self.trees[tree].first + split) * self.words;
        &self.bits[start..start + self.words]
    }

    /// Leaves present in every tree.
    pub fn global_mask(&self) -> Bitset {
        let mut mask = Bitset::ones(self.words, self.leaves.len());
        for tree in &self.trees {
            mask.and_assign(&tree.leaf_mask);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwka::parse_tree;

    /// Same tree as in the module diagram.
    #[test]
    fn splits_follow_preorder() {
        let tree = parse_tree("((A:1,(B:1,C:1)n:2)x:0.5,D:1);").unwrap();
        let store = SplitStore::build(&[tree]).unwrap();
        assert_eq!(store.leaves(), &["A", "B", "C", "D"]);
        assert_eq!(store.words(), 1);

        let snap = store.tree(0);
        assert_eq!(snap.len(), 6);
        assert_eq!(store.split(0, 0), &[0b0111]);
        assert_eq!(store.split(0, 1), &[0b0001]);
        assert_eq!(store.split(0, 2), &[0b0110]);
        assert_eq!(store.split(0, 5), &[0b1000]);
        assert_eq!(snap.lengths, vec![0.5, 1.0, 2.0, 1.0, 1.0, 1.0]);
        assert_eq!(snap.leaf_mask.0, vec![0b1111]);
    }

    #[test]
    fn shared_universe_and_masks() {
        let a = parse_tree("((A,B),C);").unwrap();
        let b = parse_tree("((B,D),(C,E));").unwrap();
        let store = SplitStore::build(&[a, b]).unwrap();
        assert_eq!(store.leaves(), &["A", "B", "C", "D", "E"]);
        assert_eq!(store.tree(0).leaf_mask.0, vec![0b00111]);
        assert_eq!(store.tree(1).leaf_mask.0, vec![0b11110]);
        assert_eq!(store.global_mask().0, vec![0b00110]);
        // second tree's splits start after the first tree's four
        assert_eq!(store.split(1, 0), &[0b01010]);
        // missing lengths are stored as zero
        assert!(store.tree(1).lengths.iter().all(|&l| l == 0.0));
    }

    #[test]
    fn unnamed_leaf_is_rejected() {
        let a = parse_tree("(A,B);").unwrap();
        let b = parse_tree("(A,(B,));").unwrap();
        assert!(matches!(
            SplitStore::build(&[a, b]),
            Err(DistanceError::UnnamedLeaf { tree: 1 })
        ));
    }

    #[test]
    fn repeated_leaf_is_rejected() {
        let a = parse_tree("((A,B),C);").unwrap();
        let b = parse_tree("((A,B),(A,C));").unwrap();
        match SplitStore::build(&[a, b]) {
            Err(DistanceError::DuplicateLeaf { tree, name }) => {
                assert_eq!(tree, 1);
                assert_eq!(name, "A");
            }
            other => panic!("expected a duplicate leaf error, got {other:?}"),
        }
    }
}
