//! Bipartitions induced by tree branches.
//!
//! Every non-root node splits the leaves into the ones below it (`side`) and the
//! rest (`complement`). Splits taken from a rooted tree carry a root marker on the
//! complement side, which turns unrooted compatibility into clade compatibility.

use super::{NodeIndex, Tree};
use itertools::Itertools;
use std::cmp::Ordering;
use std::ops::Range;

/// What a split's `length` measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthType {
    /// Length of the branch above the node.
    #[default]
    Length,
    /// Age of the node (mean distance to its leaves).
    Age,
}

/// Hashable topology of a split, ignoring lengths and support.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SplitKey {
    side: Vec<String>,
    /// Empty for rooted splits: a clade is identified by its own leaves.
    other: Vec<String>,
    rooted: bool,
}

/// A bipartition of leaf names with the length and support of its branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    side: Vec<String>,
    complement: Vec<String>,
    rooted: bool,
    pub length: f64,
    pub support: f64,
    pub length_type: LengthType,
}

impl Split {
    /// Creates a split; both sides are sorted.
    pub fn new(
        mut side: Vec<String>,
        mut complement: Vec<String>,
        rooted: bool,
        length: f64,
        support: f64,
        length_type: LengthType,
    ) -> Self {
        side.sort();
        complement.sort();
        Split { side, complement, rooted, length, support, length_type }
    }

    pub fn side(&self) -> &[String] {
        &self.side
    }

    pub fn complement(&self) -> &[String] {
        &self.complement
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    pub fn is_trivial(&self) -> bool {
        self.side.len() <= 1 || (!self.rooted && self.complement.len() <= 1)
    }

    /// The same bipartition without the root marker.
    pub fn unrooted(&self) -> Split {
        Split { rooted: false, ..self.clone() }
    }

    pub fn key(&self) -> SplitKey {
        if self.rooted {
            return SplitKey { side: self.side.clone(), other: Vec::new(), rooted: true };
        }
        let (side, other) = match self.side.cmp(&self.complement) {
            Ordering::Greater => (&self.complement, &self.side),
            _ => (&self.side, &self.complement),
        };
        SplitKey { side: side.clone(), other: other.clone(), rooted: false }
    }

    /// Canonical textual name: `A,B|C,D` for unrooted splits, `A,B|@` for clades.
    pub fn name(&self) -> String {
        let key = self.key();
        if key.rooted {
            format!("{}|@", key.side.iter().join(","))
        } else {
            format!("{}|{}", key.side.iter().join(","), key.other.iter().join(","))
        }
    }

    /// Two splits can coexist in one tree when at least one of the four pairwise
    /// intersections of their sides is empty. With both splits rooted the two
    /// complements always share the root, so the test reduces to nested or
    /// disjoint clades.
    pub fn is_compatible(&self, other: &Split) -> bool {
        disjoint(&self.side, &other.side)
            || disjoint(&self.side, &other.complement)
            || disjoint(&self.complement, &other.side)
            || (!(self.rooted && other.rooted) && disjoint(&self.complement, &other.complement))
    }
}

/// Merge-walks two sorted name lists.
fn disjoint(a: &[String], b: &[String]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => return false,
        }
    }
    true
}

impl Tree {
    /// The rooted split induced by the branch above `node`; `None` for the root.
    pub fn split(&self, node: NodeIndex, length_type: LengthType) -> Option<Split> {
        self.get(node)?.parent?;
        let all = self.leaves(self.root);
        let below = self.leaves(node);
        let start = below.first().and_then(|first| all.iter().position(|l| l == first)).unwrap_or(0);
        Some(self.split_of_run(node, &all, start..start + below.len(), length_type))
    }

    /// Rooted splits for every non-root node, in pre-order.
    ///
    /// Leaf branches are included as one-leaf splits.
    pub fn splits(&self, length_type: LengthType) -> Vec<Split> {
        let order: Vec<NodeIndex> = self.preorder(self.root).collect();
        let all: Vec<NodeIndex> = order.iter().copied().filter(|&n| self.nodes[n].is_leaf()).collect();

        // the leaves below a node are a contiguous run of the pre-order leaf list
        let mut first = vec![0usize; self.nodes.len()];
        let mut seen = 0;
        for &node in &order {
            first[node] = seen;
            if self.nodes[node].is_leaf() {
                seen += 1;
            }
        }
        let mut count = vec![0usize; self.nodes.len()];
        for &node in order.iter().rev() {
            count[node] = if self.nodes[node].is_leaf() {
                1
            } else {
                self.nodes[node].children.iter().map(|&c| count[c]).sum()
            };
        }

        order
            .iter()
            .filter(|&&n| n != self.root)
            .map(|&node| self.split_of_run(node, &all, first[node]..first[node] + count[node], length_type))
            .collect()
    }

    fn split_of_run(
        &self,
        node: NodeIndex,
        all: &[NodeIndex],
        run: Range<usize>,
        length_type: LengthType,
    ) -> Split {
        let names = |leaves: &[NodeIndex]| {
            leaves
                .iter()
                .map(|&l| self.nodes[l].name().to_string())
                .collect::<Vec<_>>()
        };
        let mut outside = names(&all[..run.start]);
        outside.extend(names(&all[run.end..]));
        let length = match length_type {
            LengthType::Length => self.nodes[node].length(),
            LengthType::Age => self.age(node),
        };
        Split::new(
            names(&all[run]),
            outside,
            true,
            length,
            self.nodes[node].support(),
            length_type,
        )
    }
}
