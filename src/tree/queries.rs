//! Ancestry, path length and node age queries.

use super::{NodeIndex, Tree};
use crate::error::TreeError;
use std::collections::HashMap;

/// How the first node of a path query relates to the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relationship {
    /// Resolve the relationship before measuring.
    #[default]
    Unknown,
    /// The first node is an ancestor of the second.
    Ancestor,
    /// The first node is a descendant of the second.
    Descendant,
    /// Neither is an ancestor of the other.
    Relatives,
}

impl Tree {
    fn check(&self, index: NodeIndex) -> Result<(), TreeError> {
        if index < self.nodes.len() {
            Ok(())
        } else {
            Err(TreeError::NodeNotFound(index))
        }
    }

    /// Nodes from `node` up to the root, `node` first.
    pub fn ancestors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        let mut current = Some(node).filter(|&n| n < self.nodes.len());
        while let Some(n) = current {
            chain.push(n);
            current = self.nodes[n].parent;
        }
        chain
    }

    /// True when `ancestor` lies on the path from `node` to the root (inclusive).
    pub fn is_ancestor(&self, ancestor: NodeIndex, node: NodeIndex) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    /// Deepest node whose descendants include every node in `nodes`.
    ///
    /// Returns `None` for an empty input or when some index is not in the tree.
    pub fn last_common_ancestor(&self, nodes: &[NodeIndex]) -> Option<NodeIndex> {
        let (&seed, rest) = nodes.split_first()?;
        if nodes.iter().any(|&n| n >= self.nodes.len()) {
            return None;
        }
        let chain = self.ancestors(seed);
        let depth_in_chain: HashMap<NodeIndex, usize> =
            chain.iter().enumerate().map(|(d, &n)| (n, d)).collect();

        let mut highest = 0;
        for &target in rest {
            let meet = self
                .ancestors(target)
                .into_iter()
                .find_map(|n| depth_in_chain.get(&n).copied())?;
            highest = highest.max(meet);
        }
        Some(chain[highest])
    }

    /// Last common ancestor of the first nodes carrying each of `names`.
    pub fn last_common_ancestor_of_names(&self, names: &[&str]) -> Option<NodeIndex> {
        let nodes = names
            .iter()
            .map(|name| self.node_by_name(name))
            .collect::<Option<Vec<_>>>()?;
        self.last_common_ancestor(&nodes)
    }

    /// Sum of branch lengths on the path between `a` and `b`.
    ///
    /// Unspecified (`NaN`) lengths count as zero. A `relationship` other than
    /// [`Relationship::Unknown`] skips the ancestry check; a wrong hint yields
    /// [`TreeError::DisconnectedNodes`].
    pub fn path_length(
        &self,
        a: NodeIndex,
        b: NodeIndex,
        relationship: Relationship,
    ) -> Result<f64, TreeError> {
        self.check(a)?;
        self.check(b)?;
        if a == b {
            return Ok(0.0);
        }

        let relationship = match relationship {
            Relationship::Unknown if self.is_ancestor(a, b) => Relationship::Ancestor,
            Relationship::Unknown if self.is_ancestor(b, a) => Relationship::Descendant,
            Relationship::Unknown => Relationship::Relatives,
            known => known,
        };

        match relationship {
            Relationship::Ancestor => self.upward_length(b, a),
            Relationship::Descendant => self.upward_length(a, b),
            _ => {
                let lca = self
                    .last_common_ancestor(&[a, b])
                    .ok_or(TreeError::DisconnectedNodes(a, b))?;
                Ok(self.upward_length(a, lca)? + self.upward_length(b, lca)?)
            }
        }
    }

    fn upward_length(&self, from: NodeIndex, to: NodeIndex) -> Result<f64, TreeError> {
        let mut total = 0.0;
        let mut current = from;
        while current != to {
            let length = self.nodes[current].length();
            if !length.is_nan() {
                total += length;
            }
            current = self.nodes[current]
                .parent
                .ok_or(TreeError::DisconnectedNodes(from, to))?;
        }
        Ok(total)
    }

    /// Distance from `start` to each leaf below it, in pre-order of the leaves.
    pub fn leaf_distances(&self, start: NodeIndex) -> Vec<(NodeIndex, f64)> {
        let mut depth = HashMap::new();
        let mut out = Vec::new();
        for node in self.preorder(start) {
            let here = if node == start {
                0.0
            } else {
                let parent = self.nodes[node].parent.map_or(0.0, |p| depth[&p]);
                let length = self.nodes[node].length();
                parent + if length.is_nan() { 0.0 } else { length }
            };
            depth.insert(node, here);
            if self.nodes[node].is_leaf() {
                out.push((node, here));
            }
        }
        out
    }

    /// Age of a node: mean distance from the node to the leaves below it.
    pub fn age(&self, node: NodeIndex) -> f64 {
        let distances = self.leaf_distances(node);
        if distances.is_empty() {
            return f64::NAN;
        }
        distances.iter().map(|(_, d)| d).sum::<f64>() / distances.len() as f64
    }

    /// True when every branch length is specified and all root-to-tip distances
    /// agree within `tolerance`, relative to the longest one.
    pub fn is_clock_like(&self, tolerance: f64) -> bool {
        let specified = self
            .preorder(self.root)
            .filter(|&i| i != self.root)
            .all(|i| !self.nodes[i].length().is_nan());
        if !specified {
            return false;
        }
        let distances = self.leaf_distances(self.root);
        let (min, max) = distances
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, d)| (lo.min(d), hi.max(d)));
        max - min <= tolerance * max.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwka::parse_tree;

    /// ```text
    ///            root
    ///          /      \
    ///        x:1       C:2
    ///       /   \
    ///    A:1     y:1
    ///           /   \
    ///         B:1   D:1
    /// ```
    fn tree() -> Tree {
        parse_tree("((A:1,(B:1,D:1)y:1)x:1,C:2);").unwrap()
    }

    #[test]
    fn lca_of_leaves() {
        let t = tree();
        let b = t.node_by_name("B").unwrap();
        let d = t.node_by_name("D").unwrap();
        let a = t.node_by_name("A").unwrap();
        assert_eq!(t.last_common_ancestor(&[b, d]), t.node_by_name("y"));
        assert_eq!(t.last_common_ancestor(&[b, a]), t.node_by_name("x"));
        assert_eq!(t.last_common_ancestor(&[b]), Some(b));
        assert_eq!(t.last_common_ancestor_of_names(&["A", "C"]), Some(t.root()));
        assert_eq!(t.last_common_ancestor_of_names(&["A", "Z"]), None);
        assert_eq!(t.last_common_ancestor(&[]), None);
    }

    #[test]
    fn path_lengths() {
        let t = tree();
        let b = t.node_by_name("B").unwrap();
        let c = t.node_by_name("C").unwrap();
        let x = t.node_by_name("x").unwrap();
        assert_eq!(t.path_length(b, c, Relationship::Unknown).unwrap(), 5.0);
        assert_eq!(t.path_length(x, b, Relationship::Unknown).unwrap(), 2.0);
        assert_eq!(t.path_length(b, x, Relationship::Descendant).unwrap(), 2.0);
        assert_eq!(t.path_length(b, c, Relationship::Relatives).unwrap(), 5.0);
        assert_eq!(t.path_length(b, b, Relationship::Unknown).unwrap(), 0.0);
        assert_eq!(
            t.path_length(b, c, Relationship::Ancestor),
            Err(TreeError::DisconnectedNodes(c, b))
        );
        assert_eq!(t.path_length(b, 50, Relationship::Unknown), Err(TreeError::NodeNotFound(50)));
    }

    #[test]
    fn ages_and_clock() {
        let t = parse_tree("((A:1,B:1):1,C:2);").unwrap();
        assert_eq!(t.age(t.root()), 2.0);
        assert!(t.is_clock_like(1e-9));
        assert!(!tree().is_clock_like(1e-9));
        let a = t.node_by_name("A").unwrap();
        assert_eq!(t.age(a), 0.0);
        assert!(!parse_tree("((A,B),C);").unwrap().is_clock_like(1e-9));
    }
}
