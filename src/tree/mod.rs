//! Rooted, ordered, n-ary phylogenetic trees.
//!
//! A [`Tree`] stores its [`TreeNode`]s in an arena (`Vec<TreeNode>`) and refers to
//! them by [`NodeIndex`]. Each node keeps a non-owning back reference to its parent
//! and an ordered list of children it exclusively owns. Structural rewrites
//! (rerooting, unrooting, pruning) finish by compacting the arena, so every stored
//! node is reachable from the root and nodes are stored in pre-order.
//!
//! Every node also carries a process-unique [`NodeId`]. Cloning a tree preserves the
//! ids, which is how a node is found again in a cloned or rerooted variant.
//!
//! # Example
//! ```text
//!        root
//!       /    \
//!      n1     C        indices (pre-order): root=0, n1=1, A=2, B=3, C=4
//!     /  \
//!    A    B
//! ```

mod queries;
mod split;
mod topology;

pub use queries::Relationship;
pub use split::{LengthType, Split, SplitKey};

use crate::attributes::{Attributes, TREE_NAME};
use crate::error::TreeError;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// Index of a node in the tree arena.
pub type NodeIndex = usize;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity, preserved by [`Tree::clone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

// ============================================================================
// TreeNode
// ============================================================================
/// One node of a [`Tree`].
#[derive(Debug, Clone)]
pub struct TreeNode {
    id: NodeId,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    pub attributes: Attributes,
}

impl TreeNode {
    fn new(parent: Option<NodeIndex>, attributes: Attributes) -> Self {
        TreeNode {
            id: NodeId::fresh(),
            parent,
            children: Vec::new(),
            attributes,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn name(&self) -> &str {
        self.attributes.name()
    }

    pub fn length(&self) -> f64 {
        self.attributes.length()
    }

    pub fn support(&self) -> f64 {
        self.attributes.support()
    }
}

// ============================================================================
// Tree
// ============================================================================
/// Arena-backed rooted tree.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeIndex,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree made of a single root node with default attributes.
    pub fn new() -> Self {
        Self::with_root(Attributes::new())
    }

    pub fn with_root(attributes: Attributes) -> Self {
        Tree {
            nodes: vec![TreeNode::new(None, attributes)],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: NodeIndex) -> Option<&TreeNode> {
        self.nodes.get(index)
    }

    pub fn get_mut(&mut self, index: NodeIndex) -> Option<&mut TreeNode> {
        self.nodes.get_mut(index)
    }

    /// Appends a new child at the end of `parent`'s children.
    pub fn add_child(
        &mut self,
        parent: NodeIndex,
        attributes: Attributes,
    ) -> Result<NodeIndex, TreeError> {
        if parent >= self.nodes.len() {
            return Err(TreeError::NodeNotFound(parent));
        }
        Ok(self.push_child(parent, attributes))
    }

    /// Infallible variant of [`Tree::add_child`] for builders that only use indices
    /// they created themselves.
    pub(crate) fn push_child(&mut self, parent: NodeIndex, attributes: Attributes) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes.push(TreeNode::new(Some(parent), attributes));
        self.nodes[parent].children.push(index);
        index
    }

    /// Adds a node that is not yet linked to the tree.
    fn push_detached(&mut self, attributes: Attributes) -> NodeIndex {
        self.nodes.push(TreeNode::new(None, attributes));
        self.nodes.len() - 1
    }

    pub fn attributes(&self, index: NodeIndex) -> &Attributes {
        &self.nodes[index].attributes
    }

    pub fn attributes_mut(&mut self, index: NodeIndex) -> &mut Attributes {
        &mut self.nodes[index].attributes
    }

    /// The tree name stored in the root's `TreeName` attribute, if any.
    pub fn name(&self) -> Option<&str> {
        self.nodes[self.root].attributes.get_text(TREE_NAME)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.nodes[self.root].attributes.insert(TREE_NAME, name);
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    /// Lazy pre-order traversal of the sub-tree rooted at `start`.
    ///
    /// The iterator can be restarted by calling this method again, or cloned
    /// mid-way to branch the traversal.
    pub fn preorder(&self, start: NodeIndex) -> Preorder<'_> {
        let stack = if start < self.nodes.len() { vec![start] } else { Vec::new() };
        Preorder { tree: self, stack }
    }

    /// Eager pre-order list of `start` and all of its descendants.
    pub fn children_recursive(&self, start: NodeIndex) -> Vec<NodeIndex> {
        self.preorder(start).collect()
    }

    /// Childless nodes below `start`, in pre-order.
    pub fn leaves(&self, start: NodeIndex) -> Vec<NodeIndex> {
        self.preorder(start).filter(|&i| self.nodes[i].is_leaf()).collect()
    }

    pub fn leaf_names(&self, start: NodeIndex) -> Vec<&str> {
        self.preorder(start)
            .filter(|&i| self.nodes[i].is_leaf())
            .map(|i| self.nodes[i].name())
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// First node in pre-order with the given name.
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.preorder(self.root).find(|&i| self.nodes[i].name() == name)
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Sum of all specified branch lengths below the root.
    pub fn total_length(&self) -> f64 {
        self.preorder(self.root)
            .filter(|&i| i != self.root)
            .map(|i| self.nodes[i].length())
            .filter(|l| !l.is_nan())
            .sum()
    }

    /// Independent copy of the sub-tree rooted at `start`. Node ids are preserved.
    pub fn subtree(&self, start: NodeIndex) -> Result<Tree, TreeError> {
        if start >= self.nodes.len() {
            return Err(TreeError::NodeNotFound(start));
        }
        Ok(self.extract(start))
    }

    /// Copies the nodes reachable from `start` into a fresh arena, in pre-order.
    fn extract(&self, start: NodeIndex) -> Tree {
        let order = self.children_recursive(start);
        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }
        let nodes = order
            .iter()
            .map(|&old| {
                let node = &self.nodes[old];
                TreeNode {
                    id: node.id,
                    parent: if old == start { None } else { node.parent.map(|p| remap[p]) },
                    children: node.children.iter().map(|&c| remap[c]).collect(),
                    attributes: node.attributes.clone(),
                }
            })
            .collect();
        Tree { nodes, root: 0 }
    }

    /// Drops unreachable nodes and renumbers the rest in pre-order.
    fn compact(&mut self) {
        *self = self.extract(self.root);
    }

    /// Replaces `old` with `new` in `parent`'s child list, keeping its position.
    fn replace_child(&mut self, parent: NodeIndex, old: NodeIndex, new: NodeIndex) {
        if let Some(slot) = self.nodes[parent].children.iter_mut().find(|c| **c == old) {
            *slot = new;
        }
        self.nodes[new].parent = Some(parent);
    }

    fn detach(&mut self, node: NodeIndex) {
        if let Some(parent) = self.nodes[node].parent.take() {
            self.nodes[parent].children.retain(|&c| c != node);
        }
    }
}

impl Index<NodeIndex> for Tree {
    type Output = TreeNode;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index]
    }
}

impl IndexMut<NodeIndex> for Tree {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[index]
    }
}

/// Structural equality: same shape, same child order and equal attributes.
/// Node ids and arena layout are ignored.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self.root, other.root)];
        while let Some((a, b)) = pending.pop() {
            let (na, nb) = (&self.nodes[a], &other.nodes[b]);
            if na.attributes != nb.attributes || na.children.len() != nb.children.len() {
                return false;
            }
            pending.extend(na.children.iter().copied().zip(nb.children.iter().copied()));
        }
        true
    }
}

/// Pre-order iterator over node indices.
#[derive(Debug, Clone)]
pub struct Preorder<'a> {
    tree: &'a Tree,
    stack: Vec<NodeIndex>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        self.stack.extend(self.tree.nodes[index].children.iter().rev());
        Some(index)
    }
}

/// Sums two branch lengths, treating one unspecified side as zero.
pub(crate) fn add_lengths(a: f64, b: f64) -> f64 {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => f64::NAN,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a + b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwka::parse_tree;

    /// ```text
    ///        root
    ///       /    \
    ///      n1     C
    ///     /  \
    ///    A    B
    /// ```
    fn small() -> Tree {
        parse_tree("((A:1,B:2)n1:3,C:4);").unwrap()
    }

    #[test]
    fn preorder_visits_parents_first() {
        let tree = small();
        let names: Vec<&str> = tree
            .preorder(tree.root())
            .map(|i| tree[i].name())
            .collect();
        assert_eq!(names, vec!["", "n1", "A", "B", "C"]);
        // restartable
        assert_eq!(tree.preorder(tree.root()).count(), 5);
        assert_eq!(tree.children_recursive(tree.root()).len(), 5);
    }

    #[test]
    fn children_point_back_to_parent() {
        let tree = small();
        for i in tree.preorder(tree.root()) {
            for &c in tree[i].children() {
                assert_eq!(tree[c].parent(), Some(i));
            }
        }
        assert!(tree[tree.root()].is_root());
    }

    #[test]
    fn leaves_and_names() {
        let tree = small();
        assert_eq!(tree.leaf_names(tree.root()), vec!["A", "B", "C"]);
        let n1 = tree.node_by_name("n1").unwrap();
        assert_eq!(tree.leaf_names(n1), vec!["A", "B"]);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.total_length(), 10.0);
    }

    #[test]
    fn clone_preserves_ids() {
        let tree = small();
        let copy = tree.clone();
        let a = tree.node_by_name("A").unwrap();
        let id = tree[a].id();
        assert_eq!(copy.node_by_id(id), Some(a));
        assert_eq!(tree, copy);
        // fresh nodes get fresh ids
        let other = small();
        assert_ne!(other[other.node_by_name("A").unwrap()].id(), id);
    }

    #[test]
    fn subtree_is_independent() {
        let tree = small();
        let n1 = tree.node_by_name("n1").unwrap();
        let sub = tree.subtree(n1).unwrap();
        assert_eq!(sub.len(), 3);
        assert!(sub[sub.root()].is_root());
        assert_eq!(sub.leaf_names(sub.root()), vec!["A", "B"]);
        assert_eq!(tree.subtree(99).unwrap_err(), TreeError::NodeNotFound(99));
    }

    #[test]
    fn build_by_hand() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_child(root, Attributes::with_name("A")).unwrap();
        tree.add_child(root, Attributes::with_name("B")).unwrap();
        tree.attributes_mut(a).set_length(0.5);
        assert_eq!(tree.leaf_names(root), vec!["A", "B"]);
        assert_eq!(tree[a].length(), 0.5);
        assert!(tree.add_child(42, Attributes::new()).is_err());
        tree.set_name("t1");
        assert_eq!(tree.name(), Some("t1"));
    }

    #[test]
    fn add_lengths_ignores_single_nan() {
        assert_eq!(add_lengths(1.0, 2.0), 3.0);
        assert_eq!(add_lengths(f64::NAN, 2.0), 2.0);
        assert!(add_lengths(f64::NAN, f64::NAN).is_nan());
    }
}
