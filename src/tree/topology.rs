//! Structural rewrites: unrooting, rerooting and pruning.
//!
//! Branch-owned attributes (`Length` and `Support`) describe the edge above a node.
//! When an edge is inverted they travel with it to the node that ends up below.

use super::{NodeIndex, Tree, add_lengths};
use crate::attributes::{Attributes, TREE_NAME};
use crate::error::TreeError;

impl Tree {
    /// Returns an unrooted copy of this tree.
    ///
    /// A root with exactly two children is removed by grafting one child onto the
    /// other: the first internal child becomes the new root and the other child is
    /// attached to it, its branch length becoming the sum of both root branches.
    /// Any other tree is returned as a plain clone, as is a tree whose two root
    /// children are both leaves.
    ///
    /// ```text
    ///        root                     n1
    ///       /    \                  / | \
    ///      n1     C       =>       A  B  C   (C gets len(n1) + len(C))
    ///     /  \
    ///    A    B
    /// ```
    pub fn unrooted(&self) -> Tree {
        let mut tree = self.clone();
        let root = tree.root;
        let &[first, second] = tree.nodes[root].children.as_slice() else {
            return tree;
        };

        let (keep, graft, graft_in_front) = if !tree.nodes[first].is_leaf() {
            (first, second, false)
        } else if !tree.nodes[second].is_leaf() {
            (second, first, true)
        } else {
            return tree;
        };

        let combined = add_lengths(tree.nodes[keep].length(), tree.nodes[graft].length());
        tree.nodes[graft].attributes.set_length(combined);
        tree.nodes[graft].parent = Some(keep);
        if graft_in_front {
            tree.nodes[keep].children.insert(0, graft);
        } else {
            tree.nodes[keep].children.push(graft);
        }

        tree.nodes[keep].parent = None;
        tree.promote_to_root(root, keep);
        tree.compact();
        tree
    }

    /// Returns a copy rerooted on the branch above `outgroup`.
    ///
    /// The branch is split at `position`: the outgroup keeps `length * position`
    /// and the rest of the tree hangs at `length * (1 - position)` from the new root.
    /// The path from the outgroup to the old root is inverted. An old root left with
    /// a single child is spliced out and its length added to that child.
    ///
    /// ```text
    ///        root                    new
    ///       /    \                  /   \
    ///      n1     C       =>       A     n1
    ///     /  \                          /  \
    ///    A    B                        B    C
    /// ```
    pub fn rooted(&self, outgroup: NodeIndex, position: f64) -> Result<Tree, TreeError> {
        if outgroup >= self.nodes.len() {
            return Err(TreeError::NodeNotFound(outgroup));
        }
        let mut tree = self.clone();
        let Some(first_parent) = tree.nodes[outgroup].parent else {
            return Ok(tree);
        };

        let mut path = vec![first_parent];
        while let Some(parent) = tree.nodes[path[path.len() - 1]].parent {
            path.push(parent);
        }
        let old_root = path[path.len() - 1];
        let saved: Vec<(f64, f64)> = path
            .iter()
            .map(|&p| (tree.nodes[p].length(), tree.nodes[p].support()))
            .collect();

        let length = tree.nodes[outgroup].length();
        let support = tree.nodes[outgroup].support();

        let new_root = tree.push_detached(Attributes::new());
        tree.detach(outgroup);
        tree.nodes[outgroup].parent = Some(new_root);
        tree.nodes[outgroup].attributes.set_length(length * position);
        tree.nodes[new_root].children = vec![outgroup, first_parent];

        // invert each edge on the path to the old root
        for (k, pair) in path.windows(2).enumerate() {
            let (child, parent) = (pair[0], pair[1]);
            tree.nodes[parent].children.retain(|&c| c != child);
            tree.nodes[child].children.push(parent);
            tree.nodes[parent].parent = Some(child);
            let (len, sup) = saved[k];
            tree.nodes[parent].attributes.set_length(len);
            tree.nodes[parent].attributes.set_support(sup);
        }
        tree.nodes[first_parent].parent = Some(new_root);
        tree.nodes[first_parent].attributes.set_length(length * (1.0 - position));
        tree.nodes[first_parent].attributes.set_support(support);

        let root_length = saved[saved.len() - 1].0;
        tree.carry_tree_name(old_root, new_root);
        tree.nodes[new_root].attributes.set_length(root_length);
        tree.root = new_root;

        match tree.nodes[old_root].children.len() {
            1 => tree.splice_out(old_root),
            0 => tree.detach(old_root),
            _ => {}
        }

        tree.compact();
        Ok(tree)
    }

    /// Removes the sub-tree rooted at `node`.
    ///
    /// A non-root parent left with a single child is spliced out. A root left with a
    /// single child hands the root role to that child.
    pub fn prune(&mut self, node: NodeIndex) -> Result<(), TreeError> {
        if node >= self.nodes.len() {
            return Err(TreeError::NodeNotFound(node));
        }
        let Some(parent) = self.nodes[node].parent else {
            return Err(TreeError::RemoveRoot);
        };
        self.detach(node);

        if self.nodes[parent].children.len() == 1 {
            if parent == self.root {
                let child = self.nodes[parent].children[0];
                self.nodes[child].parent = None;
                self.promote_to_root(parent, child);
            } else {
                self.splice_out(parent);
            }
        }
        self.compact();
        Ok(())
    }

    /// Connects the single child of `node` directly to `node`'s parent.
    fn splice_out(&mut self, node: NodeIndex) {
        let (Some(parent), &[child]) = (self.nodes[node].parent, self.nodes[node].children.as_slice())
        else {
            return;
        };
        let combined = add_lengths(self.nodes[child].length(), self.nodes[node].length());
        self.nodes[child].attributes.set_length(combined);
        self.replace_child(parent, node, child);
        self.nodes[node].children.clear();
        self.nodes[node].parent = None;
    }

    /// Makes `new_root` the root in place of `old_root`, keeping the root's own
    /// length, support and tree name.
    fn promote_to_root(&mut self, old_root: NodeIndex, new_root: NodeIndex) {
        let length = self.nodes[old_root].length();
        let support = self.nodes[old_root].support();
        self.carry_tree_name(old_root, new_root);
        let attrs = &mut self.nodes[new_root].attributes;
        attrs.set_length(length);
        attrs.set_support(support);
        self.root = new_root;
    }

    fn carry_tree_name(&mut self, from: NodeIndex, to: NodeIndex) {
        if let Some(name) = self.nodes[from].attributes.remove(TREE_NAME) {
            self.nodes[to].attributes.insert(TREE_NAME, name);
        }
    }
}
