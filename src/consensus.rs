//! Consensus trees from rooted clade frequencies.
//!
//! Every branch of every input tree names a clade (the leaves below it). Clades are
//! counted across the trees, those seen often enough become candidates, and the
//! candidates are added most frequent first as long as they nest with, or are
//! disjoint from, every clade already kept. The kept clades are then assembled into
//! a tree from the smallest upwards.
//!
//! | threshold | keeps clades seen in                      |
//! |-----------|-------------------------------------------|
//! | `0.0`     | any tree, greedily, while compatible      |
//! | `0.5`     | strictly more than half of the trees      |
//! | `1.0`     | every tree (strict consensus)             |
//!
//! Internal nodes get their clade frequency as support and the mean or median
//! length of the clade's branch as length. With [`LengthType::Age`] node ages are
//! averaged instead and turned back into branch lengths at the end, which only
//! makes sense for clock-like input.

use crate::attributes::Attributes;
use crate::bitset::{Bitset, words_for};
use crate::error::DistanceError;
use crate::snapshot::leaf_universe;
use crate::tree::{LengthType, NodeIndex, Tree, add_lengths};
use rayon::prelude::*;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// How often, in matrix rows, progress is reported.
const PROGRESS_INTERVAL: usize = 100;

/// Relative root-to-tip spread below which a tree counts as clock-like.
const CLOCK_TOLERANCE: f64 = 1e-3;

/// How the branch lengths of one clade are combined across trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusOptions {
    /// Minimum clade frequency, see the module docs.
    pub threshold: f64,
    pub length_type: LengthType,
    pub aggregation: Aggregation,
    /// Candidate count from which the compatibility matrix is filled in parallel.
    pub parallel_threshold: usize,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        ConsensusOptions {
            threshold: 0.5,
            length_type: LengthType::Length,
            aggregation: Aggregation::Mean,
            parallel_threshold: 1000,
        }
    }
}

/// One clade, as counted across the input trees.
#[derive(Debug)]
struct Clade {
    /// Leaves of the clade, over the sorted leaf universe.
    key: Bitset,
    count: usize,
    lengths: Vec<f64>,
}

/// Builds the consensus of `trees`.
///
/// # Errors
/// [`DistanceError::NoTrees`] for an empty input, [`DistanceError::InvalidThreshold`]
/// for a threshold outside `[0, 1]`, [`DistanceError::UnnamedLeaf`] when a leaf has
/// no name, [`DistanceError::DuplicateLeaf`] when a tree names two leaves alike.
pub fn consensus<T: Borrow<Tree>>(
    trees: &[T],
    options: &ConsensusOptions,
) -> Result<Tree, DistanceError> {
    consensus_with_progress(trees, options, |_, _| {})
}

/// Like [`consensus`], calling `progress(done, total)` while the compatibility
/// matrix is filled: every hundred rows and once at the end.
pub fn consensus_with_progress<T, P>(
    trees: &[T],
    options: &ConsensusOptions,
    progress: P,
) -> Result<Tree, DistanceError>
where
    T: Borrow<Tree>,
    P: Fn(usize, usize) + Sync,
{
    if trees.is_empty() {
        return Err(DistanceError::NoTrees);
    }
    if !(0.0..=1.0).contains(&options.threshold) {
        return Err(DistanceError::InvalidThreshold(options.threshold));
    }

    // Step 1: leaf universe
    let leaves = leaf_universe(trees)?;
    let leaf_index: HashMap<&str, usize> =
        leaves.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let words = words_for(leaves.len()).max(1);

    if options.length_type == LengthType::Age
        && trees.iter().any(|t| !t.borrow().is_clock_like(CLOCK_TOLERANCE))
    {
        warn!("building an age consensus from trees that are not clock-like");
    }

    // Step 2: count clades and collect leaf branch lengths
    let (clades, leaf_lengths) = count_clades(trees, options.length_type, &leaf_index, words);
    let n = trees.len() as f64;
    let threshold = options.threshold;
    let mut candidates: Vec<Clade> = clades
        .into_values()
        .filter(|c| {
            let frequency = c.count as f64 / n;
            frequency > threshold || (threshold >= 1.0 && frequency >= 1.0)
        })
        .collect();
    // leaves are sorted, so comparing bit positions orders clades by leaf names
    candidates.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.key.ones_iter().cmp(b.key.ones_iter()))
    });

    // Step 3: compatibility matrix, then greedy selection
    let sides: Vec<Bitset> = candidates.iter().map(|c| c.key.clone()).collect();
    let compatible = compatibility_matrix(&sides, options.parallel_threshold, &progress);
    let k = sides.len();
    let mut kept: Vec<usize> = Vec::new();
    for i in 0..k {
        if kept.iter().all(|&j| compatible[i * k + j]) {
            kept.push(i);
        }
    }
    debug!(
        trees = trees.len(),
        leaves = leaves.len(),
        candidates = k,
        kept = kept.len(),
        "selected consensus clades"
    );

    // Step 4: assemble
    let clade_lengths: Vec<f64> = kept
        .iter()
        .map(|&i| aggregate(&candidates[i].lengths, options.aggregation))
        .collect();
    let supports: Vec<f64> = kept.iter().map(|&i| candidates[i].count as f64 / n).collect();
    let kept_sides: Vec<&Bitset> = kept.iter().map(|&i| &sides[i]).collect();
    let leaf_values: Vec<f64> =
        leaf_lengths.iter().map(|l| aggregate(l, options.aggregation)).collect();
    let root_age = match options.length_type {
        LengthType::Length => f64::NAN,
        LengthType::Age => {
            let ages: Vec<f64> = trees.iter().map(|t| t.borrow().age(t.borrow().root())).collect();
            aggregate(&ages, options.aggregation)
        }
    };

    Ok(assemble(
        &leaves,
        &leaf_values,
        &kept_sides,
        &clade_lengths,
        &supports,
        options.length_type,
        root_age,
    ))
}

/// Clades with two or more leaves keyed by their leaf set, plus the branch values
/// seen for every single leaf.
///
/// Leaf sets and ages are filled bottom-up in one pass per tree; a node's age is
/// the summed distance to its leaves over their number, unset lengths as 0.
fn count_clades<T: Borrow<Tree>>(
    trees: &[T],
    length_type: LengthType,
    leaf_index: &HashMap<&str, usize>,
    words: usize,
) -> (HashMap<Bitset, Clade>, Vec<Vec<f64>>) {
    let mut clades: HashMap<Bitset, Clade> = HashMap::new();
    let mut leaf_lengths = vec![Vec::new(); leaf_index.len()];

    for tree in trees {
        let tree = tree.borrow();
        let order: Vec<NodeIndex> = tree.preorder(tree.root()).collect();
        let mut node_bits = vec![0u64; tree.len() * words];
        let mut below = vec![0usize; tree.len()];
        let mut distance = vec![0.0f64; tree.len()];
        let mut leaf_of = vec![None; tree.len()];

        for &node in order.iter().rev() {
            let here = node * words;
            if tree[node].is_leaf() {
                // names were validated by the leaf universe
                if let Some(&leaf) = leaf_index.get(tree[node].name()) {
                    node_bits[here + (leaf >> 6)] |= 1u64 << (leaf & 63);
                    leaf_of[node] = Some(leaf);
                }
                below[node] = 1;
                continue;
            }
            for &child in tree[node].children() {
                for w in 0..words {
                    node_bits[here + w] |= node_bits[child * words + w];
                }
                let length = tree[child].length();
                let length = if length.is_nan() { 0.0 } else { length };
                below[node] += below[child];
                distance[node] += distance[child] + below[child] as f64 * length;
            }
        }

        let size = below[tree.root()];
        // a unary node repeats its child's clade; count it once per tree
        let mut local: HashMap<&[u64], f64> = HashMap::new();
        let mut first_seen: Vec<&[u64]> = Vec::new();
        for &node in order.iter().filter(|&&n| n != tree.root()) {
            let value = match length_type {
                LengthType::Length => tree[node].length(),
                LengthType::Age => distance[node] / below[node] as f64,
            };
            if let Some(leaf) = leaf_of[node] {
                if !value.is_nan() {
                    leaf_lengths[leaf].push(value);
                }
                continue;
            }
            if below[node] < 2 || below[node] >= size {
                continue;
            }
            let key = &node_bits[node * words..(node + 1) * words];
            match local.get_mut(key) {
                Some(length) if length_type == LengthType::Length => {
                    *length = add_lengths(*length, value);
                }
                Some(_) => {}
                None => {
                    first_seen.push(key);
                    local.insert(key, value);
                }
            }
        }
        for key in first_seen {
            let Some(length) = local.remove(key) else { continue };
            let clade = clades.entry(Bitset(key.to_vec())).or_insert_with(|| Clade {
                key: Bitset(key.to_vec()),
                count: 0,
                lengths: Vec::new(),
            });
            clade.count += 1;
            if !length.is_nan() {
                clade.lengths.push(length);
            }
        }
    }
    (clades, leaf_lengths)
}

/// Row-major `k × k` matrix: clades `i` and `j` are nested or disjoint.
fn compatibility_matrix<P>(sides: &[Bitset], parallel_threshold: usize, progress: &P) -> Vec<bool>
where
    P: Fn(usize, usize) + Sync,
{
    let k = sides.len();
    let mut matrix = vec![false; k * k];
    if k == 0 {
        return matrix;
    }
    let fill = |i: usize, row: &mut [bool]| {
        let a = &sides[i];
        for (j, cell) in row.iter_mut().enumerate() {
            let b = &sides[j];
            *cell = a.is_disjoint(b) || a.is_subset(b) || b.is_subset(a);
        }
    };

    if k >= parallel_threshold {
        let done = Mutex::new(0usize);
        matrix.par_chunks_mut(k).enumerate().for_each(|(i, row)| {
            fill(i, row);
            if (i + 1) % PROGRESS_INTERVAL == 0 {
                if let Ok(mut done) = done.lock() {
                    *done += PROGRESS_INTERVAL;
                    progress(*done, k);
                }
            }
        });
    } else {
        for (i, row) in matrix.chunks_mut(k).enumerate() {
            fill(i, row);
            if (i + 1) % PROGRESS_INTERVAL == 0 {
                progress(i + 1, k);
            }
        }
    }
    progress(k, k);
    matrix
}

fn aggregate(values: &[f64], aggregation: Aggregation) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    match aggregation {
        Aggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                sorted[mid]
            } else {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            }
        }
    }
}

/// Builds the tree from mutually compatible clades.
///
/// Clades are visited by increasing size; each one's parent is the smallest larger
/// clade containing it, or the root. Every leaf hangs below the smallest clade
/// holding it. Children are ordered by their lowest leaf.
fn assemble(
    leaves: &[String],
    leaf_values: &[f64],
    sides: &[&Bitset],
    values: &[f64],
    supports: &[f64],
    length_type: LengthType,
    root_age: f64,
) -> Tree {
    if leaves.len() == 1 {
        let mut only = Attributes::with_name(leaves[0].clone());
        only.set_length(match length_type {
            LengthType::Length => leaf_values[0],
            LengthType::Age => f64::NAN,
        });
        return Tree::with_root(only);
    }

    let k = sides.len();
    let root = k;
    let mut by_size: Vec<usize> = (0..k).collect();
    by_size.sort_by_key(|&i| sides[i].count_ones());

    // Step 1: parent of every clade, bottom-up
    let mut parent = vec![root; k];
    for (pos, &i) in by_size.iter().enumerate() {
        if let Some(&p) = by_size[pos + 1..].iter().find(|&&j| sides[i].is_subset(sides[j])) {
            parent[i] = p;
        }
    }
    let mut leaf_parent = vec![root; leaves.len()];
    for (leaf, slot) in leaf_parent.iter_mut().enumerate() {
        if let Some(&p) = by_size.iter().find(|&&i| sides[i].contains(leaf)) {
            *slot = p;
        }
    }

    // Step 2: child lists, ordered by lowest leaf
    #[derive(Clone, Copy)]
    enum Child {
        Clade(usize),
        Leaf(usize),
    }
    let lowest = |child: &Child| match *child {
        Child::Clade(i) => sides[i].ones_iter().next().unwrap_or(usize::MAX),
        Child::Leaf(l) => l,
    };
    let mut children: Vec<Vec<Child>> = vec![Vec::new(); k + 1];
    for i in 0..k {
        children[parent[i]].push(Child::Clade(i));
    }
    for (leaf, &p) in leaf_parent.iter().enumerate() {
        children[p].push(Child::Leaf(leaf));
    }
    for list in &mut children {
        list.sort_by_key(|c| lowest(c));
    }

    // Step 3: materialize top-down
    let age_of = |clade: usize| if clade == root { root_age } else { values[clade] };
    let mut tree = Tree::new();
    let mut stack = vec![(root, tree.root())];
    while let Some((clade, node)) = stack.pop() {
        for child in &children[clade] {
            let mut attributes = Attributes::new();
            let length = match (*child, length_type) {
                (Child::Clade(i), LengthType::Length) => values[i],
                (Child::Clade(i), LengthType::Age) => age_of(clade) - values[i],
                (Child::Leaf(l), LengthType::Length) => leaf_values[l],
                (Child::Leaf(l), LengthType::Age) => {
                    let age = if leaf_values[l].is_nan() { 0.0 } else { leaf_values[l] };
                    age_of(clade) - age
                }
            };
            attributes.set_length(length);
            match *child {
                Child::Clade(i) => attributes.set_support(supports[i]),
                Child::Leaf(l) => attributes.set_name(leaves[l].clone()),
            }
            let index = tree.push_child(node, attributes);
            if let Child::Clade(i) = *child {
                stack.push((i, index));
            }
        }
    }
    tree
}
