//! Bulk pairwise tree distances over a shared split store.
//!
//! This module implements three distance measures:
//!
//! 1. **Robinson-Foulds (RF)**: the number of non-trivial bipartitions found in one
//!    tree but not the other, counted in both directions.
//!
//! 2. **Weighted Robinson-Foulds**: like RF, but every unmatched bipartition adds
//!    its branch length instead of 1.
//!
//! 3. **Edge-length distance** (branch score): `sqrt(Σ (length_a - length_b)²)` over
//!    every bipartition of either tree, leaf branches included. A bipartition
//!    missing from one tree has length 0 there.
//!
//! Trees need not share a leaf set. Each pair is compared under a mask of the
//! leaves taken into account: the leaves common to all trees
//! ([`PruneMode::Global`]) or the leaves common to the two trees
//! ([`PruneMode::Pairwise`]). Branches that collapse onto the same bipartition
//! under the mask, such as the two branches below a bifurcating root, have their
//! lengths summed.
//!
//! # Parallelism
//! The pair space `0..n(n-1)/2` is split across a `rayon` pool of `max_threads`
//! workers. Each comparison borrows one of exactly `max_threads` scratch buffers
//! from a lock-free queue and returns it afterwards. Results are collected and
//! then written into the symmetric output matrices.

use crate::bitset::{Bitset, canonical_split, count_masked, is_trivial_split};
use crate::error::DistanceError;
use crate::snapshot::SplitStore;
use crate::tree::Tree;
use crossbeam::queue::ArrayQueue;
use rayon::prelude::*;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// How often, in compared pairs, progress is reported.
const PROGRESS_INTERVAL: usize = 100;

/// Which leaves a pair of trees is compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneMode {
    /// Leaves present in every tree of the set.
    #[default]
    Global,
    /// Leaves present in both trees of the pair.
    Pairwise,
}

/// Which matrices to compute and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceOptions {
    pub robinson_foulds: bool,
    pub weighted_robinson_foulds: bool,
    pub edge_length: bool,
    pub prune: PruneMode,
    /// Worker threads and scratch buffers; 0 uses rayon's default thread count.
    pub max_threads: usize,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        DistanceOptions {
            robinson_foulds: true,
            weighted_robinson_foulds: true,
            edge_length: true,
            prune: PruneMode::Global,
            max_threads: 0,
        }
    }
}

/// Symmetric `n × n` matrices with a zero diagonal, one per requested metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceMatrices {
    pub robinson_foulds: Option<Vec<Vec<f64>>>,
    pub weighted_robinson_foulds: Option<Vec<Vec<f64>>>,
    pub edge_length: Option<Vec<Vec<f64>>>,
}

/// Distances of one pair of trees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PairDistance {
    robinson_foulds: f64,
    weighted_robinson_foulds: f64,
    edge_length: f64,
}

/// Per-worker buffers, reused across comparisons.
#[derive(Debug)]
struct Scratch {
    mask: Bitset,
    key: Vec<u64>,
    lengths_a: HashMap<Vec<u64>, f64>,
    lengths_b: HashMap<Vec<u64>, f64>,
}

impl Scratch {
    fn new(words: usize) -> Self {
        Scratch {
            mask: Bitset::zeros(words),
            key: Vec::with_capacity(words),
            lengths_a: HashMap::new(),
            lengths_b: HashMap::new(),
        }
    }
}

/// Computes every requested distance between all pairs of `trees`.
///
/// # Errors
/// [`DistanceError::NoTrees`] for an empty input, [`DistanceError::UnnamedLeaf`]
/// when a tree has an unnamed leaf, [`DistanceError::DuplicateLeaf`] when a tree
/// repeats a leaf name, [`DistanceError::ThreadPool`] when the worker pool cannot
/// be created.
pub fn fill_distance_matrix<T: Borrow<Tree>>(
    trees: &[T],
    options: &DistanceOptions,
) -> Result<DistanceMatrices, DistanceError> {
    fill_distance_matrix_with_progress(trees, options, |_, _| {})
}

/// Like [`fill_distance_matrix`], calling `progress(done, total)` every hundred
/// compared pairs and once at the end.
pub fn fill_distance_matrix_with_progress<T, P>(
    trees: &[T],
    options: &DistanceOptions,
    progress: P,
) -> Result<DistanceMatrices, DistanceError>
where
    T: Borrow<Tree>,
    P: Fn(usize, usize) + Sync,
{
    if trees.is_empty() {
        return Err(DistanceError::NoTrees);
    }
    let store = SplitStore::build(trees)?;
    let n = store.len();
    let total = n * (n - 1) / 2;

    let threads = match options.max_threads {
        0 => rayon::current_num_threads(),
        t => t,
    };
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let scratch_pool = ArrayQueue::new(threads);
    for _ in 0..threads {
        let _ = scratch_pool.push(Scratch::new(store.words()));
    }
    let global = match options.prune {
        PruneMode::Global => Some(store.global_mask()),
        PruneMode::Pairwise => None,
    };
    debug!(trees = n, pairs = total, threads, prune = ?options.prune, "comparing trees");

    let done = AtomicUsize::new(0);
    let pairs: Vec<(usize, usize, PairDistance)> = pool.install(|| {
        (0..total)
            .into_par_iter()
            .map(|k| {
                let (i, j) = pair_from_index(k, n);
                let mut scratch = scratch_pool.pop().unwrap_or_else(|| Scratch::new(store.words()));
                let d = compare_pair(&store, i, j, global.as_ref(), options, &mut scratch);
                let _ = scratch_pool.push(scratch);

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % PROGRESS_INTERVAL == 0 || finished == total {
                    progress(finished, total);
                }
                (i, j, d)
            })
            .collect()
    });

    // Fill matrices (symmetric)
    let square = || vec![vec![0.0f64; n]; n];
    let mut out = DistanceMatrices {
        robinson_foulds: options.robinson_foulds.then(square),
        weighted_robinson_foulds: options.weighted_robinson_foulds.then(square),
        edge_length: options.edge_length.then(square),
    };
    for (i, j, d) in pairs {
        for (matrix, value) in [
            (&mut out.robinson_foulds, d.robinson_foulds),
            (&mut out.weighted_robinson_foulds, d.weighted_robinson_foulds),
            (&mut out.edge_length, d.edge_length),
        ] {
            if let Some(m) = matrix {
                m[i][j] = value;
                m[j][i] = value;
            }
        }
    }
    Ok(out)
}

/// Maps a linear index in `0..n(n-1)/2` to the pair `(i, j)`, `i < j`, in
/// row-major order: `(0,1), (0,2), ..., (0,n-1), (1,2), ...`.
fn pair_from_index(k: usize, n: usize) -> (usize, usize) {
    let total = n * (n - 1) / 2;
    // count from the last pair: row n-2-r holds r+1 pairs
    let rest = total - 1 - k;
    let mut r = ((((8 * rest + 1) as f64).sqrt() - 1.0) / 2.0) as usize;
    while (r + 1) * (r + 2) / 2 <= rest {
        r += 1;
    }
    while r * (r + 1) / 2 > rest {
        r -= 1;
    }
    let i = n - 2 - r;
    let j = n - 1 - (rest - r * (r + 1) / 2);
    (i, j)
}

/// Compares trees `i` and `j` of `store`.
///
/// # Algorithm
/// Every split of each tree adds its length to a map keyed by its canonical masked
/// form, so equal bipartitions meet under the same key whatever their orientation.
/// - RF: non-trivial keys present in only one of the two maps, each counted once.
/// - Weighted RF: the summed lengths behind those keys.
/// - Edge length: the union of both key sets, a missing key counting as length 0.
fn compare_pair(
    store: &SplitStore,
    i: usize,
    j: usize,
    global: Option<&Bitset>,
    options: &DistanceOptions,
    scratch: &mut Scratch,
) -> PairDistance {
    let Scratch { mask, key, lengths_a, lengths_b } = scratch;
    match global {
        Some(g) => mask.0.copy_from_slice(&g.0),
        None => {
            mask.0.copy_from_slice(&store.tree(i).leaf_mask.0);
            mask.and_assign(&store.tree(j).leaf_mask);
        }
    }
    let mask = &mask.0;
    let mask_count = count_masked(mask, None);

    sum_lengths(store, i, mask, key, lengths_a);
    sum_lengths(store, j, mask, key, lengths_b);

    let mut d = PairDistance::default();
    if options.robinson_foulds || options.weighted_robinson_foulds {
        for (own, other) in [(&*lengths_a, &*lengths_b), (&*lengths_b, &*lengths_a)] {
            for (k, length) in own {
                if !other.contains_key(k) && !is_trivial_split(k, mask, mask_count) {
                    d.robinson_foulds += 1.0;
                    d.weighted_robinson_foulds += length;
                }
            }
        }
    }

    if options.edge_length {
        let mut sum_squared = 0.0;
        for (k, la) in lengths_a.iter() {
            let diff = la - lengths_b.get(k).copied().unwrap_or(0.0);
            sum_squared += diff * diff;
        }
        for (k, lb) in lengths_b.iter() {
            if !lengths_a.contains_key(k) {
                sum_squared += lb * lb;
            }
        }
        d.edge_length = sum_squared.sqrt();
    }
    d
}

/// Sums split lengths of `tree` by canonical masked split.
fn sum_lengths(
    store: &SplitStore,
    tree: usize,
    mask: &[u64],
    key: &mut Vec<u64>,
    lengths: &mut HashMap<Vec<u64>, f64>,
) {
    lengths.clear();
    let snapshot = store.tree(tree);
    for (s, &length) in snapshot.lengths.iter().enumerate() {
        if canonical_split(store.split(tree, s), mask, key) {
            match lengths.get_mut(key.as_slice()) {
                Some(sum) => *sum += length,
                None => {
                    lengths.insert(key.clone(), length);
                }
            }
        }
    }
}

fn compare_two(a: &Tree, b: &Tree, options: DistanceOptions) -> Result<PairDistance, DistanceError> {
    let store = SplitStore::build(&[a, b])?;
    let options = DistanceOptions { prune: PruneMode::Pairwise, ..options };
    let mut scratch = Scratch::new(store.words());
    Ok(compare_pair(&store, 0, 1, None, &options, &mut scratch))
}

/// Robinson-Foulds distance between two trees, on the leaves they share.
///
/// # Example
/// ```text
/// Tree 1:  ((A,B),(C,D))     Bipartition: AB|CD
/// Tree 2:  ((A,C),(B,D))     Bipartition: AC|BD
///
/// RF = 1 + 1 = 2
/// ```
pub fn robinson_foulds(a: &Tree, b: &Tree) -> Result<usize, DistanceError> {
    let only = DistanceOptions {
        weighted_robinson_foulds: false,
        edge_length: false,
        ..DistanceOptions::default()
    };
    Ok(compare_two(a, b, only)?.robinson_foulds as usize)
}

/// Weighted Robinson-Foulds distance: summed lengths of unmatched bipartitions.
pub fn weighted_robinson_foulds(a: &Tree, b: &Tree) -> Result<f64, DistanceError> {
    let only = DistanceOptions { edge_length: false, ..DistanceOptions::default() };
    Ok(compare_two(a, b, only)?.weighted_robinson_foulds)
}

/// Edge-length (branch score) distance between two trees.
pub fn edge_length_distance(a: &Tree, b: &Tree) -> Result<f64, DistanceError> {
    let only = DistanceOptions {
        robinson_foulds: false,
        weighted_robinson_foulds: false,
        ..DistanceOptions::default()
    };
    Ok(compare_two(a, b, only)?.edge_length)
}
