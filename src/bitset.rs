//! Compact bitset representation for leaf sets.
//!
//! # Overview
//! A bitset records which leaves belong to one side of a split. Each bit position
//! corresponds to an index in the sorted leaf universe.
//!
//! # Example
//! For a universe [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Split {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Split {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)
//!
//! The free functions at the bottom work on raw word slices, so splits stored
//! back to back in one flat buffer can be compared without copying.

/// A compact bitset over leaf indices.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large trees.
/// Each u64 word holds 64 leaf indices.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

/// Number of u64 words needed for `bits` bits.
pub fn words_for(bits: usize) -> usize {
    bits.div_ceil(64)
}

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Example
    /// ```
    /// # use treenode::bitset::Bitset;
    /// // 100 leaves need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Creates a bitset with the first `bits` bits set.
    pub fn ones(words: usize, bits: usize) -> Self {
        let mut bs = Bitset::zeros(words);
        for i in 0..bits {
            bs.set(i);
        }
        bs
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use treenode::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6; // idx / 64
        let bit = idx & 63; // idx % 64
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.0[idx >> 6] & (1u64 << (idx & 63)) != 0
    }

    /// Bitwise OR with another bitset: `self` becomes `self ∪ other`.
    ///
    /// # Example
    /// ```
    /// # use treenode::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Bitwise AND with another bitset: `self` becomes `self ∩ other`.
    #[inline]
    pub fn and_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a &= *b;
        }
    }

    /// Population count: how many leaves are in this set.
    #[inline]
    pub fn count_ones(&self) -> usize {
        count_masked(&self.0, None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn is_subset(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & !b == 0)
    }

    pub fn is_disjoint(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & b == 0)
    }

    /// Indices of the set bits, ascending.
    pub fn ones_iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |b| word & (1u64 << b) != 0).map(move |b| w * 64 + b)
        })
    }
}

/// Counts set bits of `a`, restricted to `mask` when given.
#[inline]
pub fn count_masked(a: &[u64], mask: Option<&[u64]>) -> usize {
    match mask {
        Some(mask) => a.iter().zip(mask).map(|(w, m)| (w & m).count_ones() as usize).sum(),
        None => a.iter().map(|w| w.count_ones() as usize).sum(),
    }
}

/// True when `a` and `b` describe the same bipartition of the leaves in `mask`:
/// either the same side, or each other's complement.
///
/// # Example
/// ```
/// # use treenode::bitset::compare_splits;
/// let mask = [0b1111u64];
/// assert!(compare_splits(&[0b0011], &[0b1100], &mask)); // AB|CD == CD|AB
/// assert!(compare_splits(&[0b10011], &[0b0011], &mask)); // bit 4 is masked out
/// assert!(!compare_splits(&[0b0011], &[0b0101], &mask));
/// ```
#[inline]
pub fn compare_splits(a: &[u64], b: &[u64], mask: &[u64]) -> bool {
    let same = a.iter().zip(b).zip(mask).all(|((x, y), m)| (x ^ y) & m == 0);
    same || a.iter().zip(b).zip(mask).all(|((x, y), m)| (x ^ !y) & m == 0)
}

/// True when the split `a` is trivial under `mask`: one of its sides holds at
/// most one leaf.
#[inline]
pub fn is_trivial_split(a: &[u64], mask: &[u64], mask_count: usize) -> bool {
    let inside = count_masked(a, Some(mask));
    inside <= 1 || mask_count - inside <= 1
}

/// Writes the canonical masked form of split `a` into `out`.
///
/// The side holding the lowest leaf of `mask` is flipped to its complement, so both
/// orientations of a bipartition produce the same words. Returns `false` when the
/// masked split is empty or covers the whole mask.
pub fn canonical_split(a: &[u64], mask: &[u64], out: &mut Vec<u64>) -> bool {
    out.clear();
    out.extend(a.iter().zip(mask).map(|(w, m)| w & m));
    let Some((word, lowest)) = mask
        .iter()
        .enumerate()
        .find(|(_, m)| **m != 0)
        .map(|(w, m)| (w, m & m.wrapping_neg()))
    else {
        return false;
    };
    if out[word] & lowest != 0 {
        for (w, m) in out.iter_mut().zip(mask) {
            *w = !*w & m;
        }
    }
    out.iter().any(|&w| w != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.contains(2));
        assert!(!bs.contains(1));
        assert_eq!(bs.ones_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_bitset_or_and() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(1);
        bs2.set(3);

        let mut union = bs1.clone();
        union.or_assign(&bs2);
        assert_eq!(union.0[0], 0b1011);

        bs1.and_assign(&bs2);
        assert_eq!(bs1.0[0], 0b0010);
        assert!(bs1.is_subset(&bs2));
        assert!(!bs2.is_subset(&bs1));
    }

    /// How bitsets represent a small tree
    ///
    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    ///
    /// Leaf mapping: A=0, B=1, C=2, D=3
    ///
    /// - node2: {B, C} → `0b0110`
    /// - node1: {A, B, C} → `0b0111`
    #[test]
    fn test_mini_tree_example() {
        let mut node2 = Bitset::zeros(1);
        node2.set(1);
        node2.set(2);
        assert_eq!(node2.count_ones(), 2);

        let mut node1 = Bitset::zeros(1);
        node1.set(0);
        node1.or_assign(&node2);
        assert_eq!(node1.0[0], 0b0111);
        assert!(node2.is_subset(&node1));

        let mut d = Bitset::zeros(1);
        d.set(3);
        assert!(d.is_disjoint(&node1));
    }

    #[test]
    fn test_large_tree() {
        let mut bs = Bitset::zeros(words_for(128));
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(127);

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.0[0], 1u64 | (1u64 << 63));
        assert_eq!(bs.0[1], 1u64 | (1u64 << 63));
        assert_eq!(Bitset::ones(2, 70).count_ones(), 70);
    }

    #[test]
    fn masked_comparison_across_words() {
        let mask = Bitset::ones(2, 70);
        let mut a = Bitset::zeros(2);
        a.set(1);
        a.set(65);
        let mut b = Bitset::ones(2, 70);
        b.0[0] &= !(1u64 << 1);
        b.0[1] &= !(1u64 << 1);
        assert!(compare_splits(&a.0, &b.0, &mask.0));
        assert!(!is_trivial_split(&a.0, &mask.0, 70));
    }

    #[test]
    fn trivial_splits() {
        let mask = [0b1111u64];
        assert!(is_trivial_split(&[0b0001], &mask, 4));
        assert!(is_trivial_split(&[0b1110], &mask, 4));
        assert!(!is_trivial_split(&[0b0110], &mask, 4));
        // pruned down to a single leaf by the mask
        assert!(is_trivial_split(&[0b0110], &[0b1011], 3));
    }

    /// AB|CD stored from either side canonicalizes to CD, the side without A.
    #[test]
    fn canonical_form_drops_lowest_leaf_side() {
        let mask = [0b1110u64];
        let mut out = Vec::new();
        assert!(canonical_split(&[0b0011], &mask, &mut out));
        assert_eq!(out, vec![0b1100]);
        assert!(canonical_split(&[0b1100], &mask, &mut out));
        assert_eq!(out, vec![0b1100]);
        assert!(!canonical_split(&[0b0001], &mask, &mut out));
        assert!(!canonical_split(&[0b1110], &mask, &mut out));
    }
}
