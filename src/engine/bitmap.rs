//! Coverage bitmaps and the per-sentence coverage registry.
//!
//! A `Bitmap` records which source positions a hypothesis has translated. Every
//! distinct coverage pattern is interned once in a `BitmapRegistry` and referred
//! to by a `BitmapId`, so equal coverage means equal id:
//!
//! ```text
//! {}  ──extend [0..0]──▶ {0}  ──extend [1..2]──▶ {0,1,2}
//! {}  ──extend [1..2]──▶ {1,2} ──extend [0..0]──▶ {0,1,2}   (same id)
//! ```
//!
//! Bitmaps are never mutated after interning; extending produces a new pattern.

use crate::Range;
use rustc_hash::FxHashMap;
use std::fmt;

const WORD_BITS: usize = 64;

/// Fixed-length bit-vector over source positions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
    covered: usize,
}

impl Bitmap {
    /// All positions uncovered.
    pub fn empty(len: usize) -> Self {
        Bitmap { words: vec![0; len.div_ceil(WORD_BITS)], len, covered: 0 }
    }

    /// Sentence length this bitmap is defined over.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_set(&self, pos: usize) -> bool {
        pos < self.len && self.words[pos / WORD_BITS] & (1 << (pos % WORD_BITS)) != 0
    }

    pub fn num_covered(&self) -> usize {
        self.covered
    }

    pub fn is_complete(&self) -> bool {
        self.covered == self.len
    }

    /// Leftmost uncovered position, `None` when everything is covered.
    pub fn first_gap(&self) -> Option<usize> {
        for (idx, word) in self.words.iter().enumerate() {
            let open = !word;
            if open != 0 {
                let pos = idx * WORD_BITS + open.trailing_zeros() as usize;
                return (pos < self.len).then_some(pos);
            }
        }
        None
    }

    /// Rightmost covered position, `None` when nothing is covered.
    pub fn last_covered(&self) -> Option<usize> {
        for (idx, word) in self.words.iter().enumerate().rev() {
            if *word != 0 {
                return Some(idx * WORD_BITS + (WORD_BITS - 1 - word.leading_zeros() as usize));
            }
        }
        None
    }

    /// True iff any position of `range` is already covered.
    pub fn overlaps(&self, range: Range) -> bool {
        (range.start..=range.end).any(|pos| self.is_set(pos))
    }

    /// A new bitmap with every position of `range` set.
    pub fn union(&self, range: Range) -> Bitmap {
        debug_assert!(range.end < self.len, "range {range} outside sentence of length {}", self.len);
        let mut next = self.clone();
        for pos in range.start..=range.end.min(self.len.saturating_sub(1)) {
            let mask = 1u64 << (pos % WORD_BITS);
            let word = &mut next.words[pos / WORD_BITS];
            if *word & mask == 0 {
                *word |= mask;
                next.covered += 1;
            }
        }
        next
    }

    /// Maximal uncovered spans, left to right.
    pub fn gaps(&self) -> Vec<Range> {
        let mut gaps = Vec::new();
        let mut start = None;
        for pos in 0..self.len {
            match (self.is_set(pos), start) {
                (false, None) => start = Some(pos),
                (true, Some(s)) => {
                    gaps.push(Range::new(s, pos - 1));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            gaps.push(Range::new(s, self.len - 1));
        }
        gaps
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.len {
            f.write_str(if self.is_set(pos) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({self})")
    }
}

/// Handle of an interned coverage pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitmapId(u32);

impl BitmapId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interns coverage patterns for one sentence.
#[derive(Debug)]
pub(crate) struct BitmapRegistry {
    bitmaps: Vec<Bitmap>,
    ids: FxHashMap<Bitmap, BitmapId>,
    extensions: FxHashMap<(BitmapId, Range), BitmapId>,
}

impl BitmapRegistry {
    pub(crate) fn new(sentence_len: usize) -> Self {
        let mut registry =
            BitmapRegistry { bitmaps: Vec::new(), ids: FxHashMap::default(), extensions: FxHashMap::default() };
        registry.intern(Bitmap::empty(sentence_len));
        registry
    }

    /// The empty coverage.
    pub(crate) fn initial(&self) -> BitmapId {
        BitmapId(0)
    }

    pub(crate) fn get(&self, id: BitmapId) -> &Bitmap {
        &self.bitmaps[id.index()]
    }

    /// Number of distinct coverage patterns seen so far.
    pub(crate) fn len(&self) -> usize {
        self.bitmaps.len()
    }

    /// Coverage of `id` with `range` added, interned.
    pub(crate) fn extend(&mut self, id: BitmapId, range: Range) -> BitmapId {
        if let Some(&next) = self.extensions.get(&(id, range)) {
            return next;
        }
        let bitmap = self.get(id).union(range);
        let next = self.intern(bitmap);
        self.extensions.insert((id, range), next);
        next
    }

    fn intern(&mut self, bitmap: Bitmap) -> BitmapId {
        if let Some(&id) = self.ids.get(&bitmap) {
            return id;
        }
        let id = BitmapId(self.bitmaps.len() as u32);
        self.ids.insert(bitmap.clone(), id);
        self.bitmaps.push(bitmap);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_sets_range_and_counts() {
        let b = Bitmap::empty(5).union(Range::new(1, 2));
        assert_eq!(b.to_string(), "01100");
        assert_eq!(b.num_covered(), 2);
        assert_eq!(b.first_gap(), Some(0));
        assert_eq!(b.last_covered(), Some(2));

        let full = b.union(Range::single(0)).union(Range::new(3, 4));
        assert!(full.is_complete());
        assert_eq!(full.first_gap(), None);
    }

    #[test]
    fn overlaps_detects_any_shared_position() {
        let b = Bitmap::empty(6).union(Range::new(2, 3));
        assert!(b.overlaps(Range::new(3, 5)));
        assert!(b.overlaps(Range::new(0, 2)));
        assert!(!b.overlaps(Range::new(0, 1)));
        assert!(!b.overlaps(Range::new(4, 5)));
    }

    #[test]
    fn first_gap_across_word_boundary() {
        let len = 130;
        let b = Bitmap::empty(len).union(Range::new(0, 99));
        assert_eq!(b.first_gap(), Some(100));
        assert_eq!(b.last_covered(), Some(99));
        let full = b.union(Range::new(100, 129));
        assert_eq!(full.first_gap(), None);
        assert_eq!(full.num_covered(), len);
    }

    #[test]
    fn gaps_lists_maximal_open_spans() {
        let b = Bitmap::empty(7).union(Range::new(1, 2)).union(Range::single(5));
        assert_eq!(b.gaps(), vec![Range::single(0), Range::new(3, 4), Range::single(6)]);
        assert!(Bitmap::empty(3).union(Range::new(0, 2)).gaps().is_empty());
    }

    #[test]
    fn registry_canonicalizes_equal_coverage() {
        let mut reg = BitmapRegistry::new(3);
        let root = reg.initial();
        let a = reg.extend(root, Range::single(0));
        let a = reg.extend(a, Range::new(1, 2));
        let b = reg.extend(root, Range::new(1, 2));
        let b = reg.extend(b, Range::single(0));
        assert_eq!(a, b);
        assert!(reg.get(a).is_complete());
        // {}, {0}, {1,2}, {0,1,2}
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.get(root).num_covered(), 0);
    }
}
