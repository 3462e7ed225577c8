//! Future-cost estimates.
//!
//! For every span `[s, e]` of the sentence the matrix holds the best static
//! score with which that span could be translated: either by one option for
//! the whole span or by splitting it into two independently translated parts.
//! Words no option can cover are charged a fixed penalty so that hypotheses
//! leaving them open are not favoured.
//!
//! A hypothesis's estimate is the sum over its maximal uncovered gaps.

use super::bitmap::Bitmap;
use crate::Range;

/// Score charged per source word that no option covers.
pub(crate) const UNCOVERABLE_WORD: f64 = -100.0;

#[derive(Debug, Clone)]
pub(crate) struct FutureCosts {
    len: usize,
    /// Row-major `len × len`; only `start <= end` is used.
    costs: Vec<f64>,
}

impl FutureCosts {
    /// Build the matrix from the best isolation score per span (`None` when the
    /// span has no option).
    pub(crate) fn new(len: usize, best_option: impl Fn(Range) -> Option<f64>) -> Self {
        let mut costs = vec![f64::NEG_INFINITY; len * len];
        for width in 1..=len {
            for start in 0..=len - width {
                let end = start + width - 1;
                let mut best = best_option(Range::new(start, end)).unwrap_or(f64::NEG_INFINITY);
                if width == 1 && best == f64::NEG_INFINITY {
                    best = UNCOVERABLE_WORD;
                }
                for split in start..end {
                    let joined = costs[start * len + split] + costs[(split + 1) * len + end];
                    if joined > best {
                        best = joined;
                    }
                }
                costs[start * len + end] = best;
            }
        }
        FutureCosts { len, costs }
    }

    pub(crate) fn span(&self, range: Range) -> f64 {
        self.costs[range.start * self.len + range.end]
    }

    /// Estimate for everything `coverage` leaves open.
    pub(crate) fn estimate(&self, coverage: &Bitmap) -> f64 {
        coverage.gaps().into_iter().map(|gap| self.span(gap)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_beat_poor_direct_options() {
        let fc = FutureCosts::new(3, |r| match (r.start, r.end) {
            (0, 0) => Some(-1.0),
            (1, 1) => Some(-1.0),
            (2, 2) => Some(-2.0),
            (0, 1) => Some(-5.0),
            (1, 2) => Some(-0.5),
            _ => None,
        });
        assert_eq!(fc.span(Range::new(0, 1)), -2.0);
        assert_eq!(fc.span(Range::new(1, 2)), -0.5);
        assert_eq!(fc.span(Range::new(0, 2)), -1.5);
    }

    #[test]
    fn uncoverable_words_are_penalised() {
        let fc = FutureCosts::new(2, |r| (r == Range::single(0)).then_some(-1.0));
        assert_eq!(fc.span(Range::single(1)), UNCOVERABLE_WORD);
        assert_eq!(fc.span(Range::new(0, 1)), -1.0 + UNCOVERABLE_WORD);
    }

    #[test]
    fn estimate_sums_gaps() {
        let fc = FutureCosts::new(4, |r| (r.len() == 1).then_some(-(r.start as f64) - 1.0));
        let coverage = Bitmap::empty(4).union(Range::single(1));
        // gaps [0..0] and [2..3]: -1 + (-3 - 4)
        assert_eq!(fc.estimate(&coverage), -8.0);
        assert_eq!(fc.estimate(&coverage.union(Range::single(0)).union(Range::new(2, 3))), 0.0);
    }
}
