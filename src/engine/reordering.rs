//! Reordering limits.
//!
//! Two independent checks decide whether a hypothesis with coverage `C` may be
//! extended by a span `R`:
//!
//! 1. **Walls** (`ReorderingConstraint`): hard monotonicity anchors, e.g. at
//!    punctuation. An extension that does not start at the first gap may not
//!    reach past a wall while that gap is open.
//! 2. **Distortion limit**: when the extension does not start at the first gap,
//!    the translation will later have to jump back to it. That jump is at least
//!    the distance from the end of `R` to the gap; if it already exceeds the
//!    limit the extension is rejected now.
//!
//! ```text
//! coverage  1 1 0 0 0 0        first gap = 2
//! extension       [4..5]       later jump back: 5 + 1 - 2 = 4
//! ```

use super::bitmap::Bitmap;
use crate::{Range, Sentence};

/// Distortion distance of moving from a span ending at `prev_end` (or from the
/// sentence start) to `next`. Zero for a monotone step.
pub(crate) fn distance_from_end(prev_end: Option<usize>, next: Range) -> usize {
    match prev_end {
        None => next.start,
        Some(end) => (end as isize + 1 - next.start as isize).unsigned_abs(),
    }
}

/// Distortion distance between consecutive spans.
pub(crate) fn distortion_distance(prev: Option<Range>, next: Range) -> usize {
    distance_from_end(prev.map(|r| r.end), next)
}

/// Hard reordering walls over source positions.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReorderingConstraint {
    walls: Vec<bool>,
    active: bool,
}

impl ReorderingConstraint {
    /// No walls.
    pub(crate) fn new(len: usize) -> Self {
        ReorderingConstraint { walls: vec![false; len], active: false }
    }

    /// Walls at every punctuation token when `monotone_at_punctuation` is set.
    pub(crate) fn for_sentence(sentence: &Sentence, monotone_at_punctuation: bool) -> Self {
        let mut constraint = Self::new(sentence.len());
        if monotone_at_punctuation {
            for (pos, word) in sentence.words().iter().enumerate() {
                if is_punctuation(word) {
                    constraint.set_wall(pos);
                }
            }
        }
        constraint
    }

    pub(crate) fn set_wall(&mut self, pos: usize) {
        if pos < self.walls.len() {
            self.walls[pos] = true;
            self.active = true;
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    /// False when extending `coverage` by `range` passes a wall while an
    /// earlier gap is still open.
    pub(crate) fn check(&self, coverage: &Bitmap, range: Range) -> bool {
        if !self.active {
            return true;
        }
        match coverage.first_gap() {
            Some(gap) if gap != range.start => !(gap..range.end).any(|pos| self.walls[pos]),
            _ => true,
        }
    }
}

fn is_punctuation(word: &str) -> bool {
    regex!(r"^\p{P}+$").is_match(word)
}

/// Whether `range` may extend `coverage` under the walls and the distortion
/// limit (`None` = unbounded).
pub(crate) fn check_distortion(
    coverage: &Bitmap,
    range: Range,
    max_distortion: Option<usize>,
    constraint: &ReorderingConstraint,
) -> bool {
    if !constraint.check(coverage, range) {
        return false;
    }
    let Some(limit) = max_distortion else {
        return true;
    };
    match coverage.first_gap() {
        Some(gap) if gap != range.start => distortion_distance(Some(range), Range::single(gap)) <= limit,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_for_monotone_steps() {
        assert_eq!(distortion_distance(None, Range::new(0, 2)), 0);
        assert_eq!(distortion_distance(Some(Range::new(0, 2)), Range::single(3)), 0);
        assert_eq!(distortion_distance(Some(Range::new(0, 2)), Range::single(5)), 2);
        assert_eq!(distortion_distance(Some(Range::new(4, 5)), Range::single(1)), 5);
        assert_eq!(distortion_distance(None, Range::single(3)), 3);
    }

    #[test]
    fn first_gap_extensions_always_pass() {
        let c = ReorderingConstraint::new(6);
        let coverage = Bitmap::empty(6).union(Range::new(0, 1));
        assert!(check_distortion(&coverage, Range::new(2, 5), Some(0), &c));
    }

    #[test]
    fn zero_limit_forces_monotone_order() {
        let c = ReorderingConstraint::new(4);
        let coverage = Bitmap::empty(4);
        assert!(check_distortion(&coverage, Range::single(0), Some(0), &c));
        assert!(!check_distortion(&coverage, Range::single(1), Some(0), &c));
        assert!(!check_distortion(&coverage, Range::new(2, 3), Some(0), &c));
    }

    #[test]
    fn limit_bounds_the_jump_back_to_the_gap() {
        let c = ReorderingConstraint::new(6);
        let coverage = Bitmap::empty(6).union(Range::new(0, 1));
        // jump back from end 4 to gap 2: 4 + 1 - 2 = 3
        assert!(check_distortion(&coverage, Range::single(4), Some(3), &c));
        assert!(!check_distortion(&coverage, Range::single(4), Some(2), &c));
        assert!(check_distortion(&coverage, Range::single(5), None, &c));
    }

    #[test]
    fn punctuation_walls_block_skipping_ahead() {
        let sentence = Sentence::parse("a b , c d");
        let c = ReorderingConstraint::for_sentence(&sentence, true);
        assert!(c.is_active());
        let empty = Bitmap::empty(5);
        assert!(check_distortion(&empty, Range::single(1), None, &c));
        assert!(!check_distortion(&empty, Range::new(3, 4), None, &c));

        let left_done = empty.union(Range::new(0, 2));
        assert!(check_distortion(&left_done, Range::single(4), None, &c));

        let off = ReorderingConstraint::for_sentence(&sentence, false);
        assert!(!off.is_active());
        assert!(check_distortion(&empty, Range::new(3, 4), None, &off));
    }
}
