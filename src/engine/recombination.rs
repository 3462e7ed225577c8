//! Recombination keys.
//!
//! Two hypotheses are interchangeable for the rest of the search when they
//! cover the same source words and every stateful feature reports the same
//! state for both: any continuation scores identically from either, so only
//! the better one needs to stay live. The loser is kept as an arc on the winner
//! for n-best extraction.
//!
//! The key is exact. Feature states are compared by value; coverage by its
//! interned id.

use super::bitmap::BitmapId;
use super::hypothesis::Hypothesis;
use crate::features::FeatureState;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RecombinationKey {
    pub(crate) coverage: BitmapId,
    pub(crate) states: Vec<FeatureState>,
}

impl RecombinationKey {
    pub(crate) fn of(hyp: &Hypothesis) -> Self {
        RecombinationKey { coverage: hyp.coverage(), states: hyp.states().to_vec() }
    }
}
