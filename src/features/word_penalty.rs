//! Target length penalty.

use super::Feature;
use crate::TargetPhrase;

/// Minus one per produced target word. With a negative weight it rewards
/// longer output instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordPenalty;

impl Feature for WordPenalty {
    fn name(&self) -> &str {
        "word_penalty"
    }

    fn evaluate_in_isolation(&self, _source: &[String], target: &TargetPhrase, scores: &mut [f64]) {
        scores[0] = -(target.len() as f64);
    }
}
