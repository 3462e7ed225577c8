//! Linear distortion penalty.

use super::{Application, Capabilities, Feature, FeatureState};
use crate::ScoreError;
use crate::engine::distance_from_end;

/// Penalizes jumps in the source: minus the distortion distance between the
/// previous span and the one being applied. The state is the previous span's
/// last position, so hypotheses ending at different places never recombine.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistortionPenalty;

impl Feature for DistortionPenalty {
    fn name(&self) -> &str {
        "distortion"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::STATEFUL
    }

    fn evaluate_when_applied(
        &self,
        app: &Application<'_>,
        prev: &FeatureState,
        scores: &mut [f64],
    ) -> Result<FeatureState, ScoreError> {
        let prev_end = match prev {
            FeatureState::Empty => None,
            FeatureState::Position(end) => Some(*end),
            FeatureState::Words(_) => return Err(ScoreError::new("distortion state must be a position")),
        };
        scores[0] = -(distance_from_end(prev_end, app.range) as f64);
        Ok(FeatureState::Position(app.range.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Bitmap;
    use crate::{Range, Sentence, TargetPhrase};

    fn apply(prev: &FeatureState, range: Range) -> (f64, FeatureState) {
        let sentence = Sentence::parse("a b c d e");
        let target = TargetPhrase::parse("x");
        let coverage = Bitmap::empty(5).union(range);
        let app = Application { sentence: &sentence, prev_range: None, range, target: &target, coverage: &coverage };
        let mut scores = [0.0];
        let state = DistortionPenalty.evaluate_when_applied(&app, prev, &mut scores).unwrap();
        (scores[0], state)
    }

    #[test]
    fn monotone_steps_are_free() {
        assert_eq!(apply(&FeatureState::Empty, Range::new(0, 1)), (0.0, FeatureState::Position(1)));
        assert_eq!(apply(&FeatureState::Position(1), Range::single(2)).0, 0.0);
    }

    #[test]
    fn jumps_cost_their_distance() {
        // From the sentence start straight to position 3.
        assert_eq!(apply(&FeatureState::Empty, Range::single(3)).0, -3.0);
        // Back from position 3 to position 0.
        assert_eq!(apply(&FeatureState::Position(3), Range::single(0)).0, -4.0);
    }

    #[test]
    fn foreign_state_is_an_error() {
        let sentence = Sentence::parse("a");
        let target = TargetPhrase::parse("x");
        let coverage = Bitmap::empty(1).union(Range::single(0));
        let app =
            Application { sentence: &sentence, prev_range: None, range: Range::single(0), target: &target, coverage: &coverage };
        let bad = FeatureState::Words(vec!["a".into()]);
        assert!(DistortionPenalty.evaluate_when_applied(&app, &bad, &mut [0.0]).is_err());
    }
}
