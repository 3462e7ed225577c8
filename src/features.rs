//! Scoring contract and feature registry.
//!
//! Features are the external scoring collaborators of the search. The engine
//! never inspects concrete feature types; instead every feature declares its
//! [`Capabilities`] and the [`FeatureRegistry`] resolves the roles once, when it
//! is built:
//!
//! ```text
//! FeatureRegistry::new(tm weights)
//!     .with_feature(DistortionPenalty)   STATEFUL           -> evaluated per edge
//!     .with_feature(WordPenalty)         (stateless)        -> evaluated per option
//!     .with_feature(source)              EXTRA_CANDIDATES   -> candidate_source()
//! ```
//!
//! ## Score layout
//!
//! A [`ScoreBreakdown`] is a dense vector. Slots `0..tm_len` hold the
//! translation-model scores supplied with each phrase; every feature then owns
//! a contiguous block of `num_scores()` slots in registration order. The total
//! score of anything is `weights · breakdown`.
//!
//! ## Determinism
//!
//! Features must return identical scores and states for identical inputs
//! within one sentence. Stateless features are evaluated once per option when
//! the sentence's option collection is built, so a shared resource that is
//! updated between sentences (see [`CacheModel`]) cannot change scores in the
//! middle of a decode.

#[path = "features/cache.rs"]
mod cache;
#[path = "features/distortion.rs"]
mod distortion;
#[path = "features/ngram.rs"]
mod ngram;
#[path = "features/word_penalty.rs"]
mod word_penalty;

pub use cache::{CacheModel, CacheQuery, CacheScoring};
pub use distortion::DistortionPenalty;
pub use ngram::NgramModel;
pub use word_penalty::WordPenalty;

use crate::engine::Bitmap;
use crate::{
    DecodeError, OptionOrigin, PhraseCandidate, Range, ScoreBreakdown, ScoreError, Sentence, TargetPhrase,
    TranslationOption,
};
use std::sync::Arc;

bitflags::bitflags! {
    /// Roles a feature can play in the search.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Scored when an edge is applied; carries a `FeatureState`.
        const STATEFUL         = 1 << 0;
        /// Proposes extra candidate phrases after each stack is pruned.
        const EXTRA_CANDIDATES = 1 << 1;
    }
}

/// State a stateful feature carries from a hypothesis to its successors.
///
/// Two hypotheses with the same coverage and equal states for every stateful
/// feature are indistinguishable to all future scoring, so they recombine.
/// Keep states bounded (e.g. the last n-1 target words, not the whole output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureState {
    #[default]
    Empty,
    Position(usize),
    Words(Vec<String>),
}

/// Everything a stateful feature may look at when an option is applied.
#[derive(Debug, Clone, Copy)]
pub struct Application<'a> {
    pub sentence: &'a Sentence,
    /// Span translated by the predecessor, `None` for the root.
    pub prev_range: Option<Range>,
    pub range: Range,
    pub target: &'a TargetPhrase,
    /// Coverage after applying `range`.
    pub coverage: &'a Bitmap,
}

impl Application<'_> {
    /// True when this application covers the last open source word.
    pub fn completes(&self) -> bool {
        self.coverage.is_complete()
    }
}

/// A scoring component.
///
/// Implementations are shared by all sentence decoders and must be safe for
/// concurrent readers.
pub trait Feature: Send + Sync {
    fn name(&self) -> &str;

    fn num_scores(&self) -> usize {
        1
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Scores that depend only on the phrase pair.
    fn evaluate_in_isolation(&self, _source: &[String], _target: &TargetPhrase, _scores: &mut [f64]) {}

    /// State of the root hypothesis.
    fn empty_state(&self, _sentence: &Sentence) -> FeatureState {
        FeatureState::Empty
    }

    /// Scores that depend on the predecessor's state. Only called for features
    /// declaring [`Capabilities::STATEFUL`].
    fn evaluate_when_applied(
        &self,
        _app: &Application<'_>,
        _prev: &FeatureState,
        _scores: &mut [f64],
    ) -> Result<FeatureState, ScoreError> {
        Ok(FeatureState::Empty)
    }

    /// The candidate-source role. Must return `Some` when the feature declares
    /// [`Capabilities::EXTRA_CANDIDATES`].
    fn as_candidate_source(&self) -> Option<&dyn CandidateSource> {
        None
    }
}

/// Lets a feature be registered while the caller keeps a handle to it, e.g.
/// to update a [`CacheModel`] between sentences.
impl<F: Feature + ?Sized> Feature for Arc<F> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn num_scores(&self) -> usize {
        (**self).num_scores()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn evaluate_in_isolation(&self, source: &[String], target: &TargetPhrase, scores: &mut [f64]) {
        (**self).evaluate_in_isolation(source, target, scores)
    }

    fn empty_state(&self, sentence: &Sentence) -> FeatureState {
        (**self).empty_state(sentence)
    }

    fn evaluate_when_applied(
        &self,
        app: &Application<'_>,
        prev: &FeatureState,
        scores: &mut [f64],
    ) -> Result<FeatureState, ScoreError> {
        (**self).evaluate_when_applied(app, prev, scores)
    }

    fn as_candidate_source(&self) -> Option<&dyn CandidateSource> {
        (**self).as_candidate_source()
    }
}

/// Read-only view of a pruned stack entry handed to a [`CandidateSource`].
#[derive(Debug, Clone)]
pub struct FrontierHypothesis<'a> {
    /// Position in the frontier; echoed back as [`ExtraCandidate::prev_index`].
    pub index: usize,
    pub coverage: &'a Bitmap,
    /// Target words produced so far, in output order.
    pub output: Vec<&'a str>,
    pub score: f64,
}

impl FrontierHypothesis<'_> {
    pub fn is_complete(&self) -> bool {
        self.coverage.is_complete()
    }
}

/// A phrase proposed for a frontier hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraCandidate {
    pub prev_index: usize,
    /// Source span the phrase translates; `None` proposals are ignored.
    pub span: Option<Range>,
    pub phrase: String,
    /// Added to the proposing feature's first score slot.
    pub score: f64,
}

/// Proposes extra candidate phrases for the current frontier.
///
/// Called at most once per stack, after pruning. May return nothing.
pub trait CandidateSource: Send + Sync {
    fn propose(
        &self,
        sentence: &Sentence,
        frontier: &[FrontierHypothesis<'_>],
    ) -> Result<Vec<ExtraCandidate>, ScoreError>;
}

struct Registered {
    feature: Box<dyn Feature>,
    offset: usize,
    len: usize,
}

/// Ordered set of features with their weights and resolved roles.
pub struct FeatureRegistry {
    tm_len: usize,
    features: Vec<Registered>,
    weights: Vec<f64>,
    stateful: Vec<usize>,
    candidate_source: Option<usize>,
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("tm_len", &self.tm_len)
            .field("features", &self.features.iter().map(|r| r.feature.name()).collect::<Vec<_>>())
            .field("weights", &self.weights)
            .field("candidate_source", &self.candidate_source)
            .finish()
    }
}

impl FeatureRegistry {
    /// A registry with only the translation-model block, one weight per
    /// phrase-table score.
    pub fn new(tm_weights: Vec<f64>) -> Self {
        FeatureRegistry {
            tm_len: tm_weights.len(),
            features: Vec::new(),
            weights: tm_weights,
            stateful: Vec::new(),
            candidate_source: None,
        }
    }

    /// Register `feature` with one weight per score slot.
    ///
    /// Fails when the weight count is wrong, when a second feature claims the
    /// extra-candidate role, or when a feature claims that role without
    /// providing it.
    pub fn with_feature(mut self, feature: Box<dyn Feature>, weights: Vec<f64>) -> Result<Self, DecodeError> {
        let len = feature.num_scores();
        if weights.len() != len {
            return Err(DecodeError::Config(format!(
                "feature '{}' has {} scores but {} weights were given",
                feature.name(),
                len,
                weights.len()
            )));
        }
        let caps = feature.capabilities();
        let index = self.features.len();
        if caps.contains(Capabilities::EXTRA_CANDIDATES) {
            if len == 0 {
                return Err(DecodeError::Config(format!(
                    "candidate source '{}' needs at least one score slot",
                    feature.name()
                )));
            }
            if feature.as_candidate_source().is_none() {
                return Err(DecodeError::Config(format!(
                    "feature '{}' claims extra candidates but provides no source",
                    feature.name()
                )));
            }
            if let Some(existing) = self.candidate_source {
                return Err(DecodeError::Config(format!(
                    "only one candidate source is supported ('{}' and '{}')",
                    self.features[existing].feature.name(),
                    feature.name()
                )));
            }
            self.candidate_source = Some(index);
        }
        if caps.contains(Capabilities::STATEFUL) {
            self.stateful.push(index);
        }
        let offset = self.weights.len();
        self.weights.extend(weights);
        self.features.push(Registered { feature, offset, len });
        Ok(self)
    }

    /// Number of translation-model slots.
    pub fn tm_len(&self) -> usize {
        self.tm_len
    }

    /// Total number of score slots.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|r| r.feature.name()).collect()
    }

    /// One label per score slot: `tm0..tmN`, then feature names (suffixed with
    /// an index for multi-score features).
    pub fn slot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.tm_len).map(|i| format!("tm{i}")).collect();
        for r in &self.features {
            if r.len == 1 {
                names.push(r.feature.name().to_string());
            } else {
                names.extend((0..r.len).map(|i| format!("{}{}", r.feature.name(), i)));
            }
        }
        names
    }

    pub(crate) fn stateful_count(&self) -> usize {
        self.stateful.len()
    }

    /// The resolved candidate source and the slot its scores go to.
    pub(crate) fn candidate_source(&self) -> Option<(&dyn CandidateSource, usize)> {
        let r = &self.features[self.candidate_source?];
        r.feature.as_candidate_source().map(|source| (source, r.offset))
    }

    /// Score a supplied phrase for `range` in isolation.
    pub(crate) fn score_option(
        &self,
        sentence: &Sentence,
        range: Range,
        candidate: PhraseCandidate,
    ) -> Result<TranslationOption, DecodeError> {
        if candidate.scores.len() != self.tm_len {
            return Err(DecodeError::Config(format!(
                "phrase '{}' -> '{}' has {} scores, expected {}",
                sentence.phrase(range),
                candidate.target,
                candidate.scores.len(),
                self.tm_len
            )));
        }
        let mut breakdown = ScoreBreakdown::zeros(self.len());
        breakdown.add_block(0, &candidate.scores);
        Ok(self.finish_option(sentence, range, candidate.target, breakdown, OptionOrigin::Table))
    }

    /// Wrap a proposed phrase as an option. `slot` is the proposing feature's
    /// first score slot.
    pub(crate) fn external_option(
        &self,
        sentence: &Sentence,
        range: Range,
        candidate: &ExtraCandidate,
        slot: usize,
    ) -> TranslationOption {
        let mut breakdown = ScoreBreakdown::zeros(self.len());
        breakdown.add_block(slot, &[candidate.score]);
        let target = TargetPhrase::parse(&candidate.phrase);
        self.finish_option(sentence, range, target, breakdown, OptionOrigin::External)
    }

    fn finish_option(
        &self,
        sentence: &Sentence,
        range: Range,
        target: TargetPhrase,
        mut breakdown: ScoreBreakdown,
        origin: OptionOrigin,
    ) -> TranslationOption {
        let source = sentence.slice(range);
        let mut scratch = Vec::new();
        for r in &self.features {
            scratch.clear();
            scratch.resize(r.len, 0.0);
            r.feature.evaluate_in_isolation(source, &target, &mut scratch);
            breakdown.add_block(r.offset, &scratch);
        }
        let score = breakdown.weighted(&self.weights);
        TranslationOption { range, target, breakdown, score, origin }
    }

    /// Root states, one per stateful feature.
    pub(crate) fn empty_states(&self, sentence: &Sentence) -> Vec<FeatureState> {
        self.stateful.iter().map(|&i| self.features[i].feature.empty_state(sentence)).collect()
    }

    /// Run every stateful feature for `app`, adding into `breakdown`.
    pub(crate) fn evaluate_when_applied(
        &self,
        app: &Application<'_>,
        prev_states: &[FeatureState],
        breakdown: &mut ScoreBreakdown,
    ) -> Result<Vec<FeatureState>, DecodeError> {
        let mut states = Vec::with_capacity(self.stateful.len());
        let mut scratch = Vec::new();
        for (&i, prev) in self.stateful.iter().zip(prev_states) {
            let r = &self.features[i];
            scratch.clear();
            scratch.resize(r.len, 0.0);
            let state = r
                .feature
                .evaluate_when_applied(app, prev, &mut scratch)
                .map_err(|err| DecodeError::Scoring { feature: r.feature.name().to_string(), message: err.message })?;
            breakdown.add_block(r.offset, &scratch);
            states.push(state);
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Proposer;

    impl CandidateSource for Proposer {
        fn propose(&self, _: &Sentence, _: &[FrontierHypothesis<'_>]) -> Result<Vec<ExtraCandidate>, ScoreError> {
            Ok(Vec::new())
        }
    }

    impl Feature for Proposer {
        fn name(&self) -> &str {
            "proposer"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::EXTRA_CANDIDATES
        }

        fn as_candidate_source(&self) -> Option<&dyn CandidateSource> {
            Some(self)
        }
    }

    struct Liar;

    impl Feature for Liar {
        fn name(&self) -> &str {
            "liar"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::EXTRA_CANDIDATES
        }
    }

    #[test]
    fn layout_follows_registration_order() {
        let reg = FeatureRegistry::new(vec![1.0, 0.5])
            .with_feature(Box::new(DistortionPenalty), vec![0.3])
            .unwrap()
            .with_feature(Box::new(WordPenalty), vec![-0.2])
            .unwrap();
        assert_eq!(reg.tm_len(), 2);
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.slot_names(), vec!["tm0", "tm1", "distortion", "word_penalty"]);
        assert_eq!(reg.stateful_count(), 1);
        assert!(reg.candidate_source().is_none());
    }

    #[test]
    fn option_scores_include_isolation_features() {
        let reg = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(WordPenalty), vec![0.5]).unwrap();
        let sentence = Sentence::parse("das haus");
        let cand = PhraseCandidate { target: TargetPhrase::parse("the house"), scores: vec![-1.0] };
        let opt = reg.score_option(&sentence, Range::new(0, 1), cand).unwrap();
        assert_eq!(opt.breakdown.values(), &[-1.0, -2.0]);
        assert_eq!(opt.score, -2.0);
        assert_eq!(opt.origin, OptionOrigin::Table);
    }

    #[test]
    fn wrong_score_count_is_a_config_error() {
        let reg = FeatureRegistry::new(vec![1.0, 1.0]);
        let sentence = Sentence::parse("haus");
        let cand = PhraseCandidate { target: TargetPhrase::parse("house"), scores: vec![-1.0] };
        assert!(matches!(reg.score_option(&sentence, Range::single(0), cand), Err(DecodeError::Config(_))));
        assert!(matches!(
            FeatureRegistry::new(vec![]).with_feature(Box::new(WordPenalty), vec![]),
            Err(DecodeError::Config(_))
        ));
    }

    #[test]
    fn candidate_source_role_resolves_once() {
        let reg = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(Proposer), vec![2.0]).unwrap();
        let (_, slot) = reg.candidate_source().unwrap();
        assert_eq!(slot, 1);

        let twice = reg.with_feature(Box::new(Proposer), vec![1.0]);
        assert!(matches!(twice, Err(DecodeError::Config(msg)) if msg.contains("only one")));

        let liar = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(Liar), vec![1.0]);
        assert!(matches!(liar, Err(DecodeError::Config(_))));
    }

    #[test]
    fn shared_cache_updates_reach_the_next_sentence() {
        let cache = Arc::new(CacheModel::new(CacheQuery::WholeString, CacheScoring::HyperbolaReward, 3));
        let reg = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(cache.clone()), vec![1.0]).unwrap();
        assert_eq!(reg.slot_names(), vec!["tm0", "cache"]);

        let sentence = Sentence::parse("haus");
        let cand = || PhraseCandidate { target: TargetPhrase::parse("house"), scores: vec![0.0] };
        assert_eq!(reg.score_option(&sentence, Range::single(0), cand()).unwrap().score, 0.0);

        cache.insert(&["house"]);
        assert_eq!(reg.score_option(&sentence, Range::single(0), cand()).unwrap().score, 1.0);
    }

    #[test]
    fn external_option_scores_in_source_slot() {
        let reg = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(Proposer), vec![2.0]).unwrap();
        let sentence = Sentence::parse("ein haus");
        let extra = ExtraCandidate { prev_index: 0, span: Some(Range::single(1)), phrase: "house".into(), score: -0.5 };
        let opt = reg.external_option(&sentence, Range::single(1), &extra, 1);
        assert_eq!(opt.breakdown.values(), &[0.0, -0.5]);
        assert_eq!(opt.score, -1.0);
        assert_eq!(opt.origin, OptionOrigin::External);
        assert_eq!(opt.target.text(), "house");
    }
}
