use crate::engine::{CubeSearch, Derivation, SearchOutcome, StackMetrics};
use crate::{DecodeError, FeatureRegistry, OptionOrigin, OptionSupply, Range, Sentence};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Search limits and pruning knobs.
///
/// Passed by value to [`Decoder::new`] and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Histogram pruning: live hypotheses kept per stack.
    pub stack_size: usize,
    /// Beam ratio: a hypothesis is dropped when its probability is below
    /// `beam_threshold` times the stack's best. `0.0` disables the beam.
    pub beam_threshold: f64,
    /// Promotions per stack from the main loop.
    pub pop_limit: usize,
    /// Minimum promotions per expansion container (`0` disables).
    pub diversity: usize,
    /// Cap on the diversity pass's forced promotions per stack (`None` = no cap).
    pub diversity_budget: Option<usize>,
    /// Reordering limit (`None` = unbounded). Punctuation walls from
    /// `monotone_at_punctuation` still apply when unbounded.
    pub max_distortion: Option<usize>,
    /// Longest source span, in words, that options are collected for.
    pub max_phrase_length: usize,
    /// Options kept per span after scoring (`0` keeps all).
    pub table_limit: usize,
    /// Wall-clock budget per sentence, checked between stacks.
    pub time_limit: Option<Duration>,
    /// Treat punctuation tokens as reordering walls.
    pub monotone_at_punctuation: bool,
    /// Fail with [`DecodeError::Incomplete`] instead of returning a partial
    /// translation.
    pub require_full_coverage: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            stack_size: 100,
            beam_threshold: 1e-5,
            pop_limit: 1000,
            diversity: 0,
            diversity_budget: None,
            max_distortion: Some(6),
            max_phrase_length: 20,
            table_limit: 20,
            time_limit: None,
            monotone_at_punctuation: false,
            require_full_coverage: false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.stack_size == 0 {
            return Err(DecodeError::Config("stack_size must be at least 1".into()));
        }
        if self.pop_limit == 0 {
            return Err(DecodeError::Config("pop_limit must be at least 1".into()));
        }
        if self.max_phrase_length == 0 {
            return Err(DecodeError::Config("max_phrase_length must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.beam_threshold) {
            return Err(DecodeError::Config(format!("beam_threshold {} is outside [0, 1]", self.beam_threshold)));
        }
        Ok(())
    }
}

/// One applied phrase of a translation, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationSegment {
    pub source: Range,
    pub source_text: String,
    pub target: String,
    pub origin: OptionOrigin,
}

/// Result from [`Decoder::decode`].
#[derive(Debug, Clone)]
pub struct Translation {
    /// The source sentence, tokens joined with single spaces.
    pub source: String,
    pub text: String,
    /// Model score of the translation.
    pub score: f64,
    /// One `(slot name, value)` pair per score slot, unweighted.
    pub features: Vec<(String, f64)>,
    pub segments: Vec<TranslationSegment>,
    /// Source words covered; less than the sentence length for partial results.
    pub covered: usize,
    pub complete: bool,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Counters for one stack.
#[derive(Debug, Clone)]
pub struct StackSummary {
    pub cardinality: usize,
    pub containers: usize,
    pub pops: usize,
    pub diversity_pops: usize,
    pub inserted: usize,
    pub recombined: usize,
    pub beam_rejected: usize,
    pub pruned: usize,
    pub size: usize,
    pub duration: Duration,
}

/// Additional details returned by [`Decoder::decode_verbose`].
#[derive(Debug, Clone)]
pub struct SearchDetails {
    pub total: Duration,
    /// Time spent collecting and scoring options.
    pub collect: Duration,
    pub stacks: Vec<StackSummary>,
    pub timed_out: bool,
    pub hypotheses: usize,
    pub coverage_states: usize,
    pub options: usize,
    pub extra_merged: usize,
    pub extra_discarded: usize,
}

impl SearchDetails {
    fn from_outcome(outcome: &SearchOutcome) -> Self {
        let m = outcome.metrics();
        SearchDetails {
            total: m.total,
            collect: m.collect,
            stacks: outcome.stack_metrics().iter().map(stack_summary).collect(),
            timed_out: m.timed_out,
            hypotheses: m.hypotheses,
            coverage_states: m.coverage_states,
            options: m.options,
            extra_merged: m.extra_merged,
            extra_discarded: m.extra_discarded,
        }
    }
}

fn stack_summary(m: &StackMetrics) -> StackSummary {
    StackSummary {
        cardinality: m.cardinality,
        containers: m.containers,
        pops: m.pops,
        diversity_pops: m.diversity_pops,
        inserted: m.inserted,
        recombined: m.recombined,
        beam_rejected: m.beam_rejected,
        pruned: m.pruned,
        size: m.size,
        duration: m.duration,
    }
}

/// A configured decoder: option supply, features and limits.
///
/// Shared by reference across threads; every call owns its search state.
pub struct Decoder {
    supply: Box<dyn OptionSupply>,
    registry: FeatureRegistry,
    options: Options,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").field("registry", &self.registry).field("options", &self.options).finish()
    }
}

impl Decoder {
    /// Fails with [`DecodeError::Config`] when `options` are invalid.
    pub fn new(
        supply: impl OptionSupply + 'static,
        registry: FeatureRegistry,
        options: Options,
    ) -> Result<Self, DecodeError> {
        options.validate()?;
        Ok(Decoder { supply: Box::new(supply), registry, options })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Run the search and keep everything it retained.
    pub fn search(&self, sentence: &Sentence) -> Result<SearchOutcome, DecodeError> {
        CubeSearch::new(sentence, self.supply.as_ref(), &self.registry, &self.options)?.run()
    }

    /// Decode whitespace-tokenized `text`.
    ///
    /// # Example
    /// ```
    /// use cube_decoder::{Decoder, DistortionPenalty, FeatureRegistry, Options, PhraseTable};
    ///
    /// let table = PhraseTable::parse("das ||| the ||| 1\nhaus ||| house ||| 1\n").unwrap();
    /// let registry = FeatureRegistry::new(vec![1.0]).with_feature(Box::new(DistortionPenalty), vec![1.0]).unwrap();
    /// let decoder = Decoder::new(table, registry, Options::default()).unwrap();
    /// assert_eq!(decoder.decode("das haus").unwrap().text, "the house");
    /// ```
    pub fn decode(&self, text: &str) -> Result<Translation, DecodeError> {
        self.decode_sentence(&Sentence::parse(text))
    }

    pub fn decode_sentence(&self, sentence: &Sentence) -> Result<Translation, DecodeError> {
        let started = Instant::now();
        let outcome = self.search(sentence)?;
        Ok(self.translation(&outcome, &outcome.derivation(outcome.best().id()), started.elapsed()))
    }

    /// Decode `text` and return the search counters along with the result.
    pub fn decode_verbose(&self, text: &str) -> Result<(Translation, SearchDetails), DecodeError> {
        let started = Instant::now();
        let outcome = self.search(&Sentence::parse(text))?;
        let translation = self.translation(&outcome, &outcome.derivation(outcome.best().id()), started.elapsed());
        Ok((translation, SearchDetails::from_outcome(&outcome)))
    }

    /// Up to `n` distinct translations, best first.
    pub fn n_best(&self, text: &str, n: usize) -> Result<Vec<Translation>, DecodeError> {
        let started = Instant::now();
        let outcome = self.search(&Sentence::parse(text))?;
        let elapsed = started.elapsed();
        Ok(outcome.n_best(n).iter().map(|d| self.translation(&outcome, d, elapsed)).collect())
    }

    /// Decode independent sentences in parallel. Results keep input order.
    pub fn decode_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Vec<Result<Translation, DecodeError>> {
        texts.par_iter().map(|text| self.decode(text.as_ref())).collect()
    }

    fn translation(&self, outcome: &SearchOutcome, derivation: &Derivation, elapsed: Duration) -> Translation {
        let sentence = outcome.sentence();
        let covered = derivation.steps.last().map(|&id| outcome.hypothesis(id).num_covered()).unwrap_or(0);
        let segments = derivation
            .steps
            .iter()
            .filter_map(|&id| {
                let step = outcome.hypothesis(id);
                let range = step.range()?;
                Some(TranslationSegment {
                    source: range,
                    source_text: sentence.phrase(range),
                    target: step.target().text(),
                    origin: outcome.option(step).map(|o| o.origin).unwrap_or(OptionOrigin::Table),
                })
            })
            .collect();
        let features =
            self.registry.slot_names().into_iter().zip(derivation.breakdown.values().iter().copied()).collect();

        Translation {
            source: sentence.words().join(" "),
            text: derivation.text(outcome),
            score: derivation.score,
            features,
            segments,
            covered,
            complete: covered == sentence.len(),
            timed_out: outcome.timed_out(),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DistortionPenalty, PhraseTable, WordPenalty};

    fn table() -> PhraseTable {
        PhraseTable::parse(
            "\
das ||| the ||| 0.6
das ||| that ||| 0.3
haus ||| house ||| 0.8
haus ||| home ||| 0.15
ist ||| is ||| 0.9
klein ||| small ||| 0.7
klein ||| little ||| 0.25
das haus ||| the house ||| 0.5
",
        )
        .unwrap()
    }

    fn decoder(options: Options) -> Decoder {
        let registry = FeatureRegistry::new(vec![1.0])
            .with_feature(Box::new(DistortionPenalty), vec![1.0])
            .and_then(|r| r.with_feature(Box::new(WordPenalty), vec![0.1]))
            .unwrap();
        Decoder::new(table(), registry, options).unwrap()
    }

    #[test]
    fn decode_returns_segments_and_features() {
        let out = decoder(Options::default()).decode("das haus ist klein").unwrap();
        assert_eq!(out.text, "the house is small");
        assert!(out.complete);
        assert_eq!(out.covered, 4);
        assert!(!out.timed_out);
        assert_eq!(out.features.len(), 3);
        assert_eq!(out.features[0].0, "tm0");
        assert_eq!(out.features[1], ("distortion".to_string(), 0.0));
        assert_eq!(out.features[2], ("word_penalty".to_string(), -4.0));

        let covered: usize = out.segments.iter().map(|s| s.source.len()).sum();
        assert_eq!(covered, 4);
        assert!(out.segments.iter().all(|s| s.origin == OptionOrigin::Table));
        let weighted: f64 = out.features[0].1 + out.features[1].1 + 0.1 * out.features[2].1;
        assert!((weighted - out.score).abs() < 1e-9);
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        for options in [
            Options { pop_limit: 0, ..Options::default() },
            Options { stack_size: 0, ..Options::default() },
            Options { max_phrase_length: 0, ..Options::default() },
            Options { beam_threshold: 2.0, ..Options::default() },
            Options { beam_threshold: f64::NAN, ..Options::default() },
        ] {
            let err = Decoder::new(table(), FeatureRegistry::new(vec![1.0]), options).unwrap_err();
            assert!(matches!(err, DecodeError::Config(_)), "{err}");
        }
    }

    #[test]
    fn untranslatable_word_gives_partial_result_unless_required() {
        let out = decoder(Options::default()).decode("das haus xyz").unwrap();
        assert!(!out.complete);
        assert_eq!(out.covered, 2);
        assert_eq!(out.text, "the house");

        let strict = decoder(Options { require_full_coverage: true, ..Options::default() });
        let err = strict.decode("das haus xyz").unwrap_err();
        assert_eq!(err, DecodeError::Incomplete { covered: 2, total: 3 });
    }

    #[test]
    fn empty_sentence_translates_to_nothing() {
        let out = decoder(Options::default()).decode("   ").unwrap();
        assert_eq!(out.text, "");
        assert!(out.complete);
        assert!(out.segments.is_empty());
    }

    #[test]
    fn n_best_lists_distinct_translations_best_first() {
        let list = decoder(Options::default()).n_best("das klein", 3).unwrap();
        let texts: Vec<&str> = list.iter().map(|t| t.text.as_str()).collect();
        // "that small" only survives as an arc recombined into "the" on stack 1
        assert_eq!(texts, vec!["the small", "that small", "the little"]);
        assert!(list.windows(2).all(|w| w[0].score >= w[1].score));
        for t in &list {
            let weighted: f64 = t.features[0].1 + t.features[1].1 + 0.1 * t.features[2].1;
            assert!((weighted - t.score).abs() < 1e-9, "{}", t.text);
        }
        assert_eq!(list[1].segments[0].target, "that");
    }

    #[test]
    fn batch_matches_sequential_decoding() {
        let d = decoder(Options::default());
        let inputs = ["das haus", "klein ist das haus", "ist klein", "haus"];
        let batch = d.decode_batch(&inputs);
        for (text, result) in inputs.iter().zip(batch) {
            let single = d.decode(text).unwrap();
            let parallel = result.unwrap();
            assert_eq!(single.text, parallel.text);
            assert_eq!(single.score.to_bits(), parallel.score.to_bits());
        }
    }

    #[test]
    fn verbose_details_cover_every_stack() {
        let (out, details) = decoder(Options::default()).decode_verbose("das haus ist").unwrap();
        assert_eq!(out.text, "the house is");
        assert_eq!(details.stacks.len(), 4);
        assert_eq!(details.stacks[0].size, 1);
        assert!(details.stacks.iter().all(|s| s.pops <= 1000));
        assert!(details.hypotheses > 3);
        assert!(details.collect <= details.total);
    }
}
