//! Cube-pruning search core for phrase-based machine translation.
//!
//! Given a source sentence and a supply of candidate translations per source
//! span, the decoder explores partial translations (hypotheses) stack by stack,
//! bucketed by the number of source words covered, and returns the
//! highest-scoring complete translation it finds under a bounded search budget.
//!
//! ```text
//! Sentence ──▶ Decoder::decode
//!                 │  options per span (OptionSupply)  ──┐
//!                 │  isolation scoring (FeatureRegistry)├─▶ engine::CubeSearch
//!                 │  future-cost matrix                ──┘      │
//!                 ▼                                             ▼
//!            Translation  ◀── backtrace ◀── best hypothesis on the last stack
//! ```
//!
//! The search is approximate (pop limit, stack size, beam) but deterministic:
//! all ties are broken on values, never on allocation order.

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod features;
mod phrase_table;

use std::fmt;

pub use api::{Decoder, Options, SearchDetails, StackSummary, Translation, TranslationSegment};
pub use engine::{Bitmap, BitmapId, Derivation, HypId, Hypothesis, SearchOutcome};
pub use error::{DecodeError, ScoreError, TableError};
pub use features::{
    Application, CacheModel, CacheQuery, CacheScoring, CandidateSource, Capabilities, DistortionPenalty,
    ExtraCandidate, Feature, FeatureRegistry, FeatureState, FrontierHypothesis, NgramModel, WordPenalty,
};
pub use phrase_table::PhraseTable;

// --- Shared value types -------------------------------------------------------

/// A closed, contiguous span `[start, end]` of source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    /// First covered position (inclusive).
    pub start: usize,
    /// Last covered position (inclusive).
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "range start {start} after end {end}");
        Range { start, end }
    }

    pub fn single(pos: usize) -> Self {
        Range { start: pos, end: pos }
    }

    /// Number of source words in the span. Assumes `start <= end`, which
    /// [`Range::new`] checks but direct construction does not.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

/// A tokenized source sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    words: Vec<String>,
}

impl Sentence {
    pub fn new(words: Vec<String>) -> Self {
        Sentence { words }
    }

    /// Whitespace tokenization. Anything smarter belongs to the caller.
    pub fn parse(text: &str) -> Self {
        Sentence { words: text.split_whitespace().map(str::to_string).collect() }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Source words covered by `range`.
    pub fn slice(&self, range: Range) -> &[String] {
        &self.words[range.start..=range.end]
    }

    /// Source words covered by `range`, joined with single spaces.
    pub fn phrase(&self, range: Range) -> String {
        self.slice(range).join(" ")
    }
}

/// Target side of a translation option.
///
/// The derived ordering is lexicographic over the words and is the value used
/// for every deterministic tie-break in the search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetPhrase {
    words: Vec<String>,
}

impl TargetPhrase {
    pub fn new(words: Vec<String>) -> Self {
        TargetPhrase { words }
    }

    pub fn parse(text: &str) -> Self {
        TargetPhrase { words: text.split_whitespace().map(str::to_string).collect() }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

impl fmt::Display for TargetPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Dense feature-score vector, laid out by [`FeatureRegistry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    values: Vec<f64>,
}

impl ScoreBreakdown {
    pub fn zeros(len: usize) -> Self {
        ScoreBreakdown { values: vec![0.0; len] }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add `scores` into the slots starting at `offset`.
    pub fn add_block(&mut self, offset: usize, scores: &[f64]) {
        for (slot, s) in self.values[offset..offset + scores.len()].iter_mut().zip(scores) {
            *slot += s;
        }
    }

    pub fn plus_equals(&mut self, other: &ScoreBreakdown) {
        self.add_block(0, &other.values);
    }

    pub fn minus_equals(&mut self, other: &ScoreBreakdown) {
        for (slot, s) in self.values.iter_mut().zip(&other.values) {
            *slot -= s;
        }
    }

    /// Inner product with `weights`.
    pub fn weighted(&self, weights: &[f64]) -> f64 {
        self.values.iter().zip(weights).map(|(v, w)| v * w).sum()
    }
}

/// Where a [`TranslationOption`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionOrigin {
    /// Supplied by the [`OptionSupply`] for the span.
    Table,
    /// Synthesized from an [`ExtraCandidate`] proposed during search.
    External,
}

/// A candidate translation of one source span, scored in isolation.
#[derive(Debug, Clone)]
pub struct TranslationOption {
    pub range: Range,
    pub target: TargetPhrase,
    /// Scores known before search (phrase table + stateless features).
    pub breakdown: ScoreBreakdown,
    /// Weighted sum of `breakdown`; the heuristic used for ranking.
    pub score: f64,
    pub origin: OptionOrigin,
}

/// Raw phrase-table entry for one span, before feature scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseCandidate {
    pub target: TargetPhrase,
    /// Translation-model scores (log domain).
    pub scores: Vec<f64>,
}

/// Supplies candidate translations for a source span.
///
/// Implementations are shared by all sentence decoders and must be safe for
/// concurrent readers. An empty result means the span has no translation.
pub trait OptionSupply: Send + Sync {
    fn candidates(&self, sentence: &Sentence, range: Range) -> Result<Vec<PhraseCandidate>, ScoreError>;
}
