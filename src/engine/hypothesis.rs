//! Hypotheses and the per-sentence hypothesis arena.
//!
//! Hypotheses are stored in one arena per sentence and refer to their
//! predecessor by `HypId`. Pruning a stack only removes ids from that stack;
//! the arena keeps every promoted hypothesis until the sentence is done, so a
//! back-chain from any retained hypothesis is always walkable:
//!
//! ```text
//! root(0) ◀── h3 [0..1] ◀── h9 [3..3] ◀── h14 [2..2]     (prev pointers)
//! ```
//!
//! `prev` always points into a stack of strictly smaller cardinality, so the
//! walk terminates.

use super::bitmap::BitmapId;
use super::collection::OptionId;
use crate::features::FeatureState;
use crate::{Range, ScoreBreakdown, TargetPhrase};
use std::cmp::Ordering;

/// Handle of a hypothesis in its sentence's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HypId(u32);

impl HypId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node of the search graph.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    id: HypId,
    prev: Option<HypId>,
    range: Option<Range>,
    option: Option<OptionId>,
    target: TargetPhrase,
    coverage: BitmapId,
    num_covered: usize,
    score: f64,
    future: f64,
    breakdown: ScoreBreakdown,
    states: Vec<FeatureState>,
    arcs: Vec<HypId>,
}

impl Hypothesis {
    pub fn id(&self) -> HypId {
        self.id
    }

    /// Predecessor, `None` for the root.
    pub fn prev(&self) -> Option<HypId> {
        self.prev
    }

    /// Span translated by this step, `None` for the root.
    pub fn range(&self) -> Option<Range> {
        self.range
    }

    pub(crate) fn option(&self) -> Option<OptionId> {
        self.option
    }

    /// Target phrase produced by this step (empty for the root).
    pub fn target(&self) -> &TargetPhrase {
        &self.target
    }

    pub fn coverage(&self) -> BitmapId {
        self.coverage
    }

    pub fn num_covered(&self) -> usize {
        self.num_covered
    }

    /// Accumulated model score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Estimate of the best score still obtainable for the uncovered words.
    pub fn future(&self) -> f64 {
        self.future
    }

    /// Score used for every ranking decision.
    pub fn total(&self) -> f64 {
        self.score + self.future
    }

    pub fn breakdown(&self) -> &ScoreBreakdown {
        &self.breakdown
    }

    pub(crate) fn states(&self) -> &[FeatureState] {
        &self.states
    }

    /// Equivalent hypotheses that lost recombination against this one.
    pub fn arcs(&self) -> &[HypId] {
        &self.arcs
    }

    pub fn is_root(&self) -> bool {
        self.prev.is_none()
    }
}

/// Best-first order: higher total first, then the lexicographically greater
/// target phrase, then the earlier id.
pub(crate) fn best_first(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    b.total().total_cmp(&a.total()).then_with(|| b.target.cmp(&a.target)).then_with(|| a.id.cmp(&b.id))
}

/// A scored edge that has not been promoted yet.
#[derive(Debug, Clone)]
pub(crate) struct Extension {
    pub(crate) prev: HypId,
    pub(crate) range: Range,
    pub(crate) option: OptionId,
    pub(crate) target: TargetPhrase,
    pub(crate) coverage: BitmapId,
    pub(crate) num_covered: usize,
    pub(crate) score: f64,
    pub(crate) future: f64,
    pub(crate) breakdown: ScoreBreakdown,
    pub(crate) states: Vec<FeatureState>,
}

impl Extension {
    pub(crate) fn total(&self) -> f64 {
        self.score + self.future
    }
}

/// Owns every hypothesis created while decoding one sentence.
#[derive(Debug, Default)]
pub(crate) struct HypothesisArena {
    hyps: Vec<Hypothesis>,
    referenced: Vec<bool>,
}

impl HypothesisArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.hyps.len()
    }

    pub(crate) fn get(&self, id: HypId) -> &Hypothesis {
        &self.hyps[id.index()]
    }

    /// The empty hypothesis: nothing covered, nothing produced.
    pub(crate) fn push_root(
        &mut self,
        coverage: BitmapId,
        future: f64,
        slots: usize,
        states: Vec<FeatureState>,
    ) -> HypId {
        self.insert(Hypothesis {
            id: HypId(0),
            prev: None,
            range: None,
            option: None,
            target: TargetPhrase::default(),
            coverage,
            num_covered: 0,
            score: 0.0,
            future,
            breakdown: ScoreBreakdown::zeros(slots),
            states,
            arcs: Vec::new(),
        })
    }

    /// Promote a scored edge into a hypothesis.
    pub(crate) fn promote(&mut self, ext: Extension) -> HypId {
        let prev = ext.prev;
        let id = self.insert(Hypothesis {
            id: HypId(0),
            prev: Some(prev),
            range: Some(ext.range),
            option: Some(ext.option),
            target: ext.target,
            coverage: ext.coverage,
            num_covered: ext.num_covered,
            score: ext.score,
            future: ext.future,
            breakdown: ext.breakdown,
            states: ext.states,
            arcs: Vec::new(),
        });
        self.referenced[prev.index()] = true;
        id
    }

    fn insert(&mut self, mut hyp: Hypothesis) -> HypId {
        let id = HypId(self.hyps.len() as u32);
        hyp.id = id;
        self.hyps.push(hyp);
        self.referenced.push(false);
        id
    }

    /// True once some promoted hypothesis has `id` as its predecessor.
    pub(crate) fn is_referenced(&self, id: HypId) -> bool {
        self.referenced[id.index()]
    }

    /// Record that `loser` recombined into `winner`; the loser's own arcs move
    /// along with it.
    pub(crate) fn add_arc(&mut self, winner: HypId, loser: HypId) {
        let mut moved = std::mem::take(&mut self.hyps[loser.index()].arcs);
        let arcs = &mut self.hyps[winner.index()].arcs;
        arcs.push(loser);
        arcs.append(&mut moved);
    }

    /// Chain from the first applied step to `id`, excluding the root.
    pub(crate) fn backtrace(&self, id: HypId) -> Vec<HypId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let hyp = self.get(current);
            if hyp.is_root() {
                break;
            }
            chain.push(current);
            cursor = hyp.prev;
        }
        chain.reverse();
        chain
    }
}
