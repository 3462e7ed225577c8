//! Coverage-cardinality hypothesis stacks.
//!
//! Stack `c` holds the live hypotheses covering exactly `c` source words. It
//! applies three kinds of pruning:
//!
//! - **beam**: an edge whose total falls more than `ln(beam_threshold)` below
//!   the stack's best is rejected before it becomes a hypothesis;
//! - **recombination**: an equivalent hypothesis (see `RecombinationKey`)
//!   keeps only the better of the two live, the other becomes an arc;
//! - **histogram**: `prune_to_size` keeps the best `limit` entries.

use super::hypothesis::{Extension, HypId, HypothesisArena, best_first};
use super::metrics::StackMetrics;
use super::recombination::RecombinationKey;
use crate::DecodeError;
use rustc_hash::FxHashMap;

/// What happened to an edge offered to a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    Inserted(HypId),
    /// The new hypothesis displaced an equivalent, worse one.
    Replaced(HypId),
    /// An equivalent, better hypothesis was already live.
    Recombined(HypId),
    BeamRejected,
}

#[derive(Debug)]
pub(crate) struct HypothesisStack {
    cardinality: usize,
    entries: Vec<HypId>,
    index: FxHashMap<RecombinationKey, usize>,
    best: f64,
    /// Log-domain margin below the best total; `None` disables the beam.
    beam: Option<f64>,
    pub(crate) metrics: StackMetrics,
}

impl HypothesisStack {
    pub(crate) fn new(cardinality: usize, beam_threshold: f64) -> Self {
        HypothesisStack {
            cardinality,
            entries: Vec::new(),
            index: FxHashMap::default(),
            best: f64::NEG_INFINITY,
            beam: (beam_threshold > 0.0).then(|| beam_threshold.ln()),
            metrics: StackMetrics { cardinality, ..StackMetrics::default() },
        }
    }

    pub(crate) fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live hypotheses; best first after `prune_to_size`.
    pub(crate) fn entries(&self) -> &[HypId] {
        &self.entries
    }

    fn within_beam(&self, total: f64) -> bool {
        match self.beam {
            Some(margin) => total >= self.best + margin,
            None => true,
        }
    }

    /// Seed the stack with an existing hypothesis (the root).
    pub(crate) fn add_root(&mut self, arena: &HypothesisArena, id: HypId) {
        let hyp = arena.get(id);
        self.best = self.best.max(hyp.total());
        self.index.insert(RecombinationKey::of(hyp), self.entries.len());
        self.entries.push(id);
        self.metrics.inserted += 1;
    }

    /// Materialize `ext` and insert it, recombining with an equivalent entry.
    pub(crate) fn add(&mut self, arena: &mut HypothesisArena, ext: Extension) -> AddOutcome {
        debug_assert_eq!(ext.num_covered, self.cardinality);
        if !self.within_beam(ext.total()) {
            self.metrics.beam_rejected += 1;
            return AddOutcome::BeamRejected;
        }

        let id = arena.promote(ext);
        let hyp = arena.get(id);
        self.best = self.best.max(hyp.total());
        let key = RecombinationKey::of(hyp);

        let Some(&pos) = self.index.get(&key) else {
            self.index.insert(key, self.entries.len());
            self.entries.push(id);
            self.metrics.inserted += 1;
            return AddOutcome::Inserted(id);
        };

        let live = self.entries[pos];
        self.metrics.recombined += 1;
        if best_first(arena.get(id), arena.get(live)).is_lt() {
            search_debug!("[recombine] stack={} winner={} loser={}", self.cardinality, id.index(), live.index());
            arena.add_arc(id, live);
            self.entries[pos] = id;
            AddOutcome::Replaced(id)
        } else {
            search_debug!("[recombine] stack={} winner={} loser={}", self.cardinality, live.index(), id.index());
            arena.add_arc(live, id);
            AddOutcome::Recombined(live)
        }
    }

    /// Sort best first, drop entries outside the beam and keep at most `limit`.
    ///
    /// A dropped hypothesis that is already some hypothesis's predecessor is an
    /// internal invariant violation.
    pub(crate) fn prune_to_size(&mut self, arena: &HypothesisArena, limit: usize) -> Result<(), DecodeError> {
        self.entries.sort_by(|a, b| best_first(arena.get(*a), arena.get(*b)));
        let mut keep = self.entries.len().min(limit);
        while keep > 0 && !self.within_beam(arena.get(self.entries[keep - 1]).total()) {
            keep -= 1;
        }

        for &dropped in &self.entries[keep..] {
            if arena.is_referenced(dropped) {
                return Err(DecodeError::PruningInvariant { cardinality: self.cardinality, hypothesis: dropped.index() });
            }
        }

        self.metrics.pruned += self.entries.len() - keep;
        self.entries.truncate(keep);
        self.index.clear();
        for (pos, &id) in self.entries.iter().enumerate() {
            self.index.insert(RecombinationKey::of(arena.get(id)), pos);
        }
        self.metrics.size = self.entries.len();
        Ok(())
    }

    /// Top-scoring live hypothesis.
    pub(crate) fn best(&self, arena: &HypothesisArena) -> Option<HypId> {
        self.entries.iter().copied().min_by(|a, b| best_first(arena.get(*a), arena.get(*b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::bitmap::{BitmapId, BitmapRegistry};
    use crate::engine::collection::OptionId;
    use crate::features::FeatureState;
    use crate::{Range, ScoreBreakdown, TargetPhrase};

    struct Fixture {
        reg: BitmapRegistry,
        arena: HypothesisArena,
        root: HypId,
    }

    impl Fixture {
        fn new(len: usize) -> Self {
            let reg = BitmapRegistry::new(len);
            let mut arena = HypothesisArena::new();
            let root = arena.push_root(reg.initial(), 0.0, 1, Vec::new());
            Fixture { reg, arena, root }
        }

        fn ext(&mut self, range: Range, target: &str, score: f64, state: usize) -> Extension {
            let coverage: BitmapId = self.reg.extend(self.reg.initial(), range);
            Extension {
                prev: self.root,
                range,
                option: OptionId(0),
                target: TargetPhrase::parse(target),
                coverage,
                num_covered: range.len(),
                score,
                future: 0.0,
                breakdown: ScoreBreakdown::zeros(1),
                states: vec![FeatureState::Position(state)],
            }
        }
    }

    #[test]
    fn equivalent_hypotheses_recombine_keeping_the_better() {
        let mut fx = Fixture::new(3);
        let mut stack = HypothesisStack::new(1, 0.0);
        let a = fx.ext(Range::single(0), "a", -2.0, 0);
        let b = fx.ext(Range::single(0), "b", -1.0, 0);
        let c = fx.ext(Range::single(0), "c", -3.0, 0);
        let d = fx.ext(Range::single(0), "d", -3.0, 7);

        let AddOutcome::Inserted(a) = stack.add(&mut fx.arena, a) else { panic!("a not inserted") };
        let AddOutcome::Replaced(b) = stack.add(&mut fx.arena, b) else { panic!("b did not replace a") };
        assert_eq!(stack.add(&mut fx.arena, c), AddOutcome::Recombined(b));
        assert!(matches!(stack.add(&mut fx.arena, d), AddOutcome::Inserted(_)));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.best(&fx.arena), Some(b));
        assert_eq!(fx.arena.get(b).arcs().len(), 2);
        assert_eq!(fx.arena.get(b).arcs()[0], a);
        assert_eq!(stack.metrics.recombined, 2);
    }

    #[test]
    fn prune_keeps_best_entries_in_order() {
        let mut fx = Fixture::new(3);
        let mut stack = HypothesisStack::new(1, 0.0);
        for (pos, score) in [(0, -3.0), (1, -1.0), (2, -2.0)] {
            let ext = fx.ext(Range::single(pos), "x", score, 0);
            stack.add(&mut fx.arena, ext);
        }
        stack.prune_to_size(&fx.arena, 2).unwrap();
        let scores: Vec<f64> = stack.entries().iter().map(|&id| fx.arena.get(id).score()).collect();
        assert_eq!(scores, vec![-1.0, -2.0]);
        assert_eq!(stack.metrics.pruned, 1);
        assert_eq!(stack.metrics.size, 2);
    }

    #[test]
    fn beam_rejects_and_prunes_far_hypotheses() {
        let mut fx = Fixture::new(3);
        // margin ln(0.01) ~ -4.6
        let mut stack = HypothesisStack::new(1, 0.01);
        let first = fx.ext(Range::single(0), "a", -10.0, 0);
        let better = fx.ext(Range::single(1), "b", -1.0, 0);
        let far = fx.ext(Range::single(2), "c", -7.0, 0);
        stack.add(&mut fx.arena, first);
        stack.add(&mut fx.arena, better);
        assert_eq!(stack.add(&mut fx.arena, far), AddOutcome::BeamRejected);
        assert_eq!(stack.metrics.beam_rejected, 1);

        // "a" was admitted before the best improved; pruning re-applies the beam.
        stack.prune_to_size(&fx.arena, 10).unwrap();
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pruning_a_referenced_hypothesis_is_fatal() {
        let mut fx = Fixture::new(2);
        let mut stack = HypothesisStack::new(1, 0.0);
        let worse = fx.ext(Range::single(0), "a", -5.0, 0);
        let AddOutcome::Inserted(worse) = stack.add(&mut fx.arena, worse) else { panic!() };
        let best = fx.ext(Range::single(1), "b", -1.0, 0);
        stack.add(&mut fx.arena, best);

        let cov = fx.arena.get(worse).coverage();
        let next = fx.reg.extend(cov, Range::single(1));
        fx.arena.promote(Extension {
            prev: worse,
            range: Range::single(1),
            option: OptionId(0),
            target: TargetPhrase::parse("b"),
            coverage: next,
            num_covered: 2,
            score: -6.0,
            future: 0.0,
            breakdown: ScoreBreakdown::zeros(1),
            states: Vec::new(),
        });

        let err = stack.prune_to_size(&fx.arena, 1).unwrap_err();
        assert_eq!(err, DecodeError::PruningInvariant { cardinality: 1, hypothesis: worse.index() });
    }
}
