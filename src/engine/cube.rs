//! Expansion containers ("cubes").
//!
//! An `ExpansionContainer` gathers every way of reaching one target coverage.
//! Each way is a `Cube`: the hypotheses sharing one source coverage, best
//! first, crossed with the options for one span, best first:
//!
//! ```text
//!              options (best first) ─▶
//!            o0      o1      o2
//!   hyps h0 [0,0] ─▶ [0,1] ─▶ [0,2]
//!    │      │        │
//!    ▼   h1 [1,0] ─▶ [1,1]           frontier: scored, unrevealed edges
//!        h2 [2,0]                     visited:  every (h, o) ever pushed
//! ```
//!
//! Only the best edge is scored up front. Popping an edge pushes its two
//! neighbours `(h+1, o)` and `(h, o+1)` unless they were pushed before, so the
//! cross-product is revealed best first without being materialized.
//!
//! Edges are fully scored (stateful features included) when they enter the
//! frontier, so the container's order and the global container queue both use
//! the edges' real totals.

use super::bitmap::{BitmapId, BitmapRegistry};
use super::collection::{OptionCollection, OptionId};
use super::hypothesis::{Extension, HypId, HypothesisArena};
use super::stack::{AddOutcome, HypothesisStack};
use crate::features::{Application, FeatureRegistry};
use crate::{DecodeError, Range, ScoreBreakdown, Sentence, TargetPhrase};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Read-only inputs needed to score an edge.
#[derive(Clone, Copy)]
pub(crate) struct EdgeScorer<'a> {
    pub(crate) sentence: &'a Sentence,
    pub(crate) registry: &'a FeatureRegistry,
    pub(crate) options: &'a OptionCollection,
    pub(crate) bitmaps: &'a BitmapRegistry,
}

/// Coverage reached by every edge of a container.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Target {
    pub(crate) coverage: BitmapId,
    pub(crate) num_covered: usize,
    /// Future-cost estimate for `coverage`.
    pub(crate) future: f64,
}

/// Source hypotheses × options for one span.
#[derive(Debug)]
pub(crate) struct Cube {
    range: Range,
    hyps: Rc<[HypId]>,
    options: Rc<[OptionId]>,
    visited: FxHashSet<(u32, u32)>,
}

impl Cube {
    pub(crate) fn new(range: Range, hyps: Rc<[HypId]>, options: Rc<[OptionId]>) -> Self {
        Cube { range, hyps, options, visited: FxHashSet::default() }
    }

    fn extension(
        &self,
        hyp_rank: usize,
        opt_rank: usize,
        target: Target,
        scorer: &EdgeScorer<'_>,
        arena: &HypothesisArena,
    ) -> Result<Extension, DecodeError> {
        let prev = arena.get(self.hyps[hyp_rank]);
        let option_id = self.options[opt_rank];
        let option = scorer.options.get(option_id);
        let app = Application {
            sentence: scorer.sentence,
            prev_range: prev.range(),
            range: self.range,
            target: &option.target,
            coverage: scorer.bitmaps.get(target.coverage),
        };

        let mut delta = ScoreBreakdown::zeros(scorer.registry.len());
        let states = scorer.registry.evaluate_when_applied(&app, prev.states(), &mut delta)?;
        let score = prev.score() + option.score + delta.weighted(scorer.registry.weights());
        let mut breakdown = prev.breakdown().clone();
        breakdown.plus_equals(&option.breakdown);
        breakdown.plus_equals(&delta);

        Ok(Extension {
            prev: prev.id(),
            range: self.range,
            option: option_id,
            target: option.target.clone(),
            coverage: target.coverage,
            num_covered: target.num_covered,
            score,
            future: target.future,
            breakdown,
            states,
        })
    }
}

/// A scored frontier edge.
#[derive(Debug)]
struct ScoredEdge {
    cube: u32,
    hyp_rank: u32,
    opt_rank: u32,
    ext: Extension,
}

impl ScoredEdge {
    fn ranks(&self) -> (u32, u32, u32) {
        (self.cube, self.hyp_rank, self.opt_rank)
    }
}

impl Ord for ScoredEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher total, then greater target, then smaller ranks.
        self.ext
            .total()
            .total_cmp(&other.ext.total())
            .then_with(|| self.ext.target.cmp(&other.ext.target))
            .then_with(|| other.ranks().cmp(&self.ranks()))
    }
}

impl PartialOrd for ScoredEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredEdge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEdge {}

/// All cubes leading to one target coverage.
#[derive(Debug)]
pub(crate) struct ExpansionContainer {
    target: Target,
    cubes: Vec<Cube>,
    frontier: BinaryHeap<ScoredEdge>,
    promoted: usize,
}

impl ExpansionContainer {
    pub(crate) fn new(target: Target) -> Self {
        ExpansionContainer { target, cubes: Vec::new(), frontier: BinaryHeap::new(), promoted: 0 }
    }

    pub(crate) fn coverage(&self) -> BitmapId {
        self.target.coverage
    }

    pub(crate) fn add_cube(&mut self, cube: Cube) {
        self.cubes.push(cube);
    }

    pub(crate) fn num_cubes(&self) -> usize {
        self.cubes.len()
    }

    /// Edges promoted so far, by either the main loop or the diversity pass.
    pub(crate) fn promoted(&self) -> usize {
        self.promoted
    }

    /// Seed the frontier with the corner edge `(0, 0)` of every cube.
    pub(crate) fn initialize_edges(&mut self, scorer: &EdgeScorer<'_>, arena: &HypothesisArena) -> Result<(), DecodeError> {
        for cube in 0..self.cubes.len() {
            self.push_edge(cube, 0, 0, scorer, arena)?;
        }
        Ok(())
    }

    fn push_edge(
        &mut self,
        cube: usize,
        hyp_rank: usize,
        opt_rank: usize,
        scorer: &EdgeScorer<'_>,
        arena: &HypothesisArena,
    ) -> Result<(), DecodeError> {
        let c = &mut self.cubes[cube];
        if hyp_rank >= c.hyps.len() || opt_rank >= c.options.len() {
            return Ok(());
        }
        if !c.visited.insert((hyp_rank as u32, opt_rank as u32)) {
            return Ok(());
        }
        let ext = self.cubes[cube].extension(hyp_rank, opt_rank, self.target, scorer, arena)?;
        self.frontier.push(ScoredEdge { cube: cube as u32, hyp_rank: hyp_rank as u32, opt_rank: opt_rank as u32, ext });
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frontier.is_empty()
    }

    /// The best unrevealed edge.
    pub(crate) fn peek_best(&self) -> Option<&Extension> {
        self.frontier.peek().map(|edge| &edge.ext)
    }

    /// Promote the best edge into `stack` and push its two successors.
    /// `None` when the container is exhausted.
    pub(crate) fn pop_best_and_expand(
        &mut self,
        scorer: &EdgeScorer<'_>,
        arena: &mut HypothesisArena,
        stack: &mut HypothesisStack,
    ) -> Result<Option<AddOutcome>, DecodeError> {
        let Some(edge) = self.frontier.pop() else {
            return Ok(None);
        };
        let (cube, h, o) = (edge.cube as usize, edge.hyp_rank as usize, edge.opt_rank as usize);
        self.push_edge(cube, h + 1, o, scorer, arena)?;
        self.push_edge(cube, h, o + 1, scorer, arena)?;
        self.promoted += 1;
        Ok(Some(stack.add(arena, edge.ext)))
    }

    /// Force promotions until `k` edges have left this container, it runs dry,
    /// or `budget` is spent. Returns the number of forced promotions.
    pub(crate) fn ensure_minimum(
        &mut self,
        k: usize,
        budget: &mut usize,
        scorer: &EdgeScorer<'_>,
        arena: &mut HypothesisArena,
        stack: &mut HypothesisStack,
    ) -> Result<usize, DecodeError> {
        let mut forced = 0;
        while self.promoted < k && *budget > 0 {
            if self.pop_best_and_expand(scorer, arena, stack)?.is_none() {
                break;
            }
            forced += 1;
            *budget -= 1;
        }
        Ok(forced)
    }
}

/// Entry of the global container queue for one stack.
///
/// Ordered by the total of the container's best edge, then by that edge's
/// target phrase; an empty container sorts last. Containers still tied are
/// ordered by registration, earlier first.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    best: Option<(OrderedTotal, TargetPhrase)>,
    pub(crate) container: usize,
}

#[derive(Debug, Clone, Copy)]
struct OrderedTotal(f64);

impl PartialEq for OrderedTotal {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedTotal {}

impl Ord for OrderedTotal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrderedTotal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl QueueEntry {
    pub(crate) fn new(container: usize, from: &ExpansionContainer) -> Self {
        QueueEntry {
            best: from.peek_best().map(|ext| (OrderedTotal(ext.total()), ext.target.clone())),
            container,
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.best.is_none()
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `None < Some` puts exhausted containers last in the max-heap.
        self.best.cmp(&other.best).then_with(|| other.container.cmp(&self.container))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OptionSupply, PhraseCandidate, ScoreError};

    struct Table;

    impl OptionSupply for Table {
        fn candidates(&self, _: &Sentence, range: Range) -> Result<Vec<PhraseCandidate>, ScoreError> {
            let cand = |t: &str, s: f64| PhraseCandidate { target: TargetPhrase::parse(t), scores: vec![s] };
            Ok(match (range.start, range.end) {
                (0, 0) => vec![cand("a1", -1.0), cand("a2", -2.0), cand("a3", -4.0)],
                (1, 1) => vec![cand("b1", -1.0), cand("b2", -1.5), cand("b3", -3.0)],
                _ => Vec::new(),
            })
        }
    }

    struct Setup {
        sentence: Sentence,
        registry: FeatureRegistry,
        options: OptionCollection,
        bitmaps: BitmapRegistry,
        arena: HypothesisArena,
        hyps: Rc<[HypId]>,
        target: Target,
    }

    impl Setup {
        /// Stack 1 holds the three options of word 0; containers extend them
        /// with word 1.
        fn new() -> Self {
            let sentence = Sentence::parse("x y");
            let registry = FeatureRegistry::new(vec![1.0]);
            let options = OptionCollection::build(&sentence, &Table, &registry, 1, 0).unwrap();
            let mut bitmaps = BitmapRegistry::new(2);
            let mut arena = HypothesisArena::new();
            let root = arena.push_root(bitmaps.initial(), 0.0, 1, Vec::new());
            let source = bitmaps.extend(bitmaps.initial(), Range::single(0));
            let hyps: Vec<HypId> = options
                .for_range(Range::single(0))
                .iter()
                .map(|&id| {
                    let opt = options.get(id);
                    arena.promote(Extension {
                        prev: root,
                        range: opt.range,
                        option: id,
                        target: opt.target.clone(),
                        coverage: source,
                        num_covered: 1,
                        score: opt.score,
                        future: 0.0,
                        breakdown: opt.breakdown.clone(),
                        states: Vec::new(),
                    })
                })
                .collect();
            let coverage = bitmaps.extend(source, Range::single(1));
            let target = Target { coverage, num_covered: 2, future: 0.0 };
            Setup { sentence, registry, options, bitmaps, arena, hyps: hyps.into(), target }
        }

        fn container(&self, hyps: usize, opts: usize) -> ExpansionContainer {
            let mut container = ExpansionContainer::new(self.target);
            let options = self.options.for_range(Range::single(1));
            container.add_cube(Cube::new(Range::single(1), Rc::from(&self.hyps[..hyps]), Rc::from(&options[..opts])));
            container.initialize_edges(&self.scorer(), &self.arena).unwrap();
            container
        }

        fn scorer(&self) -> EdgeScorer<'_> {
            EdgeScorer { sentence: &self.sentence, registry: &self.registry, options: &self.options, bitmaps: &self.bitmaps }
        }
    }

    fn pop(setup: &mut Setup, container: &mut ExpansionContainer, stack: &mut HypothesisStack) -> Option<AddOutcome> {
        let scorer =
            EdgeScorer { sentence: &setup.sentence, registry: &setup.registry, options: &setup.options, bitmaps: &setup.bitmaps };
        container.pop_best_and_expand(&scorer, &mut setup.arena, stack).unwrap()
    }

    fn force(setup: &mut Setup, container: &mut ExpansionContainer, k: usize, budget: &mut usize) -> usize {
        let mut stack = HypothesisStack::new(2, 0.0);
        let scorer =
            EdgeScorer { sentence: &setup.sentence, registry: &setup.registry, options: &setup.options, bitmaps: &setup.bitmaps };
        container.ensure_minimum(k, budget, &scorer, &mut setup.arena, &mut stack).unwrap()
    }

    #[test]
    fn pops_come_out_best_first_and_each_edge_once() {
        let mut setup = Setup::new();
        let mut container = setup.container(3, 3);
        assert_eq!(container.peek_best().map(|e| e.score), Some(-2.0));

        let mut stack = HypothesisStack::new(2, 0.0);
        let mut totals = Vec::new();
        while let Some(total) = container.peek_best().map(|e| e.total()) {
            totals.push(total);
            pop(&mut setup, &mut container, &mut stack);
        }
        assert_eq!(totals.len(), 9);
        assert!(totals.windows(2).all(|w| w[0] >= w[1]), "{totals:?}");
        assert_eq!(container.promoted(), 9);
        // no stateful features: every pair has the same key, so all but the
        // first recombine into it
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.metrics.recombined, 8);
        assert!(pop(&mut setup, &mut container, &mut stack).is_none());
    }

    #[test]
    fn frontier_grows_by_at_most_one_per_pop() {
        let mut setup = Setup::new();
        let mut container = setup.container(3, 3);
        let mut stack = HypothesisStack::new(2, 0.0);
        pop(&mut setup, &mut container, &mut stack);
        // (0,0) popped; (1,0) and (0,1) pushed
        assert_eq!(container.frontier.len(), 2);
        // (0,1) at -2.5 beats (1,0) at -3; pushes (1,1) and (0,2)
        pop(&mut setup, &mut container, &mut stack);
        assert_eq!(container.frontier.len(), 3);
    }

    #[test]
    fn ensure_minimum_stops_when_exhausted() {
        let mut setup = Setup::new();
        let mut container = setup.container(1, 2);
        let mut budget = usize::MAX;
        let forced = force(&mut setup, &mut container, 3, &mut budget);
        assert_eq!(forced, 2);
        assert_eq!(container.promoted(), 2);
        assert!(container.is_empty());
    }

    #[test]
    fn ensure_minimum_respects_budget() {
        let mut setup = Setup::new();
        let mut container = setup.container(3, 3);
        let mut budget = 2;
        assert_eq!(force(&mut setup, &mut container, 5, &mut budget), 2);
        assert_eq!(budget, 0);
        assert_eq!(container.promoted(), 2);
    }

    #[test]
    fn queue_orders_by_best_edge_then_registration() {
        let mut setup = Setup::new();
        let mut a = setup.container(3, 3);
        let b = setup.container(3, 3);
        let mut empty = setup.container(1, 1);
        let mut stack = HypothesisStack::new(2, 0.0);
        pop(&mut setup, &mut empty, &mut stack);
        assert!(empty.is_empty());

        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry::new(2, &empty));
        heap.push(QueueEntry::new(1, &b));
        heap.push(QueueEntry::new(0, &a));
        assert_eq!(heap.pop().map(|e| e.container), Some(0));
        assert_eq!(heap.pop().map(|e| e.container), Some(1));
        assert!(heap.pop().is_some_and(|e| e.is_exhausted()));

        pop(&mut setup, &mut a, &mut stack);
        assert!(QueueEntry::new(0, &a) < QueueEntry::new(1, &b));
    }

    #[test]
    fn equal_totals_prefer_the_greater_target() {
        let x = QueueEntry { best: Some((OrderedTotal(-1.0), TargetPhrase::parse("alpha"))), container: 0 };
        let y = QueueEntry { best: Some((OrderedTotal(-1.0), TargetPhrase::parse("beta"))), container: 1 };
        assert!(y > x);
    }
}
