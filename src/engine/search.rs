//! Stack-by-stack cube-pruning search.
//!
//! ```text
//! stack 0 = {root}
//! advance_from(0): extras, then one cube per (source coverage, span) into the
//!                  container of the target coverage, filed by its cardinality
//! for k in 1..=N:
//!     time budget spent?                        -> stop, keep what we have
//!     process_stack(k):
//!         initialize every container for k, queue them by best edge
//!         pop_limit times: pop best container, promote one edge, requeue
//!         diversity pass: ensure_minimum on every container
//!         prune stack k
//!     advance_from(k)
//! ```
//!
//! Promotions only ever go into the stack being processed, and containers for
//! stack `k` are complete once every stack below `k` has been advanced, so a
//! stack is never touched again after it is pruned.

use super::bitmap::{Bitmap, BitmapId, BitmapRegistry};
use super::collection::{OptionCollection, OptionId};
use super::cube::{Cube, EdgeScorer, ExpansionContainer, QueueEntry, Target};
use super::extra::{ExtraOptions, ExtraRequest};
use super::future::FutureCosts;
use super::hypothesis::{HypId, Hypothesis, HypothesisArena};
use super::metrics::{SearchMetrics, StackMetrics};
use super::reordering::{ReorderingConstraint, check_distortion};
use super::stack::HypothesisStack;
use crate::features::FeatureRegistry;
use crate::{DecodeError, OptionSupply, Options, Range, ScoreBreakdown, Sentence, TranslationOption};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Instant;

/// Search state for one sentence. Dropped as a unit when the search ends.
pub(crate) struct CubeSearch<'a> {
    sentence: &'a Sentence,
    registry: &'a FeatureRegistry,
    options: &'a Options,
    collection: OptionCollection,
    table: FxHashMap<Range, Rc<[OptionId]>>,
    bitmaps: BitmapRegistry,
    arena: HypothesisArena,
    future: FutureCosts,
    constraint: ReorderingConstraint,
    stacks: Vec<HypothesisStack>,
    /// Containers by target cardinality, in registration order.
    levels: Vec<Vec<ExpansionContainer>>,
    level_index: Vec<FxHashMap<BitmapId, usize>>,
    metrics: SearchMetrics,
    started: Instant,
}

impl<'a> CubeSearch<'a> {
    /// Collect and score options, build the future-cost matrix and seed stack 0.
    pub(crate) fn new(
        sentence: &'a Sentence,
        supply: &dyn OptionSupply,
        registry: &'a FeatureRegistry,
        options: &'a Options,
    ) -> Result<Self, DecodeError> {
        let started = Instant::now();
        let n = sentence.len();

        let collection =
            OptionCollection::build(sentence, supply, registry, options.max_phrase_length, options.table_limit)?;
        let table: FxHashMap<Range, Rc<[OptionId]>> =
            collection.ranges().map(|r| (r, Rc::from(collection.for_range(r)))).collect();
        let future = FutureCosts::new(n, |r| collection.best_score(r));
        let bitmaps = BitmapRegistry::new(n);

        let mut arena = HypothesisArena::new();
        let root_future = future.estimate(bitmaps.get(bitmaps.initial()));
        let root = arena.push_root(bitmaps.initial(), root_future, registry.len(), registry.empty_states(sentence));
        let mut stacks: Vec<HypothesisStack> =
            (0..=n).map(|c| HypothesisStack::new(c, options.beam_threshold)).collect();
        stacks[0].add_root(&arena, root);

        let metrics = SearchMetrics { collect: started.elapsed(), ..SearchMetrics::default() };
        let constraint = ReorderingConstraint::for_sentence(sentence, options.monotone_at_punctuation);
        search_debug!(
            "[search:start] words={} options={} spans={} stateful={} walls={} root_future={:.4}",
            n,
            collection.len(),
            collection.ranges().count(),
            registry.stateful_count(),
            constraint.is_active(),
            root_future
        );

        Ok(CubeSearch {
            sentence,
            registry,
            options,
            collection,
            table,
            bitmaps,
            arena,
            future,
            constraint,
            stacks,
            levels: (0..=n).map(|_| Vec::new()).collect(),
            level_index: (0..=n).map(|_| FxHashMap::default()).collect(),
            metrics,
            started,
        })
    }

    /// Run the search to the last stack or until the time budget is spent.
    pub(crate) fn run(mut self) -> Result<SearchOutcome, DecodeError> {
        let n = self.sentence.len();

        let mut root_metrics = self.stacks[0].metrics.clone();
        root_metrics.size = self.stacks[0].len();
        self.metrics.stacks.push(root_metrics);
        if n > 0 {
            self.advance_from(0)?;
        }

        for k in 1..=n {
            if let Some(limit) = self.options.time_limit {
                if self.started.elapsed() >= limit {
                    search_debug!("[search:timeout] before stack {} after {:?}", k, self.started.elapsed());
                    self.metrics.timed_out = true;
                    break;
                }
            }
            self.process_stack(k)?;
            if k < n {
                self.advance_from(k)?;
            }
        }

        self.finish()
    }

    /// Pop-limited promotion into stack `k`, diversity pass, pruning.
    fn process_stack(&mut self, k: usize) -> Result<(), DecodeError> {
        let started = Instant::now();
        let mut containers = std::mem::take(&mut self.levels[k]);
        self.level_index[k].clear();

        let scorer = EdgeScorer {
            sentence: self.sentence,
            registry: self.registry,
            options: &self.collection,
            bitmaps: &self.bitmaps,
        };
        let stack = &mut self.stacks[k];

        let mut queue = BinaryHeap::with_capacity(containers.len());
        for (idx, container) in containers.iter_mut().enumerate() {
            container.initialize_edges(&scorer, &self.arena)?;
            queue.push(QueueEntry::new(idx, container));
        }

        let mut pops = 0;
        while pops < self.options.pop_limit {
            // Exhausted containers sort last, so the first one means all are.
            let Some(entry) = queue.pop().filter(|e| !e.is_exhausted()) else { break };
            let container = &mut containers[entry.container];
            if container.pop_best_and_expand(&scorer, &mut self.arena, stack)?.is_none() {
                continue;
            }
            pops += 1;
            queue.push(QueueEntry::new(entry.container, container));
        }

        let mut forced = 0;
        if self.options.diversity > 0 {
            let mut budget = self.options.diversity_budget.unwrap_or(usize::MAX);
            for container in &mut containers {
                forced += container.ensure_minimum(self.options.diversity, &mut budget, &scorer, &mut self.arena, stack)?;
            }
        }

        for container in &containers {
            search_debug!(
                "[container] card={} coverage={} cubes={} promoted={}",
                k,
                self.bitmaps.get(container.coverage()),
                container.num_cubes(),
                container.promoted()
            );
        }
        stack.metrics.containers = containers.len();
        stack.metrics.pops = pops;
        stack.metrics.diversity_pops = forced;
        stack.prune_to_size(&self.arena, self.options.stack_size)?;
        stack.metrics.duration = started.elapsed();

        let m = &stack.metrics;
        search_debug!(
            "[stack] card={} containers={} pops={} diversity={} inserted={} recombined={} beam={} pruned={} size={}",
            stack.cardinality(),
            m.containers,
            m.pops,
            m.diversity_pops,
            m.inserted,
            m.recombined,
            m.beam_rejected,
            m.pruned,
            m.size
        );
        self.metrics.stacks.push(m.clone());
        Ok(())
    }

    /// Merge extra candidates for stack `c`, then register a cube for every
    /// legal extension of its surviving hypotheses.
    fn advance_from(&mut self, c: usize) -> Result<(), DecodeError> {
        if self.stacks[c].is_empty() {
            return Ok(());
        }
        let extras = self.collect_extra_candidates(c)?;
        self.create_forward_todos(c, &extras);
        Ok(())
    }

    fn collect_extra_candidates(&mut self, c: usize) -> Result<ExtraOptions, DecodeError> {
        let Some((source, slot)) = self.registry.candidate_source() else {
            return Ok(ExtraOptions::default());
        };
        let request = ExtraRequest {
            sentence: self.sentence,
            registry: self.registry,
            bitmaps: &self.bitmaps,
            arena: &self.arena,
            frontier: self.stacks[c].entries(),
            max_phrase_length: self.options.max_phrase_length,
        };
        let extras = request.collect(source, slot, &mut self.collection)?;
        self.metrics.extra_merged += extras.merged;
        self.metrics.extra_discarded += extras.discarded;
        search_debug!(
            "[extra] stack={} merged={} discarded={} ignored={}",
            c,
            extras.merged,
            extras.discarded,
            extras.ignored
        );
        Ok(extras)
    }

    fn create_forward_todos(&mut self, c: usize, extras: &ExtraOptions) {
        let n = self.sentence.len();
        let max_len = self.options.max_phrase_length;

        // Surviving hypotheses grouped by coverage; entries are best first, so
        // each group is too.
        let mut groups: Vec<(BitmapId, Vec<HypId>)> = Vec::new();
        let mut group_of: FxHashMap<BitmapId, usize> = FxHashMap::default();
        for &id in self.stacks[c].entries() {
            let coverage = self.arena.get(id).coverage();
            let slot = *group_of.entry(coverage).or_insert_with(|| {
                groups.push((coverage, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(id);
        }

        let mut registered = 0;
        for (coverage, hyps) in groups {
            let hyps: Rc<[HypId]> = hyps.into();
            let bitmap: Bitmap = self.bitmaps.get(coverage).clone();
            for start in 0..n {
                if bitmap.is_set(start) {
                    continue;
                }
                for end in start..start.saturating_add(max_len).min(n) {
                    if bitmap.is_set(end) {
                        break;
                    }
                    let range = Range::new(start, end);
                    if !check_distortion(&bitmap, range, self.options.max_distortion, &self.constraint) {
                        continue;
                    }
                    let Some(opts) = self.options_for(coverage, range, extras) else {
                        continue;
                    };
                    let target = self.bitmaps.extend(coverage, range);
                    self.container_for(target).add_cube(Cube::new(range, hyps.clone(), opts));
                    registered += 1;
                }
            }
        }
        search_debug!("[forward] stack={} cubes={}", c, registered);
    }

    /// Static options for `range` merged with the extras proposed for
    /// `coverage`; `None` when there are none at all.
    fn options_for(&self, coverage: BitmapId, range: Range, extras: &ExtraOptions) -> Option<Rc<[OptionId]>> {
        let extra = extras.get(coverage, range);
        let table = self.table.get(&range);
        match (table, extra.is_empty()) {
            (None, true) => None,
            (Some(list), true) => Some(list.clone()),
            (list, false) => {
                let table = list.map(|l| &l[..]).unwrap_or(&[]);
                Some(self.collection.merge(table, extra).into())
            }
        }
    }

    fn container_for(&mut self, coverage: BitmapId) -> &mut ExpansionContainer {
        let bitmap = self.bitmaps.get(coverage);
        let k = bitmap.num_covered();
        let level = &mut self.levels[k];
        let idx = *self.level_index[k].entry(coverage).or_insert_with(|| {
            let target = Target { coverage, num_covered: k, future: self.future.estimate(bitmap) };
            level.push(ExpansionContainer::new(target));
            level.len() - 1
        });
        &mut level[idx]
    }

    fn finish(mut self) -> Result<SearchOutcome, DecodeError> {
        let n = self.sentence.len();
        let timed_out = self.metrics.timed_out;

        let reached = (0..=n).rev().find(|&k| !self.stacks[k].is_empty()).unwrap_or(0);
        if reached < n && self.options.require_full_coverage && !timed_out {
            return Err(DecodeError::Incomplete { covered: reached, total: n });
        }
        let best = match self.stacks[reached].best(&self.arena) {
            Some(best) => best,
            None => return Err(DecodeError::Incomplete { covered: 0, total: n }),
        };

        self.metrics.total = self.started.elapsed();
        self.metrics.hypotheses = self.arena.len();
        self.metrics.coverage_states = self.bitmaps.len();
        self.metrics.options = self.collection.len();
        search_debug!(
            "[search:done] reached={}/{} best={} total={:.4} hypotheses={} elapsed={:?}",
            reached,
            n,
            best.index(),
            self.arena.get(best).total(),
            self.metrics.hypotheses,
            self.metrics.total
        );

        Ok(SearchOutcome {
            sentence: self.sentence.clone(),
            stacks: self.stacks.iter().map(|s| s.entries().to_vec()).collect(),
            arena: self.arena,
            bitmaps: self.bitmaps,
            collection: self.collection,
            best,
            reached,
            metrics: self.metrics,
        })
    }
}

/// A root-to-leaf path through the search graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    /// Applied steps in order, root excluded.
    pub steps: Vec<HypId>,
    /// Model score of the whole path.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl Derivation {
    /// Target words along the path, joined with spaces.
    pub fn text(&self, outcome: &SearchOutcome) -> String {
        let words: Vec<&str> = self
            .steps
            .iter()
            .flat_map(|&id| outcome.hypothesis(id).target().words().iter().map(String::as_str))
            .collect();
        words.join(" ")
    }
}

/// Everything a finished search retained: the hypothesis graph, the pruned
/// stacks and the run counters.
#[derive(Debug)]
pub struct SearchOutcome {
    sentence: Sentence,
    arena: HypothesisArena,
    bitmaps: BitmapRegistry,
    collection: OptionCollection,
    stacks: Vec<Vec<HypId>>,
    best: HypId,
    reached: usize,
    metrics: SearchMetrics,
}

impl SearchOutcome {
    pub fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    /// The result: best hypothesis on the highest non-empty stack.
    pub fn best(&self) -> &Hypothesis {
        self.arena.get(self.best)
    }

    pub fn hypothesis(&self, id: HypId) -> &Hypothesis {
        self.arena.get(id)
    }

    /// Retained (pruned) entries of stack `cardinality`, best first.
    pub fn stack(&self, cardinality: usize) -> &[HypId] {
        self.stacks.get(cardinality).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of stacks (sentence length + 1).
    pub fn num_stacks(&self) -> usize {
        self.stacks.len()
    }

    /// Cardinality of the stack the result was taken from.
    pub fn reached(&self) -> usize {
        self.reached
    }

    pub fn is_complete(&self) -> bool {
        self.reached == self.sentence.len()
    }

    pub fn timed_out(&self) -> bool {
        self.metrics.timed_out
    }

    pub fn coverage(&self, id: BitmapId) -> &Bitmap {
        self.bitmaps.get(id)
    }

    /// Option applied by `hyp`, `None` for the root.
    pub fn option(&self, hyp: &Hypothesis) -> Option<&TranslationOption> {
        hyp.option().map(|id| self.collection.get(id))
    }

    /// Steps from the root (excluded) to `id`, in application order.
    pub fn backtrace(&self, id: HypId) -> Vec<&Hypothesis> {
        self.arena.backtrace(id).into_iter().map(|step| self.arena.get(step)).collect()
    }

    /// Target words produced on the way to `id`, joined with spaces.
    pub fn output(&self, id: HypId) -> String {
        self.derivation(id).text(self)
    }

    /// The path from the root to `id`.
    pub fn derivation(&self, id: HypId) -> Derivation {
        let hyp = self.arena.get(id);
        Derivation { steps: self.arena.backtrace(id), score: hyp.score(), breakdown: hyp.breakdown().clone() }
    }

    /// Up to `n` distinct translations from the result stack, best first.
    ///
    /// Besides the live entries, every recombined alternative along a live
    /// entry's path yields a derivation: the alternative's own path followed
    /// by the rest of the live path. Equal states make the continuation score
    /// the same from either, so the score is adjusted by the difference at the
    /// detour.
    pub fn n_best(&self, n: usize) -> Vec<Derivation> {
        let mut candidates: Vec<(f64, Derivation)> = Vec::new();
        for &id in self.stack(self.reached) {
            let live = self.arena.get(id);
            let path = self.arena.backtrace(id);
            for (pos, &step) in path.iter().enumerate() {
                let replaced = self.arena.get(step);
                for &alt in replaced.arcs() {
                    let other = self.arena.get(alt);
                    let mut steps = self.arena.backtrace(alt);
                    steps.extend_from_slice(&path[pos + 1..]);
                    let mut breakdown = live.breakdown().clone();
                    breakdown.minus_equals(replaced.breakdown());
                    breakdown.plus_equals(other.breakdown());
                    let score = live.score() - replaced.score() + other.score();
                    candidates.push((score + live.future(), Derivation { steps, score, breakdown }));
                }
            }
            candidates.push((live.total(), self.derivation(id)));
        }

        let mut ranked: Vec<(f64, String, Derivation)> =
            candidates.into_iter().map(|(total, d)| (total, d.text(self), d)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)).then_with(|| a.2.steps.cmp(&b.2.steps)));

        let mut seen = FxHashSet::default();
        ranked.into_iter().filter(|(_, text, _)| seen.insert(text.clone())).map(|(_, _, d)| d).take(n).collect()
    }

    pub(crate) fn metrics(&self) -> &SearchMetrics {
        &self.metrics
    }

    pub(crate) fn stack_metrics(&self) -> &[StackMetrics] {
        &self.metrics.stacks
    }
}
