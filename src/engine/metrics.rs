//! Search run metrics.
//!
//! Counters are collected on every run; they are plain integers bumped in the
//! hot loop and cost nothing measurable. `Decoder::decode_verbose` turns them
//! into the compact `SearchDetails` shown by the CLI report.
//!
//! ## Design notes
//!
//! - `StackMetrics::pops` counts only the pop-limited main loop; forced
//!   diversity expansions are counted separately in `diversity_pops`, so
//!   `pops <= pop_limit` always holds.
//! - A stack that was never processed (time budget) has no entry.

use std::time::Duration;

// --- Metrics -----------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub(crate) struct SearchMetrics {
    /// Wall-clock time of the whole search, including option collection.
    pub(crate) total: Duration,
    /// Time spent collecting and scoring translation options.
    pub(crate) collect: Duration,
    /// One entry per processed stack, in cardinality order.
    pub(crate) stacks: Vec<StackMetrics>,
    /// The time budget ran out before the last stack.
    pub(crate) timed_out: bool,
    /// Hypotheses created (root included).
    pub(crate) hypotheses: usize,
    /// Distinct coverage states interned.
    pub(crate) coverage_states: usize,
    /// Translation options collected for the sentence (static and synthesized).
    pub(crate) options: usize,
    /// Extra candidates wrapped as options.
    pub(crate) extra_merged: usize,
    /// Extra candidates discarded (overlap, out of range, too long).
    pub(crate) extra_discarded: usize,
}

/// Counters for one stack-advancement step.
#[derive(Debug, Default, Clone)]
pub(crate) struct StackMetrics {
    pub(crate) cardinality: usize,
    /// Expansion containers targeting this stack.
    pub(crate) containers: usize,
    /// Promotions from the pop-limited loop.
    pub(crate) pops: usize,
    /// Promotions forced by the diversity pass.
    pub(crate) diversity_pops: usize,
    /// Promotions that entered the stack as a new live hypothesis.
    pub(crate) inserted: usize,
    /// Promotions merged into an equivalent hypothesis.
    pub(crate) recombined: usize,
    /// Promotions rejected by the beam.
    pub(crate) beam_rejected: usize,
    /// Hypotheses removed by pruning.
    pub(crate) pruned: usize,
    /// Live hypotheses after pruning.
    pub(crate) size: usize,
    pub(crate) duration: Duration,
}
