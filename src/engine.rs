//! Cube-pruning search engine.
//!
//! This module is the *entry point* of the search core. It is split into
//! focused submodules under `src/engine/`; the rest of the crate only sees
//! [`CubeSearch`], [`SearchOutcome`] and the coverage types.
//!
//! ## How the parts work together
//!
//! ```text
//! OptionSupply ── OptionCollection::build        (collection.rs)
//!                   - options per span, isolation-scored, best first
//!                         │
//!                         ├─ FutureCosts::new    (future.rs)
//!                         v
//!                 CubeSearch::run                (search.rs)
//!                   - stacks by cardinality     (stack.rs)
//!                   - cubes per target coverage (cube.rs)
//!                   - reordering checks         (reordering.rs)
//!                   - extra candidates          (extra.rs)
//!                   - recombination keys        (recombination.rs)
//!                         │
//!                         v
//!                   SearchOutcome  ── backtrace through the arena (hypothesis.rs)
//! ```
//!
//! All per-sentence state (coverage registry, options, hypotheses,
//! containers) is owned by one `CubeSearch` and released together; nothing is
//! shared between sentences except the read-only supply and features.
//!
//! ## Responsibilities by module
//!
//! - `bitmap.rs`: coverage bitmaps and the per-sentence interner.
//! - `collection.rs`: the sentence's translation options, addressed by id.
//! - `future.rs`: future-cost matrix and per-coverage estimates.
//! - `hypothesis.rs`: hypotheses, the arena, the best-first order.
//! - `recombination.rs`: equivalence keys for recombination.
//! - `stack.rs`: beam, recombination and histogram pruning per cardinality.
//! - `cube.rs`: lazy best-first enumeration of hypothesis × option edges and
//!   the container queue order.
//! - `reordering.rs`: distortion distance, the distortion limit, walls.
//! - `extra.rs`: wrapping and merging proposals from a candidate source.
//! - `search.rs`: the orchestrator and the result type.
//! - `metrics.rs`: run counters.
//!
//! ## Debugging
//!
//! Set `CUBE_DEBUG_SEARCH=1` to print per-stack, recombination and
//! extra-candidate traces to stderr.

use once_cell::sync::Lazy;

#[path = "engine/bitmap.rs"]
mod bitmap;
#[path = "engine/collection.rs"]
mod collection;
#[path = "engine/cube.rs"]
mod cube;
#[path = "engine/extra.rs"]
mod extra;
#[path = "engine/future.rs"]
mod future;
#[path = "engine/hypothesis.rs"]
mod hypothesis;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/recombination.rs"]
mod recombination;
#[path = "engine/reordering.rs"]
mod reordering;
#[path = "engine/search.rs"]
mod search;
#[path = "engine/stack.rs"]
mod stack;


pub use bitmap::{Bitmap, BitmapId};
pub use hypothesis::{HypId, Hypothesis};
pub(crate) use metrics::StackMetrics;
pub(crate) use reordering::distance_from_end;
pub use search::{Derivation, SearchOutcome};
pub(crate) use search::CubeSearch;

/// Set from `CUBE_DEBUG_SEARCH` once per process.
pub(crate) static DEBUG_SEARCH: Lazy<bool> = Lazy::new(|| std::env::var_os("CUBE_DEBUG_SEARCH").is_some());
