//! Extra candidates proposed during the search.
//!
//! After a stack is pruned, the registry's candidate source (if any) sees the
//! surviving hypotheses once and may propose `(prev_index, span, phrase,
//! score)` tuples. Each usable proposal becomes a synthesized option keyed by
//! the proposing hypothesis's coverage and the span, so it is merged only into
//! the cube that extends that coverage over that span:
//!
//! ```text
//! proposal ──▶ prev complete? / no span?        ──▶ ignored
//!          ──▶ span overlaps prev coverage?     ──▶ discarded
//!          ──▶ wrap as option (source's score slot) ──▶ by (coverage, span)
//! ```
//!
//! Duplicate phrases for the same key keep the best score.

use super::bitmap::{BitmapId, BitmapRegistry};
use super::collection::{OptionCollection, OptionId};
use super::hypothesis::{HypId, HypothesisArena};
use crate::features::{CandidateSource, FeatureRegistry, FrontierHypothesis};
use crate::{DecodeError, Range, Sentence, TranslationOption};
use rustc_hash::FxHashMap;

/// Synthesized options for the cubes built from one stack.
#[derive(Debug, Default)]
pub(crate) struct ExtraOptions {
    by_key: FxHashMap<(BitmapId, Range), Vec<OptionId>>,
    pub(crate) merged: usize,
    pub(crate) ignored: usize,
    pub(crate) discarded: usize,
}

impl ExtraOptions {
    pub(crate) fn get(&self, coverage: BitmapId, range: Range) -> &[OptionId] {
        self.by_key.get(&(coverage, range)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Inputs of one call to the candidate source.
pub(crate) struct ExtraRequest<'a> {
    pub(crate) sentence: &'a Sentence,
    pub(crate) registry: &'a FeatureRegistry,
    pub(crate) bitmaps: &'a BitmapRegistry,
    pub(crate) arena: &'a HypothesisArena,
    /// Surviving hypotheses of the stack, best first.
    pub(crate) frontier: &'a [HypId],
    pub(crate) max_phrase_length: usize,
}

impl ExtraRequest<'_> {
    /// Ask `source` for proposals and wrap the usable ones into `options`.
    pub(crate) fn collect(
        &self,
        source: &dyn CandidateSource,
        slot: usize,
        options: &mut OptionCollection,
    ) -> Result<ExtraOptions, DecodeError> {
        let mut extras = ExtraOptions::default();
        if self.frontier.is_empty() {
            return Ok(extras);
        }

        let view: Vec<FrontierHypothesis<'_>> = self
            .frontier
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                let hyp = self.arena.get(id);
                let output = self
                    .arena
                    .backtrace(id)
                    .into_iter()
                    .flat_map(|step| self.arena.get(step).target().words().iter().map(String::as_str))
                    .collect();
                FrontierHypothesis { index, coverage: self.bitmaps.get(hyp.coverage()), output, score: hyp.score() }
            })
            .collect();

        let proposals = source.propose(self.sentence, &view).map_err(|err| DecodeError::Candidates(err.message))?;

        let mut order: Vec<(BitmapId, Range)> = Vec::new();
        let mut grouped: FxHashMap<(BitmapId, Range), Vec<TranslationOption>> = FxHashMap::default();
        for cand in &proposals {
            let Some(&prev) = self.frontier.get(cand.prev_index) else {
                return Err(DecodeError::Candidates(format!(
                    "proposal '{}' refers to hypothesis {} of a frontier of {}",
                    cand.phrase,
                    cand.prev_index,
                    self.frontier.len()
                )));
            };
            let coverage = self.arena.get(prev).coverage();
            let bitmap = self.bitmaps.get(coverage);
            let Some(span) = cand.span else {
                extras.ignored += 1;
                continue;
            };
            if bitmap.is_complete() {
                extras.ignored += 1;
                continue;
            }
            if span.start > span.end
                || span.end >= self.sentence.len()
                || span.len() > self.max_phrase_length
                || bitmap.overlaps(span)
            {
                search_debug!("[extra:discard] prev={} span={} phrase=\"{}\"", cand.prev_index, span, cand.phrase);
                extras.discarded += 1;
                continue;
            }

            let option = self.registry.external_option(self.sentence, span, cand, slot);
            let key = (coverage, span);
            let group = grouped.entry(key).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            match group.iter_mut().find(|o| o.target == option.target) {
                Some(existing) if existing.score >= option.score => {}
                Some(existing) => *existing = option,
                None => group.push(option),
            }
        }

        for key in order {
            let Some(group) = grouped.remove(&key) else { continue };
            let ids: Vec<OptionId> = group.into_iter().map(|opt| options.push_external(opt)).collect();
            extras.merged += ids.len();
            search_debug!("[extra:merge] coverage={} span={} options={}", self.bitmaps.get(key.0), key.1, ids.len());
            extras.by_key.insert(key, ids);
        }
        Ok(extras)
    }
}
