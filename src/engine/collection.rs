//! Per-sentence translation option collection.
//!
//! Options are queried from the supply once per span, scored in isolation,
//! sorted best first and truncated to the table limit before the search
//! starts. Options synthesized from extra candidates during the search are
//! appended to the same arena so every option of the sentence is addressed by
//! an `OptionId`.

use crate::features::FeatureRegistry;
use crate::{DecodeError, OptionSupply, Range, Sentence, TranslationOption};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Handle of an option in its sentence's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OptionId(pub(crate) u32);

/// Options for one sentence, grouped by span.
#[derive(Debug, Default)]
pub(crate) struct OptionCollection {
    options: Vec<TranslationOption>,
    by_range: FxHashMap<Range, Vec<OptionId>>,
}

impl OptionCollection {
    /// Query `supply` for every span up to `max_phrase_length` words and keep
    /// the best `table_limit` options per span (0 keeps all).
    pub(crate) fn build(
        sentence: &Sentence,
        supply: &dyn OptionSupply,
        registry: &FeatureRegistry,
        max_phrase_length: usize,
        table_limit: usize,
    ) -> Result<Self, DecodeError> {
        let mut collection = OptionCollection::default();
        for start in 0..sentence.len() {
            let last = start.saturating_add(max_phrase_length).min(sentence.len());
            for end in start..last {
                let range = Range::new(start, end);
                let candidates = supply
                    .candidates(sentence, range)
                    .map_err(|err| DecodeError::Supply(format!("span {range}: {err}")))?;
                if candidates.is_empty() {
                    continue;
                }
                let mut scored = candidates
                    .into_iter()
                    .map(|c| registry.score_option(sentence, range, c))
                    .collect::<Result<Vec<_>, _>>()?;
                scored.sort_by(by_score_desc);
                if table_limit > 0 {
                    scored.truncate(table_limit);
                }
                let ids = scored.into_iter().map(|opt| collection.push(opt)).collect();
                collection.by_range.insert(range, ids);
            }
        }
        Ok(collection)
    }

    fn push(&mut self, option: TranslationOption) -> OptionId {
        let id = OptionId(self.options.len() as u32);
        self.options.push(option);
        id
    }

    /// Add a synthesized option; it is not listed under its span.
    pub(crate) fn push_external(&mut self, option: TranslationOption) -> OptionId {
        self.push(option)
    }

    pub(crate) fn get(&self, id: OptionId) -> &TranslationOption {
        &self.options[id.0 as usize]
    }

    /// Static options for `range`, best first. Empty when the span has none.
    pub(crate) fn for_range(&self, range: Range) -> &[OptionId] {
        self.by_range.get(&range).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Best isolation score for `range`.
    pub(crate) fn best_score(&self, range: Range) -> Option<f64> {
        self.for_range(range).first().map(|&id| self.get(id).score)
    }

    /// Spans that have at least one option.
    pub(crate) fn ranges(&self) -> impl Iterator<Item = Range> + '_ {
        self.by_range.keys().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.options.len()
    }

    /// Static and synthesized options for one span, stably re-sorted together.
    pub(crate) fn merge(&self, table: &[OptionId], extra: &[OptionId]) -> Vec<OptionId> {
        let mut merged: Vec<OptionId> = table.iter().chain(extra).copied().collect();
        merged.sort_by(|a, b| by_score_desc(self.get(*a), self.get(*b)));
        merged
    }
}

/// Score descending, then target phrase descending. Stable sorts keep supply
/// order for full ties.
pub(crate) fn by_score_desc(a: &TranslationOption, b: &TranslationOption) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| b.target.cmp(&a.target))
}
