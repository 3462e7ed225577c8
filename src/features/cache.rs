//! Decaying cache pseudo language model.
//!
//! The cache holds target phrases seen recently (typically the translations of
//! previous sentences) together with their age. A phrase scores by how recently
//! it was inserted; every insertion batch first ages the existing entries and
//! forgets those older than `max_age`.
//!
//! The cache is shared by all decoders and may be updated between sentences:
//! readers take a shared lock, updates take the exclusive lock. Scores are read
//! once per option when a sentence's options are collected, so an update never
//! changes scores in the middle of a decode.

use super::Feature;
use crate::TargetPhrase;
use rustc_hash::FxHashMap;
use std::f64::consts::PI;
use std::sync::{PoisonError, RwLock};

/// How a target phrase is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheQuery {
    /// Only the whole phrase.
    WholeString,
    /// Every contiguous sub-phrase; scores are summed.
    AllSubstrings,
}

/// Decay curve applied to an entry's age (ages start at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScoring {
    /// `1/age - 1`
    Hyperbola,
    /// `age^-0.25 - 1`
    Power,
    /// `e^(1/age) / e - 1`
    Exponential,
    /// `cos((age - 1) * pi/2 / max_age) - 1`
    Cosine,
    /// `1/age`
    HyperbolaReward,
    /// `age^-0.25`
    PowerReward,
    /// `e^(1/age) / e`
    ExponentialReward,
}

impl CacheScoring {
    fn is_reward(self) -> bool {
        matches!(self, CacheScoring::HyperbolaReward | CacheScoring::PowerReward | CacheScoring::ExponentialReward)
    }

    fn score(self, age: usize, max_age: usize) -> f64 {
        let a = age as f64;
        match self {
            CacheScoring::Hyperbola => 1.0 / a - 1.0,
            CacheScoring::Power => a.powf(-0.25) - 1.0,
            CacheScoring::Exponential => (1.0 / a).exp() / 1f64.exp() - 1.0,
            CacheScoring::Cosine => ((a - 1.0) * (PI / 2.0) / max_age as f64).cos() - 1.0,
            CacheScoring::HyperbolaReward => 1.0 / a,
            CacheScoring::PowerReward => a.powf(-0.25),
            CacheScoring::ExponentialReward => (1.0 / a).exp() / 1f64.exp(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    ages: FxHashMap<String, usize>,
}

/// Decaying cache-based pseudo language model.
#[derive(Debug)]
pub struct CacheModel {
    query: CacheQuery,
    scoring: CacheScoring,
    max_age: usize,
    /// Score by age, index 0 unused; `by_age[max_age + 1]` is the miss score.
    by_age: Vec<f64>,
    state: RwLock<CacheState>,
}

impl CacheModel {
    pub fn new(query: CacheQuery, scoring: CacheScoring, max_age: usize) -> Self {
        let max_age = max_age.max(1);
        let mut by_age: Vec<f64> = (0..=max_age).map(|age| scoring.score(age.max(1), max_age)).collect();
        // Penalty curves give a miss the score of the oldest entry; reward
        // curves give nothing.
        by_age.push(if scoring.is_reward() { 0.0 } else { scoring.score(max_age, max_age) });
        CacheModel { query, scoring, max_age, by_age, state: RwLock::new(CacheState::default()) }
    }

    pub fn scoring(&self) -> CacheScoring {
        self.scoring
    }

    pub fn max_age(&self) -> usize {
        self.max_age
    }

    /// Number of cached phrases.
    pub fn len(&self) -> usize {
        self.read(|s| s.ages.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of a cached phrase.
    pub fn age(&self, phrase: &str) -> Option<usize> {
        let key = normalize(phrase);
        self.read(|s| s.ages.get(&key).copied())
    }

    /// Age every entry by one, then add `phrases` with age 1.
    pub fn insert<S: AsRef<str>>(&self, phrases: &[S]) {
        self.write(|s| {
            age_entries(s, self.max_age);
            for phrase in phrases {
                let key = normalize(phrase.as_ref());
                if !key.is_empty() {
                    s.ages.insert(key, 1);
                }
            }
        });
    }

    /// Age every entry by one, forgetting those older than `max_age`.
    pub fn decay(&self) {
        self.write(|s| age_entries(s, self.max_age));
    }

    pub fn clear(&self) {
        self.write(|s| s.ages.clear());
    }

    /// Apply a textual command: `clear`, `decay`, or `insert p1||p2||...`.
    pub fn execute(&self, command: &str) -> Result<(), crate::ScoreError> {
        let command = command.trim();
        match command.split_once(char::is_whitespace) {
            None if command == "clear" => self.clear(),
            None if command == "decay" => self.decay(),
            Some(("insert", rest)) => {
                let phrases: Vec<&str> = rest.split("||").map(str::trim).filter(|p| !p.is_empty()).collect();
                self.insert(&phrases);
            }
            _ => return Err(crate::ScoreError::new(format!("unknown cache command '{command}'"))),
        }
        Ok(())
    }

    /// Score of a target phrase under the configured query type.
    pub fn phrase_score(&self, target: &TargetPhrase) -> f64 {
        self.read(|s| match self.query {
            CacheQuery::WholeString => self.lookup(s, &target.text()),
            CacheQuery::AllSubstrings => {
                let words = target.words();
                let mut total = 0.0;
                for start in 0..words.len() {
                    for end in start..words.len() {
                        total += self.lookup(s, &words[start..=end].join(" "));
                    }
                }
                total
            }
        })
    }

    fn lookup(&self, state: &CacheState, key: &str) -> f64 {
        match state.ages.get(key) {
            Some(&age) if age <= self.max_age => self.by_age[age],
            _ => self.by_age[self.max_age + 1],
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut CacheState)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

fn normalize(phrase: &str) -> String {
    phrase.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn age_entries(state: &mut CacheState, max_age: usize) {
    state.ages.retain(|_, age| {
        *age += 1;
        *age <= max_age
    });
}

impl Feature for CacheModel {
    fn name(&self) -> &str {
        "cache"
    }

    fn evaluate_in_isolation(&self, _source: &[String], target: &TargetPhrase, scores: &mut [f64]) {
        scores[0] = self.phrase_score(target);
    }
}
