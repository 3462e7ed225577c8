//! Back-off n-gram language model over target words.
//!
//! The model is read-only after loading and shared by all sentence decoders.
//! Its state is the last `order - 1` target words, which is exactly what the
//! next word's probability can depend on, so hypotheses that agree on those
//! words (and on coverage) recombine.

use super::{Application, Capabilities, Feature, FeatureState};
use crate::{ScoreError, TableError};
use rustc_hash::FxHashMap;
use std::f64::consts::LN_10;
use std::path::Path;

/// Log-probability of a word the model has never seen.
const UNKNOWN_LOGPROB: f64 = -100.0;

const SENTENCE_START: &str = "<s>";
const SENTENCE_END: &str = "</s>";

#[derive(Debug, Clone, Copy)]
struct Entry {
    logprob: f64,
    backoff: f64,
}

/// Back-off n-gram model with natural-log probabilities.
#[derive(Debug, Clone)]
pub struct NgramModel {
    order: usize,
    entries: FxHashMap<String, Entry>,
}

impl NgramModel {
    /// An empty model of the given order (at least 1).
    pub fn new(order: usize) -> Self {
        NgramModel { order: order.max(1), entries: FxHashMap::default() }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Add an n-gram (space-separated words) with natural-log probability and
    /// back-off weight.
    pub fn insert(&mut self, ngram: &str, logprob: f64, backoff: f64) {
        let words: Vec<&str> = ngram.split_whitespace().collect();
        self.order = self.order.max(words.len());
        self.entries.insert(words.join(" "), Entry { logprob, backoff });
    }

    /// Parse the ARPA text format. Probabilities there are log10; they are
    /// converted to natural logs.
    pub fn from_arpa(text: &str) -> Result<Self, TableError> {
        let mut model = NgramModel::new(1);
        let mut current: Option<usize> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = regex!(r"^\\(\d+)-grams:$").captures(line) {
                let n = caps[1]
                    .parse::<usize>()
                    .map_err(|_| TableError::Parse { line: idx + 1, message: format!("bad section '{line}'") })?;
                current = Some(n);
                continue;
            }
            if line.starts_with('\\') {
                // \data\ and \end\
                current = None;
                continue;
            }
            let Some(n) = current else {
                // "ngram N=count" header lines
                continue;
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != n + 1 && fields.len() != n + 2 {
                return Err(TableError::Parse {
                    line: idx + 1,
                    message: format!("expected {n} words and a probability, got '{line}'"),
                });
            }
            let logprob = parse_log10(fields[0], idx + 1)?;
            let backoff = match fields.get(n + 1) {
                Some(b) => parse_log10(b, idx + 1)?,
                None => 0.0,
            };
            model.insert(&fields[1..=n].join(" "), logprob, backoff);
        }

        Ok(model)
    }

    pub fn load_arpa(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_arpa(&text)
    }

    /// Log-probability of `word` after `context` (most recent word last),
    /// backing off to shorter histories.
    pub fn word_score(&self, context: &[String], word: &str) -> f64 {
        let history = &context[context.len().saturating_sub(self.order - 1)..];
        let mut backoff = 0.0;
        for start in 0..=history.len() {
            let ctx = &history[start..];
            let key = if ctx.is_empty() { word.to_string() } else { format!("{} {}", ctx.join(" "), word) };
            if let Some(entry) = self.entries.get(&key) {
                return backoff + entry.logprob;
            }
            if !ctx.is_empty() {
                if let Some(entry) = self.entries.get(&ctx.join(" ")) {
                    backoff += entry.backoff;
                }
            }
        }
        backoff + UNKNOWN_LOGPROB
    }

    fn trim(&self, context: &mut Vec<String>) {
        let keep = self.order - 1;
        if context.len() > keep {
            context.drain(..context.len() - keep);
        }
    }
}

fn parse_log10(field: &str, line: usize) -> Result<f64, TableError> {
    field
        .parse::<f64>()
        .map(|v| v * LN_10)
        .map_err(|_| TableError::Parse { line, message: format!("bad number '{field}'") })
}

impl Feature for NgramModel {
    fn name(&self) -> &str {
        "lm"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::STATEFUL
    }

    fn empty_state(&self, _sentence: &crate::Sentence) -> FeatureState {
        let mut context = vec![SENTENCE_START.to_string()];
        self.trim(&mut context);
        FeatureState::Words(context)
    }

    fn evaluate_when_applied(
        &self,
        app: &Application<'_>,
        prev: &FeatureState,
        scores: &mut [f64],
    ) -> Result<FeatureState, ScoreError> {
        let mut context = match prev {
            FeatureState::Words(words) => words.clone(),
            FeatureState::Empty => Vec::new(),
            FeatureState::Position(_) => return Err(ScoreError::new("lm state must be a word context")),
        };

        let mut total = 0.0;
        for word in app.target.words() {
            total += self.word_score(&context, word);
            context.push(word.clone());
        }
        if app.completes() {
            total += self.word_score(&context, SENTENCE_END);
            context.push(SENTENCE_END.to_string());
        }
        self.trim(&mut context);

        scores[0] = total;
        Ok(FeatureState::Words(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Bitmap;
    use crate::{Range, Sentence, TargetPhrase};

    fn bigram() -> NgramModel {
        let mut lm = NgramModel::new(2);
        lm.insert("<s>", -99.0, -0.5);
        lm.insert("the", -1.0, -0.25);
        lm.insert("house", -2.0, 0.0);
        lm.insert("</s>", -3.0, 0.0);
        lm.insert("<s> the", -0.1, 0.0);
        lm.insert("the house", -0.2, 0.0);
        lm
    }

    #[test]
    fn known_bigram_wins_over_backoff() {
        let lm = bigram();
        let ctx = vec!["the".to_string()];
        assert_eq!(lm.word_score(&ctx, "house"), -0.2);
        // "house the" is unseen: backoff(house) + p(the).
        let ctx = vec!["house".to_string()];
        assert_eq!(lm.word_score(&ctx, "the"), -1.0);
        // "the </s>" unseen: backoff(the) + p(</s>).
        let ctx = vec!["the".to_string()];
        assert_eq!(lm.word_score(&ctx, "</s>"), -3.25);
        assert_eq!(lm.word_score(&[], "zebra"), UNKNOWN_LOGPROB);
    }

    #[test]
    fn state_keeps_last_order_minus_one_words() {
        let lm = bigram();
        let sentence = Sentence::parse("das haus");
        let target = TargetPhrase::parse("the house");
        let coverage = Bitmap::empty(2).union(Range::single(0));
        let app = Application { sentence: &sentence, prev_range: None, range: Range::single(0), target: &target, coverage: &coverage };
        let mut scores = [0.0];
        let state = lm.evaluate_when_applied(&app, &lm.empty_state(&sentence), &mut scores).unwrap();
        assert_eq!(state, FeatureState::Words(vec!["house".into()]));
        assert!((scores[0] - (-0.1 - 0.2)).abs() < 1e-12);
    }

    #[test]
    fn completion_scores_sentence_end() {
        let lm = bigram();
        let sentence = Sentence::parse("haus");
        let target = TargetPhrase::parse("house");
        let coverage = Bitmap::empty(1).union(Range::single(0));
        let app = Application { sentence: &sentence, prev_range: None, range: Range::single(0), target: &target, coverage: &coverage };
        let mut scores = [0.0];
        let prev = FeatureState::Words(vec!["the".into()]);
        let state = lm.evaluate_when_applied(&app, &prev, &mut scores).unwrap();
        assert_eq!(state, FeatureState::Words(vec!["</s>".into()]));
        // p(house|the) + p(</s>) (house has zero backoff)
        assert!((scores[0] - (-0.2 - 3.0)).abs() < 1e-12);
    }

    #[test]
    fn arpa_probabilities_become_natural_logs() {
        let text = "\\data\\\nngram 1=2\nngram 2=1\n\n\\1-grams:\n-1.0\tthe\t-0.5\n-2.0\thouse\n\n\\2-grams:\n-0.5\tthe house\n\n\\end\\\n";
        let lm = NgramModel::from_arpa(text).unwrap();
        assert_eq!(lm.order(), 2);
        let ctx = vec!["the".to_string()];
        assert!((lm.word_score(&ctx, "house") - (-0.5 * LN_10)).abs() < 1e-12);
        assert!((lm.word_score(&[], "house") - (-2.0 * LN_10)).abs() < 1e-12);
    }

    #[test]
    fn malformed_arpa_line_reports_line_number() {
        let text = "\\1-grams:\n-1.0\n";
        match NgramModel::from_arpa(text) {
            Err(TableError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
