//! In-memory phrase table.
//!
//! Text format, one entry per line:
//!
//! ```text
//! das haus ||| the house ||| 0.8 0.6 0.7 0.5
//! ```
//!
//! Scores are probabilities and are stored as natural logs, floored at
//! `-100` (zero or negative probabilities get the floor). Fields after the
//! third (alignments, counts) are ignored. Blank lines and lines starting with
//! `#` are skipped. Every entry must carry the same number of scores.

use crate::{OptionSupply, PhraseCandidate, Range, ScoreError, Sentence, TableError, TargetPhrase};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Lowest log score a table entry can have.
const LOG_FLOOR: f64 = -100.0;

#[derive(Debug, Clone, Default)]
pub struct PhraseTable {
    num_scores: Option<usize>,
    entries: FxHashMap<String, Vec<PhraseCandidate>>,
}

impl PhraseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, TableError> {
        let mut table = PhraseTable::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_err = |message: String| TableError::Parse { line: idx + 1, message };

            let fields: Vec<&str> = regex!(r"\s*\|\|\|\s*").split(line).collect();
            if fields.len() < 3 {
                return Err(parse_err(format!("expected 'source ||| target ||| scores', got '{line}'")));
            }
            let (source, target) = (fields[0], fields[1]);
            if source.split_whitespace().next().is_none() {
                return Err(parse_err("empty source phrase".to_string()));
            }
            let scores = fields[2]
                .split_whitespace()
                .map(|field| field.parse::<f64>().map(to_log).map_err(|_| parse_err(format!("bad score '{field}'"))))
                .collect::<Result<Vec<_>, _>>()?;
            table.insert(source, target, scores).map_err(parse_err)?;
        }
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Add an entry with log-domain scores.
    pub fn insert(&mut self, source: &str, target: &str, scores: Vec<f64>) -> Result<(), String> {
        match self.num_scores {
            Some(n) if n != scores.len() => {
                return Err(format!("expected {n} scores, got {}", scores.len()));
            }
            Some(_) => {}
            None => self.num_scores = Some(scores.len()),
        }
        let key = source.split_whitespace().collect::<Vec<_>>().join(" ");
        self.entries.entry(key).or_default().push(PhraseCandidate { target: TargetPhrase::parse(target), scores });
        Ok(())
    }

    /// Scores per entry; 0 for an empty table.
    pub fn num_scores(&self) -> usize {
        self.num_scores.unwrap_or(0)
    }

    /// Number of distinct source phrases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest source phrase in words.
    pub fn max_source_len(&self) -> usize {
        self.entries.keys().map(|k| k.split(' ').count()).max().unwrap_or(0)
    }

    pub fn lookup(&self, source: &str) -> &[PhraseCandidate] {
        self.entries.get(source).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn to_log(p: f64) -> f64 {
    if p > 0.0 { p.ln().max(LOG_FLOOR) } else { LOG_FLOOR }
}

impl OptionSupply for PhraseTable {
    fn candidates(&self, sentence: &Sentence, range: Range) -> Result<Vec<PhraseCandidate>, ScoreError> {
        Ok(self.lookup(&sentence.phrase(range)).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
# toy table
das ||| the ||| 0.5 1
haus ||| house ||| 1 0.25 ||| 0-0
das haus ||| the house ||| 0.8 0

haus ||| home ||| 0.5 0.5
";

    #[test]
    fn parses_entries_as_log_scores() {
        let table = PhraseTable::parse(TABLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.num_scores(), 2);
        assert_eq!(table.max_source_len(), 2);

        let haus = table.lookup("haus");
        assert_eq!(haus.len(), 2);
        assert_eq!(haus[0].target.text(), "house");
        assert_eq!(haus[0].scores, vec![0.0, 0.25f64.ln()]);

        let both = table.lookup("das haus");
        assert_eq!(both[0].scores[1], LOG_FLOOR);
    }

    #[test]
    fn supplies_candidates_by_span_text() {
        let table = PhraseTable::parse(TABLE).unwrap();
        let sentence = Sentence::parse("das haus ist");
        assert_eq!(table.candidates(&sentence, Range::new(0, 1)).unwrap().len(), 1);
        assert!(table.candidates(&sentence, Range::single(2)).unwrap().is_empty());
    }

    #[test]
    fn reports_the_offending_line() {
        let err = PhraseTable::parse("a ||| b ||| 0.5\nc ||| d\n").unwrap_err();
        assert!(matches!(err, TableError::Parse { line: 2, .. }));

        let err = PhraseTable::parse("a ||| b ||| 0.5\nc ||| d ||| 0.5 0.5\n").unwrap_err();
        assert!(matches!(err, TableError::Parse { line: 2, ref message } if message.contains("expected 1")));

        let err = PhraseTable::parse("a ||| b ||| high\n").unwrap_err();
        assert!(matches!(err, TableError::Parse { line: 1, ref message } if message.contains("high")));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(PhraseTable::load("/definitely/not/here.txt"), Err(TableError::Io(_))));
    }
}
