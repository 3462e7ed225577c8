//! Error types.
//!
//! Budget exhaustion (pop limit, time limit) and empty spans are not errors:
//! the search treats them as normal control flow and returns the best result
//! reached. Everything here aborts the decode of one sentence.

use std::fmt;

/// Failure reported by an external collaborator (feature, option supply or
/// candidate source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreError {
    pub message: String,
}

impl ScoreError {
    pub fn new(message: impl Into<String>) -> Self {
        ScoreError { message: message.into() }
    }
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScoreError {}

/// Sentence-level decode failure.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Invalid option values or an unsupported feature combination.
    Config(String),
    /// A pruned hypothesis was still referenced as a predecessor.
    PruningInvariant { cardinality: usize, hypothesis: usize },
    /// A feature failed while scoring.
    Scoring { feature: String, message: String },
    /// The option supply failed for a span.
    Supply(String),
    /// The candidate source failed or broke its contract.
    Candidates(String),
    /// Full coverage was required but the last stack stayed empty.
    Incomplete { covered: usize, total: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            DecodeError::PruningInvariant { cardinality, hypothesis } => write!(
                f,
                "pruning invariant violated: hypothesis {hypothesis} discarded from stack {cardinality} is still referenced"
            ),
            DecodeError::Scoring { feature, message } => write!(f, "feature '{feature}' failed: {message}"),
            DecodeError::Supply(msg) => write!(f, "option supply failed: {msg}"),
            DecodeError::Candidates(msg) => write!(f, "candidate source failed: {msg}"),
            DecodeError::Incomplete { covered, total } => {
                write!(f, "no complete translation found ({covered} of {total} source words covered)")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Phrase table loading failure.
#[derive(Debug)]
pub enum TableError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Io(err) => write!(f, "failed to read phrase table: {err}"),
            TableError::Parse { line, message } => write!(f, "phrase table line {line}: {message}"),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableError::Io(err) => Some(err),
            TableError::Parse { .. } => None,
        }
    }
}

impl From<std::io::Error> for TableError {
    fn from(err: std::io::Error) -> Self {
        TableError::Io(err)
    }
}
