//! Engine errors for load-time and I/O failures.
//!
//! Correctness-critical invariants (non-negative counts, finite
//! log-probabilities, assignment/path consistency) are enforced with panics
//! instead: once the sufficient statistics are corrupted there is nothing
//! sensible to recover to.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ontology format error: {0}")]
    OntologyFormat(String),

    #[error("duplicate ontology node: {key}")]
    DuplicateNode { key: String },

    #[error("ontology root was never declared or is not a known node")]
    MissingRoot,

    #[error("conflicting ontology roots: {previous} vs {conflicting}")]
    ConflictingRoot { previous: String, conflicting: String },

    #[error("cycle detected in ontology at node {key}")]
    CycleDetected { key: String },

    #[error("resume state mismatch: {0}")]
    ResumeMismatch(String),

    #[error("hyperparameter file error: {0}")]
    HyperparameterFormat(String),

    #[error("thread pool construction failed: {0}")]
    ThreadPool(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}
