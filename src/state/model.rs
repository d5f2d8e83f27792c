//! The topic-model strategy: what a topic says about a token.
//!
//! The sampling state owns document-side counts and assignment tables; the
//! model owns everything topic-side. The flat model scores a token with a
//! per-topic vocabulary distribution, the walk model with a per-topic
//! distribution over ontology paths.

use std::io;

use crate::config::WalkPriorGroup;
use crate::corpus::Corpus;

/// Everything a model needs to know about one token.
#[derive(Debug, Clone, Copy)]
pub struct TokenContext {
    pub doc: usize,
    pub language: usize,
    pub term: u32,
}

/// Width of a token's conditional distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSupport {
    /// The model cannot explain this token; it stays unassigned.
    Unmodeled,
    /// K topic columns, no path dimension.
    Flat,
    /// K x paths grid, topic-major.
    Paths(usize),
}

pub trait TopicModel: Send {
    fn num_topics(&self) -> usize;

    /// Fixed per corpus: a token's support never changes during sampling.
    fn support(&self, ctx: TokenContext) -> TokenSupport;

    /// Fills `out` with the unnormalized log conditional for every column of
    /// the token's support, already including the document contribution
    /// passed in `doc_log_probs` (one entry per topic).
    ///
    /// For [`TokenSupport::Paths`], entry `topic * paths + path` covers the
    /// (topic, path) pair.
    fn fill_conditional(&mut self, ctx: TokenContext, doc_log_probs: &[f64], out: &mut Vec<f64>);

    /// Model-side log probability of one concrete assignment, without the
    /// document contribution.
    fn assignment_log_prob(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>) -> f64;

    /// Applies `delta` to every count the assignment touches.
    fn change_count(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>, delta: i64);

    fn log_likelihood(&self) -> f64;

    fn reset_counts(&mut self);

    /// Vocabulary concentration for flat (and auxiliary) topics.
    fn set_vocab_scale(&mut self, lambda: f64);

    /// Walk prior scales; a no-op for models without walks.
    fn set_walk_scales(&mut self, groups: &[WalkPriorGroup]);

    /// Sense key this assignment predicts, when the model resolves senses.
    fn assigned_sense(&self, ctx: TokenContext, path: Option<u32>) -> Option<&str>;

    /// Human-readable per-topic summary for the `.topics` artifact.
    fn write_topics(
        &mut self,
        corpus: &Corpus,
        num_terms: usize,
        out: &mut dyn io::Write,
    ) -> io::Result<()>;
}
