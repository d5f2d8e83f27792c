//! Sufficient-statistics state: assignment tables, document-topic counts,
//! and the topic-side model behind the [`TopicModel`] strategy.

pub mod flat;
pub mod model;
pub mod walk_model;

pub use flat::FlatModel;
pub use model::{TokenContext, TokenSupport, TopicModel};
pub use walk_model::WalkModel;

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::Rng;

use crate::config::{EngineConfig, WalkPriorGroup};
use crate::corpus::Corpus;
use crate::prob::multinomial::{CachedMultinomial, Posterior, SparseMultinomial};

/// One token's assignment: a topic, and for in-hierarchy words a path.
pub type Assignment = Option<(u32, Option<u32>)>;

/// All mutable sampling state.
///
/// Every count in here is derivable from the assignment tables; reassignment
/// goes through [`SamplingState::assign`] so tables and counts can never
/// drift apart.
pub struct SamplingState {
    corpus: Arc<Corpus>,
    model: Box<dyn TopicModel>,
    /// Document-topic posterior per document.
    docs: Vec<Posterior>,
    /// `assignments[doc][token]`.
    assignments: Vec<Vec<Assignment>>,
    num_topics: usize,
}

impl SamplingState {
    pub fn new(config: &EngineConfig, corpus: Arc<Corpus>, model: Box<dyn TopicModel>) -> Self {
        let num_topics = config.num_topics;
        assert_eq!(model.num_topics(), num_topics);
        let docs = corpus
            .documents
            .iter()
            .map(|_| doc_distribution(config))
            .collect();
        let assignments = corpus
            .documents
            .iter()
            .map(|d| vec![None; d.num_tokens()])
            .collect();
        SamplingState {
            corpus,
            model,
            docs,
            assignments,
            num_topics,
        }
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn corpus_arc(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn context(&self, doc: usize, token: usize) -> TokenContext {
        let document = &self.corpus.documents[doc];
        TokenContext {
            doc,
            language: document.language,
            term: document.term(token),
        }
    }

    pub fn support(&self, doc: usize, token: usize) -> TokenSupport {
        self.model.support(self.context(doc, token))
    }

    pub fn assignment(&self, doc: usize, token: usize) -> Assignment {
        self.assignments[doc][token]
    }

    /// Atomically moves one token: decrements the counts of the old
    /// assignment (no-op when unassigned), stores the new assignment, and
    /// increments its counts.
    pub fn assign(&mut self, doc: usize, token: usize, new: Assignment) {
        let ctx = self.context(doc, token);
        if let Some((topic, path)) = self.assignments[doc][token] {
            self.model.change_count(ctx, topic, path, -1);
            self.docs[doc].change_count(topic, -1);
        }
        self.assignments[doc][token] = new;
        if let Some((topic, path)) = new {
            debug_assert!((topic as usize) < self.num_topics);
            self.model.change_count(ctx, topic, path, 1);
            self.docs[doc].change_count(topic, 1);
        }
    }

    /// Unassigns every token of one document (left-to-right scoring resets
    /// the test document it just walked).
    pub fn clear_document(&mut self, doc: usize) {
        for token in 0..self.assignments[doc].len() {
            self.assign(doc, token, None);
        }
    }

    /// Unnormalized per-topic document weights, ln(count + prior).
    pub fn doc_log_numerators(&self, doc: usize, out: &mut Vec<f64>) {
        out.clear();
        out.extend((0..self.num_topics as u32).map(|k| self.docs[doc].log_numerator(k)));
    }

    /// Normalized document-topic log probability.
    pub fn doc_log_probability(&self, doc: usize, topic: u32) -> f64 {
        self.docs[doc].log_probability(topic)
    }

    pub fn doc_topic_count(&self, doc: usize, topic: u32) -> i64 {
        self.docs[doc].count(topic)
    }

    /// Fills the token's full conditional (document part included).
    pub fn fill_conditional(&mut self, doc: usize, token: usize, out: &mut Vec<f64>) {
        let ctx = self.context(doc, token);
        let mut doc_probs = Vec::with_capacity(self.num_topics);
        self.doc_log_numerators(doc, &mut doc_probs);
        self.model.fill_conditional(ctx, &doc_probs, out);
    }

    /// Model-side log probability of one assignment.
    pub fn assignment_log_prob(&mut self, doc: usize, token: usize, topic: u32, path: Option<u32>) -> f64 {
        let ctx = self.context(doc, token);
        self.model.assignment_log_prob(ctx, topic, path)
    }

    /// Clears every count table; assignments survive. Replaying the tables
    /// afterwards rebuilds the exact state, possibly under new priors.
    pub fn reset_counts(&mut self) {
        for dist in &mut self.docs {
            dist.reset();
        }
        self.model.reset_counts();
    }

    /// Re-applies every stored assignment to the (empty) count tables.
    pub fn replay_assignments(&mut self) {
        for doc in 0..self.assignments.len() {
            for token in 0..self.assignments[doc].len() {
                if let Some((topic, path)) = self.assignments[doc][token] {
                    let ctx = self.context(doc, token);
                    self.model.change_count(ctx, topic, path, 1);
                    self.docs[doc].change_count(topic, 1);
                }
            }
        }
    }

    /// Replays assignments into empty count tables, scoring each one
    /// against the counts accumulated so far (prequential likelihood).
    /// Counts are fully rebuilt when this returns.
    pub fn prequential_replay(&mut self) -> f64 {
        let mut lhood = 0.0;
        for doc in 0..self.assignments.len() {
            for token in 0..self.assignments[doc].len() {
                if let Some((topic, path)) = self.assignments[doc][token] {
                    let ctx = self.context(doc, token);
                    lhood += self.docs[doc].log_probability(topic)
                        + self.model.assignment_log_prob(ctx, topic, path);
                    self.model.change_count(ctx, topic, path, 1);
                    self.docs[doc].change_count(topic, 1);
                }
            }
        }
        lhood
    }

    /// Like [`SamplingState::fill_conditional`] but with the normalized
    /// document probability, so the log-sum of `out` is a proper predictive
    /// probability (held-out scoring).
    pub fn fill_predictive(&mut self, doc: usize, token: usize, out: &mut Vec<f64>) {
        let ctx = self.context(doc, token);
        let doc_probs: Vec<f64> = (0..self.num_topics as u32)
            .map(|k| self.docs[doc].log_probability(k))
            .collect();
        self.model.fill_conditional(ctx, &doc_probs, out);
    }

    /// Random starting assignments for training documents.
    pub fn random_init(&mut self, rng: &mut SmallRng) {
        for doc in 0..self.corpus.documents.len() {
            if self.corpus.documents[doc].test {
                continue;
            }
            for token in 0..self.assignments[doc].len() {
                let new = match self.support(doc, token) {
                    TokenSupport::Unmodeled => None,
                    TokenSupport::Flat => {
                        Some((rng.random_range(0..self.num_topics) as u32, None))
                    }
                    TokenSupport::Paths(p) => Some((
                        rng.random_range(0..self.num_topics) as u32,
                        Some(rng.random_range(0..p) as u32),
                    )),
                };
                self.assign(doc, token, new);
            }
        }
    }

    /// Joint log likelihood: document proportions plus the model side.
    pub fn log_likelihood(&self) -> f64 {
        self.doc_likelihood() + self.model.log_likelihood()
    }

    pub fn doc_likelihood(&self) -> f64 {
        self.docs.iter().map(Posterior::log_likelihood).sum()
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        for dist in &mut self.docs {
            dist.set_prior_scale(alpha);
        }
    }

    pub fn set_lambda(&mut self, lambda: f64) {
        self.model.set_vocab_scale(lambda);
    }

    pub fn set_walk_scales(&mut self, groups: &[WalkPriorGroup]) {
        self.model.set_walk_scales(groups);
    }

    /// Sense key predicted by a token's current assignment.
    pub fn assigned_sense(&self, doc: usize, token: usize) -> Option<&str> {
        let (_, path) = self.assignments[doc][token]?;
        self.model.assigned_sense(self.context(doc, token), path)
    }

    pub fn model_mut(&mut self) -> &mut dyn TopicModel {
        self.model.as_mut()
    }
}

/// Document distributions are sparse under a uniform prior; a biased
/// `alpha_zero` needs the explicit-prior dense form, cached because the
/// sampler reads all K numerators per token.
fn doc_distribution(config: &EngineConfig) -> Posterior {
    let k = config.num_topics;
    let prior_sum = config.alpha * k as f64;
    if (config.alpha_zero - 1.0).abs() < f64::EPSILON {
        Posterior::Sparse(SparseMultinomial::new(k, prior_sum))
    } else {
        let mut prior = vec![1.0; k];
        prior[0] = config.alpha_zero;
        Posterior::Cached(CachedMultinomial::with_prior(prior, prior_sum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn corpus() -> Arc<Corpus> {
        let vocab = vec![vec!["a".into(), "b".into(), "c".into(), "d".into()]];
        let mut corpus = Corpus::new(vocab);
        corpus.add_document(Document::new("d0", 0, vec![0, 1, 2, 0]));
        corpus.add_document(Document::new("d1", 0, vec![3, 3, 1]));
        Arc::new(corpus)
    }

    fn flat_state(num_topics: usize) -> SamplingState {
        let config = EngineConfig {
            num_topics,
            ..EngineConfig::default()
        };
        let corpus = corpus();
        let model = Box::new(FlatModel::new(num_topics, &[4], config.lambda));
        SamplingState::new(&config, corpus, model)
    }

    fn assert_counts_match_assignments(state: &SamplingState) {
        for doc in 0..state.corpus().num_documents() {
            let mut hist = vec![0i64; state.num_topics()];
            for token in 0..state.corpus().documents[doc].num_tokens() {
                if let Some((topic, _)) = state.assignment(doc, token) {
                    hist[topic as usize] += 1;
                }
            }
            for (topic, &count) in hist.iter().enumerate() {
                assert_eq!(state.doc_topic_count(doc, topic as u32), count);
            }
        }
    }

    #[test]
    fn assign_updates_doc_and_model_counts() {
        let mut state = flat_state(3);
        state.assign(0, 0, Some((2, None)));
        state.assign(0, 1, Some((2, None)));
        assert_eq!(state.doc_topic_count(0, 2), 2);
        // Reassign moves the count.
        state.assign(0, 0, Some((1, None)));
        assert_eq!(state.doc_topic_count(0, 2), 1);
        assert_eq!(state.doc_topic_count(0, 1), 1);
        // Unassign removes it.
        state.assign(0, 0, None);
        assert_eq!(state.doc_topic_count(0, 1), 0);
        assert_counts_match_assignments(&state);
    }

    #[test]
    fn reassigning_same_topic_is_a_net_noop() {
        let mut state = flat_state(2);
        state.assign(1, 0, Some((0, None)));
        let before = state.log_likelihood();
        state.assign(1, 0, Some((0, None)));
        assert_eq!(state.doc_topic_count(1, 0), 1);
        assert!((state.log_likelihood() - before).abs() < 1e-12);
    }

    #[test]
    fn unassigned_decrement_is_a_noop() {
        let mut state = flat_state(2);
        state.assign(0, 0, None);
        assert_eq!(state.doc_topic_count(0, 0), 0);
        assert_eq!(state.doc_topic_count(0, 1), 0);
    }

    #[test]
    fn reset_and_replay_rebuilds_counts() {
        let mut state = flat_state(3);
        let mut rng = SmallRng::seed_from_u64(3);
        state.random_init(&mut rng);
        let lhood = state.log_likelihood();
        state.reset_counts();
        assert_eq!(state.doc_topic_count(0, 0), 0);
        state.replay_assignments();
        assert!((state.log_likelihood() - lhood).abs() < 1e-12);
        assert_counts_match_assignments(&state);
    }

    #[test]
    fn alpha_zero_biases_empty_documents_toward_topic_zero() {
        let config = EngineConfig {
            num_topics: 4,
            alpha_zero: 5.0,
            ..EngineConfig::default()
        };
        let model = Box::new(FlatModel::new(4, &[4], config.lambda));
        let state = SamplingState::new(&config, corpus(), model);
        assert!(state.doc_log_probability(0, 0) > state.doc_log_probability(0, 1));
    }

    #[test]
    fn conditional_width_matches_support() {
        let mut state = flat_state(5);
        let mut out = Vec::new();
        state.fill_conditional(0, 0, &mut out);
        assert_eq!(out.len(), 5);
    }

    proptest! {
        // Arbitrary assignment sequences never desynchronize counts from
        // the assignment table.
        #[test]
        fn counts_track_assignments(moves in proptest::collection::vec(
            (0usize..2, 0usize..3, proptest::option::of(0u32..3)), 1..40)
        ) {
            let mut state = flat_state(3);
            for (doc, token, topic) in moves {
                let assignment = topic.map(|t| (t, None));
                state.assign(doc, token, assignment);
                assert_counts_match_assignments(&state);
            }
        }
    }
}
