//! Flat topic model: one vocabulary distribution per (language, topic).

use std::io;

use rayon::prelude::*;

use crate::config::WalkPriorGroup;
use crate::corpus::Corpus;
use crate::prob::multinomial::{CachedMultinomial, Posterior};
use crate::state::model::{TokenContext, TokenSupport, TopicModel};

pub struct FlatModel {
    /// `topics[lang][topic]` over that language's vocabulary. Cached dense:
    /// a topic's distribution is read once per token but only written when a
    /// token moves in or out of the topic, so the memo survives long runs of
    /// reads.
    topics: Vec<Vec<Posterior>>,
    num_topics: usize,
}

impl FlatModel {
    pub fn new(num_topics: usize, vocab_sizes: &[usize], lambda: f64) -> Self {
        assert!(num_topics > 0);
        let topics = vocab_sizes
            .iter()
            .map(|&size| {
                (0..num_topics)
                    .map(|_| {
                        Posterior::Cached(CachedMultinomial::new(size, size as f64 * lambda))
                    })
                    .collect()
            })
            .collect();
        FlatModel { topics, num_topics }
    }

    /// Tokens currently assigned to `topic` in `language`.
    pub fn topic_sum(&self, language: usize, topic: u32) -> i64 {
        self.topics[language][topic as usize].sum()
    }
}

impl TopicModel for FlatModel {
    fn num_topics(&self) -> usize {
        self.num_topics
    }

    fn support(&self, _ctx: TokenContext) -> TokenSupport {
        TokenSupport::Flat
    }

    fn fill_conditional(&mut self, ctx: TokenContext, doc_log_probs: &[f64], out: &mut Vec<f64>) {
        debug_assert_eq!(doc_log_probs.len(), self.num_topics);
        let term = ctx.term;
        let vals: Vec<f64> = self.topics[ctx.language]
            .par_iter_mut()
            .enumerate()
            .map(|(k, dist)| doc_log_probs[k] + dist.log_probability_cached(term))
            .collect();
        out.clear();
        out.extend(vals);
    }

    fn assignment_log_prob(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>) -> f64 {
        debug_assert!(path.is_none());
        self.topics[ctx.language][topic as usize].log_probability_cached(ctx.term)
    }

    fn change_count(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>, delta: i64) {
        debug_assert!(path.is_none());
        self.topics[ctx.language][topic as usize].change_count(ctx.term, delta);
    }

    fn log_likelihood(&self) -> f64 {
        self.topics
            .iter()
            .flatten()
            .map(Posterior::log_likelihood)
            .sum()
    }

    fn reset_counts(&mut self) {
        for dist in self.topics.iter_mut().flatten() {
            dist.reset();
        }
    }

    fn set_vocab_scale(&mut self, lambda: f64) {
        for dist in self.topics.iter_mut().flatten() {
            dist.set_prior_scale(lambda);
        }
    }

    fn set_walk_scales(&mut self, _groups: &[WalkPriorGroup]) {}

    fn assigned_sense(&self, _ctx: TokenContext, _path: Option<u32>) -> Option<&str> {
        None
    }

    fn write_topics(
        &mut self,
        corpus: &Corpus,
        num_terms: usize,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        for topic in 0..self.num_topics {
            for language in 0..self.topics.len() {
                let dist = &self.topics[language][topic];
                writeln!(
                    out,
                    "topic {topic} lang {language} ({} tokens)",
                    dist.sum()
                )?;
                for (log_prob, term) in dist.ranked_items().into_iter().take(num_terms) {
                    writeln!(
                        out,
                        "\t{}\t{}",
                        corpus.term_string(language, term),
                        log_prob.exp()
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(term: u32) -> TokenContext {
        TokenContext {
            doc: 0,
            language: 0,
            term,
        }
    }

    #[test]
    fn conditional_combines_doc_and_topic_parts() {
        let mut model = FlatModel::new(3, &[5], 0.1);
        model.change_count(ctx(2), 1, None, 4);
        let doc = vec![0.0; 3];
        let mut out = Vec::new();
        model.fill_conditional(ctx(2), &doc, &mut out);
        assert_eq!(out.len(), 3);
        // Topic 1 holds all the counts for term 2.
        assert!(out[1] > out[0]);
        assert_eq!(out[0], out[2]);
        // Matches the scalar path.
        assert_eq!(out[1], model.assignment_log_prob(ctx(2), 1, None));
    }

    #[test]
    fn reset_zeroes_counts_but_keeps_shape() {
        let mut model = FlatModel::new(2, &[4], 0.5);
        model.change_count(ctx(0), 0, None, 3);
        model.reset_counts();
        assert_eq!(model.topic_sum(0, 0), 0);
        let mut out = Vec::new();
        model.fill_conditional(ctx(0), &[0.0, 0.0], &mut out);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn vocab_scale_shifts_smoothing() {
        let mut model = FlatModel::new(2, &[4], 0.01);
        model.change_count(ctx(0), 0, None, 5);
        let sharp = model.assignment_log_prob(ctx(1), 0, None);
        model.set_vocab_scale(10.0);
        let smooth = model.assignment_log_prob(ctx(1), 0, None);
        // Heavier prior gives unseen terms more mass.
        assert!(smooth > sharp);
    }
}
