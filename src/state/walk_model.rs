//! Walk topic model: one ontology walk per topic, with optional flat
//! auxiliary topics for words the hierarchy cannot emit.

use std::io;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::{EngineConfig, WalkPriorGroup};
use crate::corpus::Corpus;
use crate::ontology::{Ontology, TopicWalk};
use crate::state::flat::FlatModel;
use crate::state::model::{TokenContext, TokenSupport, TopicModel};

pub struct WalkModel {
    ontology: Arc<Ontology>,
    walks: Vec<TopicWalk>,
    /// Hyperparameter-group index per ontology node.
    node_groups: Vec<usize>,
    /// Fallback for words without paths; `None` leaves them unassigned.
    aux: Option<FlatModel>,
    num_topics: usize,
}

impl WalkModel {
    pub fn new(config: &EngineConfig, ontology: Arc<Ontology>, vocab_sizes: &[usize]) -> Self {
        assert!(ontology.is_finalized());
        let node_groups: Vec<usize> = (0..ontology.num_nodes() as u32)
            .map(|ii| config.group_index(&ontology.node(ii).hyper_group))
            .collect();
        let walks = (0..config.num_topics)
            .map(|_| {
                TopicWalk::new(
                    &ontology,
                    &config.walk_priors,
                    &node_groups,
                    config.dense_walk_distributions,
                    config.cache_path_prefixes,
                )
            })
            .collect();
        let aux = config
            .use_aux_topics
            .then(|| FlatModel::new(config.num_topics, vocab_sizes, config.lambda));
        WalkModel {
            ontology,
            walks,
            node_groups,
            aux,
            num_topics: config.num_topics,
        }
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn walk(&self, topic: u32) -> &TopicWalk {
        &self.walks[topic as usize]
    }
}

impl TopicModel for WalkModel {
    fn num_topics(&self) -> usize {
        self.num_topics
    }

    fn support(&self, ctx: TokenContext) -> TokenSupport {
        let paths = self.ontology.word_paths(ctx.language, ctx.term).len();
        if paths > 0 {
            TokenSupport::Paths(paths)
        } else if self.aux.is_some() {
            TokenSupport::Flat
        } else {
            TokenSupport::Unmodeled
        }
    }

    fn fill_conditional(&mut self, ctx: TokenContext, doc_log_probs: &[f64], out: &mut Vec<f64>) {
        debug_assert_eq!(doc_log_probs.len(), self.num_topics);
        let paths = self.ontology.word_paths(ctx.language, ctx.term);
        if paths.is_empty() {
            match &mut self.aux {
                Some(aux) => aux.fill_conditional(ctx, doc_log_probs, out),
                None => out.clear(),
            }
            return;
        }

        // Each walk is topic-private, so the fan-out mutates disjoint
        // prefix caches.
        let ont: &Ontology = &self.ontology;
        let rows: Vec<Vec<f64>> = self
            .walks
            .par_iter_mut()
            .map(|walk| paths.iter().map(|p| walk.path_log_prob(ont, p)).collect())
            .collect();

        out.clear();
        out.reserve(self.num_topics * paths.len());
        for (topic, row) in rows.iter().enumerate() {
            for &val in row {
                out.push(doc_log_probs[topic] + val);
            }
        }
    }

    fn assignment_log_prob(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>) -> f64 {
        match path {
            Some(pp) => {
                let path = &self.ontology.word_paths(ctx.language, ctx.term)[pp as usize];
                self.walks[topic as usize].path_log_prob(&self.ontology, path)
            }
            None => match &mut self.aux {
                Some(aux) => aux.assignment_log_prob(ctx, topic, None),
                None => panic!("pathless assignment without auxiliary topics"),
            },
        }
    }

    fn change_count(&mut self, ctx: TokenContext, topic: u32, path: Option<u32>, delta: i64) {
        match path {
            Some(pp) => {
                let path = &self.ontology.word_paths(ctx.language, ctx.term)[pp as usize];
                debug_assert_eq!(path.word, ctx.term);
                self.walks[topic as usize].change_count(path, delta);
            }
            None => match &mut self.aux {
                Some(aux) => aux.change_count(ctx, topic, None, delta),
                None => panic!("pathless assignment without auxiliary topics"),
            },
        }
    }

    fn log_likelihood(&self) -> f64 {
        let walks: f64 = self.walks.iter().map(TopicWalk::log_likelihood).sum();
        let aux: f64 = self.aux.as_ref().map_or(0.0, TopicModel::log_likelihood);
        walks + aux
    }

    fn reset_counts(&mut self) {
        for walk in &mut self.walks {
            walk.reset();
        }
        if let Some(aux) = &mut self.aux {
            aux.reset_counts();
        }
    }

    fn set_vocab_scale(&mut self, lambda: f64) {
        if let Some(aux) = &mut self.aux {
            aux.set_vocab_scale(lambda);
        }
    }

    fn set_walk_scales(&mut self, groups: &[WalkPriorGroup]) {
        for walk in &mut self.walks {
            walk.set_prior_scales(groups, &self.node_groups);
        }
    }

    fn assigned_sense(&self, ctx: TokenContext, path: Option<u32>) -> Option<&str> {
        let pp = path?;
        let path = &self.ontology.word_paths(ctx.language, ctx.term)[pp as usize];
        Some(&self.ontology.node(path.terminal()).key)
    }

    fn write_topics(
        &mut self,
        corpus: &Corpus,
        num_terms: usize,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        let ontology = Arc::clone(&self.ontology);
        for (topic, walk) in self.walks.iter_mut().enumerate() {
            let tokens: i64 = (0..ontology.num_languages())
                .map(|l| walk.emission_sum(l))
                .sum();
            writeln!(out, "topic {topic} ({tokens} tokens)")?;
            for language in 0..ontology.num_languages() {
                for (log_prob, term) in walk.ranked_words(&ontology, language, num_terms) {
                    writeln!(
                        out,
                        "\t{}\t{}\t{}",
                        language,
                        corpus.term_string(language, term),
                        log_prob.exp()
                    )?;
                }
            }
            for (log_prob, key) in walk.ranked_transitions(&ontology, num_terms) {
                writeln!(out, "\t-> {key}\t{}", log_prob.exp())?;
            }
        }
        if let Some(aux) = &mut self.aux {
            writeln!(out, "auxiliary topics")?;
            aux.write_topics(corpus, num_terms, out)?;
        }
        Ok(())
    }
}
