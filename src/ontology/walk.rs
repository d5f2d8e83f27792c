//! Per-topic distributions over ontology traversals.
//!
//! A `TopicWalk` gives each topic its own posterior over every decision the
//! generative walk makes: which child to descend to (transition), whether to
//! stop and emit (choice), and which of the node's words to emit (emission).
//! Nodes offering no real decision share degenerate fallbacks instead of
//! carrying real distributions.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::config::WalkPriorGroup;
use crate::ontology::types::{Path, EMISSION_CHOICE, TRANSITION_CHOICE};
use crate::ontology::Ontology;
use crate::prob::logspace::log_sum;
use crate::prob::multinomial::{
    DegenerateMultinomial, DenseMultinomial, Posterior, SparseMultinomial,
};

#[derive(Debug)]
pub struct TopicWalk {
    /// Child-selection posterior per node with two or more decisions to make.
    transition: FxHashMap<u32, Posterior>,
    /// Stop-or-descend posterior per node that can do both.
    choice: FxHashMap<u32, Posterior>,
    /// Word-emission posterior per (language, node) with two or more words.
    emission: Vec<FxHashMap<u32, Posterior>>,
    fallback_transition: DegenerateMultinomial,
    fallback_choice: DegenerateMultinomial,
    fallback_emission: Vec<DegenerateMultinomial>,
    /// Partial path sums keyed by nodes reachable along exactly one prefix.
    prefix_cache: FxHashMap<u32, f64>,
    cache_prefixes: bool,
}

impl TopicWalk {
    /// Builds the per-node posteriors.
    ///
    /// `dense` selects dense storage seeded with the informed
    /// (hyponym/corpus-count) priors; the default is sparse storage with a
    /// uniform prior of the same total mass.
    pub fn new(
        ont: &Ontology,
        groups: &[WalkPriorGroup],
        node_groups: &[usize],
        dense: bool,
        cache_prefixes: bool,
    ) -> Self {
        assert!(ont.is_finalized());
        let langs = ont.num_languages();
        let mut walk = TopicWalk {
            transition: FxHashMap::default(),
            choice: FxHashMap::default(),
            emission: vec![FxHashMap::default(); langs],
            fallback_transition: DegenerateMultinomial::new(),
            fallback_choice: DegenerateMultinomial::new(),
            fallback_emission: vec![DegenerateMultinomial::new(); langs],
            prefix_cache: FxHashMap::default(),
            cache_prefixes,
        };

        for index in 0..ont.num_nodes() as u32 {
            let node = ont.node(index);
            if node.num_paths == 0 {
                continue;
            }
            let scales = &groups[node_groups[index as usize]];

            let num_children = node.num_children();
            if num_children > 0 {
                let prior_sum = scales.transition * num_children as f64;
                let dist = if dense {
                    Posterior::Dense(DenseMultinomial::with_prior(
                        node.transition_prior().to_vec(),
                        prior_sum,
                    ))
                } else {
                    Posterior::Sparse(SparseMultinomial::new(num_children, prior_sum))
                };
                walk.transition.insert(index, dist);
            }

            for lang in 0..langs {
                let num_words = node.num_words(lang);
                if num_words > 1 {
                    let prior_sum = scales.emission * num_words as f64;
                    let dist = if dense {
                        Posterior::Dense(DenseMultinomial::with_prior(
                            node.emission_prior(lang).to_vec(),
                            prior_sum,
                        ))
                    } else {
                        Posterior::Sparse(SparseMultinomial::new(num_words, prior_sum))
                    };
                    walk.emission[lang].insert(index, dist);
                }
            }

            if node.total_words() > 0 && num_children > 0 {
                let prior_sum = scales.choice * 2.0;
                let dist = if dense {
                    Posterior::Dense(DenseMultinomial::with_prior(
                        node.choice_prior().to_vec(),
                        prior_sum,
                    ))
                } else {
                    Posterior::Sparse(SparseMultinomial::new(2, prior_sum))
                };
                walk.choice.insert(index, dist);
            }
        }
        walk
    }

    /// ln p(descend through child slot `slot` | at `node`).
    fn transition_log_prob(&self, node: u32, slot: u32) -> f64 {
        let transition = self
            .transition
            .get(&node)
            .map_or(0.0, |d| d.log_probability(slot));
        let keep_going = self
            .choice
            .get(&node)
            .map_or(0.0, |d| d.log_probability(TRANSITION_CHOICE));
        transition + keep_going
    }

    /// ln p(stop at `node` and emit its word at `slot`).
    fn emission_log_prob(&self, node: u32, language: usize, slot: u32) -> f64 {
        let emit = self.emission[language]
            .get(&node)
            .map_or(0.0, |d| d.log_probability(slot));
        let stop = self
            .choice
            .get(&node)
            .map_or(0.0, |d| d.log_probability(EMISSION_CHOICE));
        emit + stop
    }

    /// Log probability of a complete root-to-word path.
    ///
    /// With prefix caching on, partial sums are memoized at nodes reachable
    /// along exactly one prefix (their partial sum is unambiguous) and the
    /// computation resumes from the deepest memoized node on the path.
    pub fn path_log_prob(&mut self, ont: &Ontology, path: &Path) -> f64 {
        let edges = path.num_edges();
        let mut start = 0;
        let mut val = 0.0;
        if self.cache_prefixes {
            for ii in (1..=edges).rev() {
                if let Some(&cached) = self.prefix_cache.get(&path.nodes[ii]) {
                    start = ii;
                    val = cached;
                    break;
                }
            }
        }

        for ii in start..edges {
            val += self.transition_log_prob(path.nodes[ii], path.choices[ii]);
            let next = path.nodes[ii + 1];
            if self.cache_prefixes && ont.node(next).num_paths == 1 {
                self.prefix_cache.insert(next, val);
            }
        }
        val + self.emission_log_prob(path.terminal(), path.language, path.emission_index)
    }

    /// ln p(word) under this topic: log-sum over all of its paths.
    pub fn word_log_prob(&mut self, ont: &Ontology, language: usize, term: u32) -> f64 {
        let paths = ont.word_paths(language, term);
        debug_assert!(!paths.is_empty());
        let mut total = f64::NEG_INFINITY;
        for (ii, path) in paths.iter().enumerate() {
            let p = self.path_log_prob(ont, path);
            total = if ii == 0 { p } else { log_sum(total, p) };
        }
        total
    }

    /// Applies `delta` to every decision along the path. Any count change
    /// invalidates the whole prefix memo.
    pub fn change_count(&mut self, path: &Path, delta: i64) {
        if self.cache_prefixes && !self.prefix_cache.is_empty() {
            self.prefix_cache.clear();
        }
        for ii in 0..path.num_edges() {
            let node = path.nodes[ii];
            match self.transition.get_mut(&node) {
                Some(d) => d.change_count(path.choices[ii], delta),
                None => self.fallback_transition.change_count(path.choices[ii], delta),
            }
            match self.choice.get_mut(&node) {
                Some(d) => d.change_count(TRANSITION_CHOICE, delta),
                None => self.fallback_choice.change_count(TRANSITION_CHOICE, delta),
            }
        }

        let terminal = path.terminal();
        match self.emission[path.language].get_mut(&terminal) {
            Some(d) => d.change_count(path.emission_index, delta),
            None => self.fallback_emission[path.language].change_count(path.emission_index, delta),
        }
        match self.choice.get_mut(&terminal) {
            Some(d) => d.change_count(EMISSION_CHOICE, delta),
            None => self.fallback_choice.change_count(EMISSION_CHOICE, delta),
        }
    }

    /// Rescales every distribution's prior from its node's group.
    pub fn set_prior_scales(&mut self, groups: &[WalkPriorGroup], node_groups: &[usize]) {
        for (&node, dist) in self.transition.iter_mut() {
            dist.set_prior_scale(groups[node_groups[node as usize]].transition);
        }
        for (&node, dist) in self.choice.iter_mut() {
            dist.set_prior_scale(groups[node_groups[node as usize]].choice);
        }
        for per_lang in &mut self.emission {
            for (&node, dist) in per_lang.iter_mut() {
                dist.set_prior_scale(groups[node_groups[node as usize]].emission);
            }
        }
        self.prefix_cache.clear();
        trace!("rescaled walk priors");
    }

    /// Marginal likelihood of all counts in this walk. Nodes are visited in
    /// sorted order so the floating-point sum is reproducible.
    pub fn log_likelihood(&self) -> f64 {
        let mut val = 0.0;
        val += sorted_likelihood(&self.transition);
        val += sorted_likelihood(&self.choice);
        for per_lang in &self.emission {
            val += sorted_likelihood(per_lang);
        }
        val
    }

    pub fn reset(&mut self) {
        for dist in self.transition.values_mut() {
            dist.reset();
        }
        for dist in self.choice.values_mut() {
            dist.reset();
        }
        for per_lang in &mut self.emission {
            for dist in per_lang.values_mut() {
                dist.reset();
            }
        }
        self.fallback_transition.reset();
        self.fallback_choice.reset();
        for fb in &mut self.fallback_emission {
            fb.reset();
        }
        self.prefix_cache.clear();
    }

    /// Tokens emitted in `language` by this topic.
    pub fn emission_sum(&self, language: usize) -> i64 {
        let explicit: i64 = self.emission[language].values().map(Posterior::sum).sum();
        explicit + self.fallback_emission[language].sum()
    }

    /// In-hierarchy terms ranked by probability under this topic.
    pub fn ranked_words(
        &mut self,
        ont: &Ontology,
        language: usize,
        limit: usize,
    ) -> Vec<(f64, u32)> {
        let mut ranked: Vec<(f64, u32)> = (0..ont.vocab_size(language) as u32)
            .filter(|&term| !ont.word_paths(language, term).is_empty())
            .map(|term| (self.word_log_prob(ont, language, term), term))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        ranked.truncate(limit);
        ranked
    }

    /// Most probable first descents from the root.
    pub fn ranked_transitions(&self, ont: &Ontology, limit: usize) -> Vec<(f64, String)> {
        let root = match ont.root() {
            Some(r) => r,
            None => return Vec::new(),
        };
        let dist = match self.transition.get(&root) {
            Some(d) => d,
            None => return Vec::new(),
        };
        dist.ranked_items()
            .into_iter()
            .take(limit)
            .map(|(prob, slot)| {
                let child = ont.node(root).children[slot as usize];
                (prob, ont.node(child).key.clone())
            })
            .collect()
    }
}

fn sorted_likelihood(dists: &FxHashMap<u32, Posterior>) -> f64 {
    let mut keys: Vec<u32> = dists.keys().copied().collect();
    keys.sort_unstable();
    keys.iter().map(|k| dists[k].log_likelihood()).sum()
}
