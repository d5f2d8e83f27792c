//! The sampler loop: per-token collapsed Gibbs updates, periodic
//! hyperparameter slice sampling, checkpointing, and held-out scoring.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::{EngineConfig, WalkPriorGroup};
use crate::corpus::Corpus;
use crate::error::EngineError;
use crate::ontology::Ontology;
use crate::prob::logspace::{log_sum_slice, log_vector_sample};
use crate::report::Artifacts;
use crate::sampler::slice::slice_sample;
use crate::state::{FlatModel, SamplingState, TokenSupport, WalkModel};

pub struct Sampler {
    config: EngineConfig,
    corpus: Arc<Corpus>,
    state: SamplingState,
    artifacts: Artifacts,
    /// Live hyperparameters; the config holds only the starting values.
    alpha: f64,
    lambda: f64,
    groups: Vec<WalkPriorGroup>,
    /// Walk group scales only enter the sampled vector when walks exist.
    has_walks: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
    /// Scratch conditional, sized to the widest grid seen.
    temp: Vec<f64>,
    /// First iteration `run` will execute (0 fresh, checkpoint + 1 resumed).
    start_iteration: u32,
}

impl Sampler {
    /// Flat topic model over the corpus vocabulary.
    pub fn flat(config: EngineConfig, corpus: Arc<Corpus>) -> Result<Self, EngineError> {
        let vocab_sizes = vocab_sizes(&corpus);
        let model = Box::new(FlatModel::new(
            config.num_topics,
            &vocab_sizes,
            config.lambda,
        ));
        Sampler::new(config, corpus, model, false)
    }

    /// Ontology-constrained model: one topic walk per topic.
    pub fn with_ontology(
        config: EngineConfig,
        corpus: Arc<Corpus>,
        ontology: Arc<Ontology>,
    ) -> Result<Self, EngineError> {
        assert_eq!(ontology.num_languages(), corpus.num_languages());
        let vocab_sizes = vocab_sizes(&corpus);
        let model = Box::new(WalkModel::new(&config, ontology, &vocab_sizes));
        Sampler::new(config, corpus, model, true)
    }

    fn new(
        config: EngineConfig,
        corpus: Arc<Corpus>,
        model: Box<dyn crate::state::TopicModel>,
        has_walks: bool,
    ) -> Result<Self, EngineError> {
        let artifacts = Artifacts::new(config.output_prefix.clone())?;
        let state = SamplingState::new(&config, Arc::clone(&corpus), model);
        let pool = if config.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build()
                .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        let mut sampler = Sampler {
            alpha: config.alpha,
            lambda: config.lambda,
            groups: config.walk_priors.clone(),
            has_walks,
            pool,
            temp: Vec::new(),
            start_iteration: 0,
            config,
            corpus,
            state,
            artifacts,
        };

        if sampler.config.resume {
            sampler.resume()?;
        } else {
            if sampler.config.random_init {
                let mut rng = SmallRng::seed_from_u64(sampler.config.rand_seed);
                sampler.state.random_init(&mut rng);
            }
            sampler.artifacts.write_doc_ids(&sampler.corpus)?;
            sampler
                .artifacts
                .write_param_history_header(&sampler.param_names())?;
            sampler
                .artifacts
                .append_param_history(0, &sampler.param_values())?;
        }
        Ok(sampler)
    }

    /// Rebuilds state from the persisted artifacts: replays assignments
    /// (counts are derived, never loaded) and restores hyperparameters.
    fn resume(&mut self) -> Result<(), EngineError> {
        let checkpoint = self
            .artifacts
            .last_checkpoint_iteration(self.config.save_delay)?
            .ok_or_else(|| {
                EngineError::ResumeMismatch("no likelihood history to resume from".into())
            })?;
        self.artifacts.read_assignments(&mut self.state)?;

        for (name, value) in self.artifacts.read_params()? {
            self.set_param(&name, value)?;
        }
        self.state.set_alpha(self.alpha);
        self.state.set_lambda(self.lambda);
        if self.has_walks {
            self.state.set_walk_scales(&self.groups);
        }

        self.start_iteration = checkpoint + 1;
        info!(checkpoint, "resumed from persisted state");
        Ok(())
    }

    fn set_param(&mut self, name: &str, value: f64) -> Result<(), EngineError> {
        if name == "alpha" {
            self.alpha = value;
            return Ok(());
        }
        if name == "lambda" {
            self.lambda = value;
            return Ok(());
        }
        if let Some((group, kind)) = name.rsplit_once(':') {
            if let Some(entry) = self.groups.iter_mut().find(|g| g.name == group) {
                match kind {
                    "transition" => entry.transition = value,
                    "emission" => entry.emission = value,
                    "choice" => entry.choice = value,
                    _ => {
                        return Err(EngineError::HyperparameterFormat(format!(
                            "unknown hyperparameter {name}"
                        )))
                    }
                }
                return Ok(());
            }
        }
        Err(EngineError::HyperparameterFormat(format!(
            "unknown hyperparameter {name}"
        )))
    }

    /// Runs iterations up to and including `num_iterations`.
    pub fn run(&mut self, num_iterations: u32) -> Result<(), EngineError> {
        let run_start = Instant::now();
        let has_test = self.corpus.documents.iter().any(|d| d.test);
        let has_annotations = self.corpus.has_annotations();

        for ii in self.start_iteration..=num_iterations {
            // Every iteration runs on its own deterministic stream, so a
            // resumed run retraces the original trajectory exactly.
            let mut rng =
                SmallRng::seed_from_u64(self.config.rand_seed.wrapping_add(u64::from(ii)));

            if self.config.sample_delay > 0
                && ii > self.config.sample_burnin
                && ii % self.config.sample_delay == 0
            {
                self.sample_hyperparameters(ii, &mut rng)?;
            }

            let assigned = self.sample_corpus(&mut rng);
            let lhood = self.state.log_likelihood();

            let mut train_inc = None;
            let mut test_inc = None;
            let mut accuracy = None;
            if self.config.save_delay > 0 && ii > 0 && ii % self.config.save_delay == 0 {
                train_inc = Some(self.train_likelihood_increment());
                if has_test {
                    test_inc = Some(self.test_likelihood(&mut rng));
                }
                if has_annotations {
                    let acc = self.disambiguation_accuracy();
                    self.artifacts.append_accuracy(ii, acc)?;
                    accuracy = Some(acc);
                }
                self.write_checkpoint()?;
            }

            self.artifacts.append_lhood(
                ii,
                lhood,
                train_inc,
                test_inc,
                accuracy,
                run_start.elapsed().as_secs_f64(),
            )?;
            info!(iteration = ii, lhood, assigned, "iteration complete");
        }

        self.start_iteration = num_iterations + 1;
        Ok(())
    }

    fn sample_corpus(&mut self, rng: &mut SmallRng) -> usize {
        match self.pool.clone() {
            Some(pool) => pool.install(|| self.sample_corpus_inner(rng)),
            None => self.sample_corpus_inner(rng),
        }
    }

    fn sample_corpus_inner(&mut self, rng: &mut SmallRng) -> usize {
        let mut assigned = 0;
        let mut empty_docs = 0;
        for doc in 0..self.corpus.num_documents() {
            if self.corpus.documents[doc].test {
                continue;
            }
            let tokens = self.corpus.documents[doc].num_tokens();
            let mut any = false;
            for token in 0..tokens {
                if self.sample_token(doc, token, rng) {
                    any = true;
                    assigned += 1;
                }
            }
            if tokens > 0 && !any {
                empty_docs += 1;
            }
        }
        if empty_docs > 0 {
            warn!(empty_docs, "documents with no assignable tokens");
        }
        assigned
    }

    /// One collapsed Gibbs step: decrement, full conditional, categorical
    /// draw, increment. Returns whether the token ended up assigned.
    fn sample_token(&mut self, doc: usize, token: usize, rng: &mut SmallRng) -> bool {
        let support = self.state.support(doc, token);
        self.state.assign(doc, token, None);
        match support {
            TokenSupport::Unmodeled => false,
            TokenSupport::Flat => {
                self.state.fill_conditional(doc, token, &mut self.temp);
                let topic = log_vector_sample(&self.temp, rng) as u32;
                self.state.assign(doc, token, Some((topic, None)));
                true
            }
            TokenSupport::Paths(paths) => {
                self.state.fill_conditional(doc, token, &mut self.temp);
                let flat_index = log_vector_sample(&self.temp, rng);
                let topic = (flat_index / paths) as u32;
                let path = (flat_index % paths) as u32;
                self.state.assign(doc, token, Some((topic, Some(path))));
                true
            }
        }
    }

    /// Prequential training likelihood: clears all counts, then replays
    /// every assignment, scoring each against the counts so far. Counts are
    /// exactly rebuilt on return.
    fn train_likelihood_increment(&mut self) -> f64 {
        self.state.reset_counts();
        self.state.prequential_replay()
    }

    /// Left-to-right held-out likelihood: walks each test document once,
    /// scoring every token's predictive probability given the earlier
    /// tokens' sampled assignments, then clears the document again.
    fn test_likelihood(&mut self, rng: &mut SmallRng) -> f64 {
        let mut total = 0.0;
        for doc in 0..self.corpus.num_documents() {
            if !self.corpus.documents[doc].test {
                continue;
            }
            for token in 0..self.corpus.documents[doc].num_tokens() {
                let support = self.state.support(doc, token);
                if support == TokenSupport::Unmodeled {
                    continue;
                }
                self.state.fill_predictive(doc, token, &mut self.temp);
                total += log_sum_slice(&self.temp);
                let flat_index = log_vector_sample(&self.temp, rng);
                let assignment = match support {
                    TokenSupport::Flat => (flat_index as u32, None),
                    TokenSupport::Paths(paths) => {
                        ((flat_index / paths) as u32, Some((flat_index % paths) as u32))
                    }
                    TokenSupport::Unmodeled => unreachable!(),
                };
                self.state.assign(doc, token, Some(assignment));
            }
            self.state.clear_document(doc);
        }
        total
    }

    /// Fraction of annotated training tokens whose assigned path terminates
    /// at the gold sense. Annotated tokens without a resolved sense count as
    /// wrong.
    fn disambiguation_accuracy(&self) -> f64 {
        let mut total = 0u64;
        let mut correct = 0u64;
        for doc in 0..self.corpus.num_documents() {
            let document = &self.corpus.documents[doc];
            if document.test {
                continue;
            }
            for token in 0..document.num_tokens() {
                let gold = match document.sense(token) {
                    Some(g) => g,
                    None => continue,
                };
                total += 1;
                if let Some(predicted) = self.state.assigned_sense(doc, token) {
                    if predicted == self.corpus.sense_key(gold) {
                        correct += 1;
                    }
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }

    fn write_checkpoint(&mut self) -> Result<(), EngineError> {
        self.artifacts.write_assignments(&self.state)?;
        self.artifacts
            .write_params(&self.param_names(), &self.param_values())?;
        self.artifacts.write_doc_totals(&self.state)?;
        self.artifacts
            .write_topics(&mut self.state, self.config.num_topic_terms)?;
        Ok(())
    }

    fn sample_hyperparameters(
        &mut self,
        iteration: u32,
        rng: &mut SmallRng,
    ) -> Result<(), EngineError> {
        let step = self.config.sample_step;
        let reps = self.config.sample_reps;
        let max_shrinks = self.config.max_slice_shrinks;

        let mut vals = self.log_params();
        slice_sample(&mut vals, step, reps, max_shrinks, rng, |p| {
            self.apply_log_params(p);
            self.state.log_likelihood()
        });
        self.apply_log_params(&vals);

        self.artifacts
            .append_param_history(iteration, &self.param_values())?;
        info!(
            iteration,
            alpha = self.alpha,
            lambda = self.lambda,
            "sampled hyperparameters"
        );
        Ok(())
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = vec!["alpha".to_owned(), "lambda".to_owned()];
        if self.has_walks {
            for group in &self.groups {
                names.push(format!("{}:transition", group.name));
                names.push(format!("{}:emission", group.name));
                names.push(format!("{}:choice", group.name));
            }
        }
        names
    }

    fn param_values(&self) -> Vec<f64> {
        let mut values = vec![self.alpha, self.lambda];
        if self.has_walks {
            for group in &self.groups {
                values.push(group.transition);
                values.push(group.emission);
                values.push(group.choice);
            }
        }
        values
    }

    fn log_params(&self) -> Vec<f64> {
        self.param_values().iter().map(|v| v.ln()).collect()
    }

    fn apply_log_params(&mut self, vals: &[f64]) {
        self.alpha = vals[0].exp();
        self.lambda = vals[1].exp();
        self.state.set_alpha(self.alpha);
        self.state.set_lambda(self.lambda);
        if self.has_walks {
            for (group, chunk) in self.groups.iter_mut().zip(vals[2..].chunks_exact(3)) {
                group.transition = chunk[0].exp();
                group.emission = chunk[1].exp();
                group.choice = chunk[2].exp();
            }
            self.state.set_walk_scales(&self.groups);
        }
    }

    pub fn state(&self) -> &SamplingState {
        &self.state
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn next_iteration(&self) -> u32 {
        self.start_iteration
    }
}

fn vocab_sizes(corpus: &Corpus) -> Vec<usize> {
    (0..corpus.num_languages())
        .map(|l| corpus.vocab_size(l))
        .collect()
}
