//! Engine configuration.
//!
//! A single immutable [`EngineConfig`] is built up front and handed to the
//! sampler; nothing reads configuration from globals.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Hyperparameter group for the topic-walk distributions.
///
/// Every ontology node names a group (or falls into the default group at
/// index 0); the group carries the prior scale for the node's transition,
/// emission, and choice distributions. Slice sampling moves these three
/// values jointly per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkPriorGroup {
    pub name: String,
    pub transition: f64,
    pub emission: f64,
    pub choice: f64,
}

impl WalkPriorGroup {
    pub fn new(name: impl Into<String>, transition: f64, emission: f64, choice: f64) -> Self {
        WalkPriorGroup {
            name: name.into(),
            transition,
            emission,
            choice,
        }
    }

    /// Parses a whitespace-delimited group file: a count line followed by
    /// `name transition emission choice` lines.
    pub fn load_file(path: &Path) -> Result<Vec<WalkPriorGroup>, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let mut tokens = text.split_whitespace();
        let count: usize = tokens
            .next()
            .ok_or_else(|| EngineError::HyperparameterFormat("empty group file".into()))?
            .parse()
            .map_err(|e| EngineError::HyperparameterFormat(format!("bad group count: {e}")))?;

        let mut groups = Vec::with_capacity(count);
        for _ in 0..count {
            let name = tokens
                .next()
                .ok_or_else(|| EngineError::HyperparameterFormat("truncated group file".into()))?
                .to_owned();
            let mut field = || -> Result<f64, EngineError> {
                tokens
                    .next()
                    .ok_or_else(|| {
                        EngineError::HyperparameterFormat(format!("group {name} truncated"))
                    })?
                    .parse()
                    .map_err(|e| {
                        EngineError::HyperparameterFormat(format!("group {name}: {e}"))
                    })
            };
            let transition = field()?;
            let emission = field()?;
            let choice = field()?;
            groups.push(WalkPriorGroup {
                name,
                transition,
                emission,
                choice,
            });
        }
        Ok(groups)
    }
}

impl Default for WalkPriorGroup {
    fn default() -> Self {
        WalkPriorGroup::new("default", 1.0, 1.0, 1.0)
    }
}

/// Full sampler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of topics K.
    pub num_topics: usize,
    /// Document-topic Dirichlet concentration (per-item scale).
    pub alpha: f64,
    /// Relative prior mass of topic 0 within each document distribution.
    /// 1.0 keeps the prior uniform; anything else biases topic 0.
    pub alpha_zero: f64,
    /// Topic-vocabulary Dirichlet concentration for flat and auxiliary
    /// topics.
    pub lambda: f64,
    /// Prior scales for topic-walk distributions, one entry per named
    /// hyperparameter group. Index 0 is the default group.
    pub walk_priors: Vec<WalkPriorGroup>,
    /// Give words without ontology paths a flat auxiliary topic instead of
    /// leaving them permanently unassigned.
    pub use_aux_topics: bool,
    /// Store topic-walk node distributions densely with the informed
    /// (hyponym-derived) priors instead of sparsely with uniform priors.
    pub dense_walk_distributions: bool,
    /// Memoize shared path prefixes inside each topic walk.
    pub cache_path_prefixes: bool,
    /// Assign random topics/paths before the first iteration instead of
    /// starting everything unassigned.
    pub random_init: bool,
    /// Resume from the artifacts already present under `output_prefix`.
    pub resume: bool,
    /// Base RNG seed; iteration `i` runs on `rand_seed + i`.
    pub rand_seed: u64,
    /// Rayon thread count for the conditional fan-out; 0 uses the global
    /// pool.
    pub num_threads: usize,
    /// Prefix (directory + stem) for all persisted artifacts.
    pub output_prefix: PathBuf,
    /// Checkpoint every this many iterations.
    pub save_delay: u32,
    /// Iterations before hyperparameter sampling starts.
    pub sample_burnin: u32,
    /// Sample hyperparameters every this many iterations after burn-in.
    pub sample_delay: u32,
    /// Slice-sampling repetitions per sampling event.
    pub sample_reps: u32,
    /// Initial slice bracket width (in log space).
    pub sample_step: f64,
    /// Bound on slice shrink steps before reverting to the current value.
    pub max_slice_shrinks: u32,
    /// Terms written per topic in the `.topics` report.
    pub num_topic_terms: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_topics: 8,
            alpha: 0.1,
            alpha_zero: 1.0,
            lambda: 0.01,
            walk_priors: vec![WalkPriorGroup::default()],
            use_aux_topics: true,
            dense_walk_distributions: false,
            cache_path_prefixes: false,
            random_init: false,
            resume: false,
            rand_seed: 0,
            num_threads: 0,
            output_prefix: PathBuf::from("output/model"),
            save_delay: 25,
            sample_burnin: 100,
            sample_delay: 20,
            sample_reps: 5,
            sample_step: 1.0,
            max_slice_shrinks: 1000,
            num_topic_terms: 15,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::HyperparameterFormat(format!("config parse: {e}")))
    }

    /// Index of a named group, falling back to the default group.
    pub fn group_index(&self, name: &str) -> usize {
        self.walk_priors
            .iter()
            .position(|g| g.name == name)
            .unwrap_or(0)
    }
}
