//! Ontology node and path types.

use smallvec::SmallVec;

/// Choice-distribution outcome: stop at this node and emit a word.
pub const EMISSION_CHOICE: u32 = 0;
/// Choice-distribution outcome: keep descending to a child.
pub const TRANSITION_CHOICE: u32 = 1;

/// A node in the concept hierarchy.
///
/// Priors are accumulated during construction and normalized exactly once
/// when [`crate::ontology::Ontology::finalize_paths`] first leaves the node.
#[derive(Debug, Clone)]
pub struct OntologyNode {
    pub key: String,
    /// Hyperparameter group name; empty selects the default group.
    pub hyper_group: String,
    /// Raw mass this node contributes to its parents' transition priors.
    pub hyponym_count: f64,
    /// Child node indices, fixed after linking.
    pub children: Vec<u32>,
    /// Emitted term ids per language.
    pub words: Vec<Vec<u32>>,
    /// Raw emission counts parallel to `words`; normalized per language at
    /// finalization.
    pub(crate) emission_prior: Vec<Vec<f64>>,
    /// Parallel to `children`; filled from child hyponym counts during the
    /// traversal, then normalized.
    pub(crate) transition_prior: Vec<f64>,
    /// [emission mass, transition mass], normalized.
    pub(crate) choice_prior: [f64; 2],
    /// Distinct root-to-here traversals found during finalization.
    pub num_paths: u32,
    pub(crate) finalized: bool,
}

impl OntologyNode {
    pub(crate) fn new(key: String, hyponym_count: f64, hyper_group: String, langs: usize) -> Self {
        OntologyNode {
            key,
            hyper_group,
            hyponym_count,
            children: Vec::new(),
            words: vec![Vec::new(); langs],
            emission_prior: vec![Vec::new(); langs],
            transition_prior: Vec::new(),
            choice_prior: [0.0, 0.0],
            num_paths: 0,
            finalized: false,
        }
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn num_words(&self, language: usize) -> usize {
        self.words[language].len()
    }

    pub fn total_words(&self) -> usize {
        self.words.iter().map(Vec::len).sum()
    }

    /// Normalized transition prior over children.
    pub fn transition_prior(&self) -> &[f64] {
        debug_assert!(self.finalized);
        &self.transition_prior
    }

    /// Normalized emission prior for one language.
    pub fn emission_prior(&self, language: usize) -> &[f64] {
        debug_assert!(self.finalized);
        &self.emission_prior[language]
    }

    /// Normalized [emit, descend] prior.
    pub fn choice_prior(&self) -> [f64; 2] {
        debug_assert!(self.finalized);
        self.choice_prior
    }

    /// Normalizes priors; idempotence is the caller's job (a DAG traversal
    /// leaves a shared node more than once).
    pub(crate) fn finalize(&mut self) {
        debug_assert!(!self.finalized);

        let mut transition_mass = 0.0;
        if !self.children.is_empty() {
            transition_mass = self.transition_prior.iter().sum();
            assert!(
                transition_mass > 0.0,
                "node {} has children but no transition mass",
                self.key
            );
            for val in &mut self.transition_prior {
                *val /= transition_mass;
            }
        }

        let mut emission_mass = 0.0;
        for prior in &mut self.emission_prior {
            let total: f64 = prior.iter().sum();
            if total > 0.0 {
                for val in prior.iter_mut() {
                    *val /= total;
                }
                emission_mass += total;
            }
        }

        let choice_total = emission_mass + transition_mass;
        if choice_total > 0.0 {
            self.choice_prior = [
                emission_mass / choice_total,
                transition_mass / choice_total,
            ];
        }
        // A node kept for declared children that were all dropped at link
        // time has no mass at all; it emits nothing and stays inert.
        self.finalized = true;
    }
}

/// One root-to-terminal traversal ending in a word emission.
///
/// `nodes` holds the visited node indices root-first; `choices[i]` is the
/// child-slot index taken at `nodes[i]`, so `choices` is one shorter than
/// `nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: SmallVec<[u32; 8]>,
    pub choices: SmallVec<[u32; 8]>,
    pub language: usize,
    pub word: u32,
    /// Slot of `word` within the terminal node's per-language word list.
    pub emission_index: u32,
}

impl Path {
    pub fn num_edges(&self) -> usize {
        self.choices.len()
    }

    pub fn terminal(&self) -> u32 {
        *self.nodes.last().expect("path has at least the root")
    }
}
