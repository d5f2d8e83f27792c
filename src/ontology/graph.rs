//! The concept hierarchy: incremental construction, child linking, and the
//! single finalization traversal that enumerates every word's paths.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::ontology::types::{OntologyNode, Path};

/// Rooted node-labeled graph over word senses.
///
/// Construction is three-phase: add nodes (pruning the useless ones), link
/// children, then [`Ontology::finalize_paths`]. After finalization the graph
/// is immutable.
#[derive(Debug)]
pub struct Ontology {
    nodes: Vec<OntologyNode>,
    key_to_index: FxHashMap<String, u32>,
    root_key: Option<String>,
    /// `word_paths[lang][term]` lists every path emitting that term.
    word_paths: Vec<Vec<Vec<Path>>>,
    max_paths: usize,
    max_depth: usize,
    dropped_links: usize,
    finalized: bool,
}

impl Ontology {
    pub fn new(vocab_sizes: &[usize]) -> Self {
        let word_paths = vocab_sizes
            .iter()
            .map(|&size| vec![Vec::new(); size])
            .collect();
        Ontology {
            nodes: Vec::new(),
            key_to_index: FxHashMap::default(),
            root_key: None,
            word_paths,
            max_paths: 0,
            max_depth: 0,
            dropped_links: 0,
            finalized: false,
        }
    }

    pub fn num_languages(&self) -> usize {
        self.word_paths.len()
    }

    pub fn vocab_size(&self, language: usize) -> usize {
        self.word_paths[language].len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: u32) -> &OntologyNode {
        &self.nodes[index as usize]
    }

    pub fn node_index(&self, key: &str) -> Option<u32> {
        self.key_to_index.get(key).copied()
    }

    pub fn root(&self) -> Option<u32> {
        self.root_key
            .as_deref()
            .and_then(|key| self.node_index(key))
    }

    /// Declares the traversal root. A second, different declaration is a
    /// fatal load error.
    pub fn declare_root(&mut self, key: &str) -> Result<(), EngineError> {
        assert!(!self.finalized);
        match &self.root_key {
            Some(previous) if previous != key => Err(EngineError::ConflictingRoot {
                previous: previous.clone(),
                conflicting: key.to_owned(),
            }),
            _ => {
                self.root_key = Some(key.to_owned());
                Ok(())
            }
        }
    }

    /// Adds a node with its resolved word emissions.
    ///
    /// `words` holds `(language, term_id, raw_count)` triples. A node that
    /// emits nothing and declares no children is pruned (the caller passes
    /// `has_children` from the source record so pruning does not depend on
    /// link order). Returns whether the node was kept.
    pub fn add_node(
        &mut self,
        key: &str,
        hyponym_count: f64,
        hyper_group: &str,
        words: &[(usize, u32, f64)],
        has_children: bool,
    ) -> Result<bool, EngineError> {
        assert!(!self.finalized);
        if self.key_to_index.contains_key(key) {
            return Err(EngineError::DuplicateNode {
                key: key.to_owned(),
            });
        }
        if words.is_empty() && !has_children {
            debug!(key, "pruning wordless, childless node");
            return Ok(false);
        }
        if hyponym_count <= 0.0 {
            return Err(EngineError::OntologyFormat(format!(
                "node {key} has non-positive hyponym count {hyponym_count}"
            )));
        }

        let mut node = OntologyNode::new(
            key.to_owned(),
            hyponym_count,
            hyper_group.to_owned(),
            self.num_languages(),
        );
        for &(language, term, count) in words {
            if count <= 0.0 {
                return Err(EngineError::OntologyFormat(format!(
                    "node {key} emits term {term} with non-positive count {count}"
                )));
            }
            node.words[language].push(term);
            node.emission_prior[language].push(count);
        }

        let index = self.nodes.len() as u32;
        self.key_to_index.insert(key.to_owned(), index);
        self.nodes.push(node);
        Ok(true)
    }

    /// Second pass: attaches children by key. References to pruned or
    /// unknown nodes are dropped and counted.
    pub fn link_children(&mut self, key: &str, children: &[String]) -> Result<(), EngineError> {
        assert!(!self.finalized);
        let parent = self
            .node_index(key)
            .ok_or_else(|| EngineError::OntologyFormat(format!("linking unknown node {key}")))?;
        for child_key in children {
            match self.node_index(child_key) {
                Some(child) => {
                    let node = &mut self.nodes[parent as usize];
                    node.children.push(child);
                    node.transition_prior.push(0.0);
                }
                None => self.dropped_links += 1,
            }
        }
        Ok(())
    }

    pub fn dropped_links(&self) -> usize {
        self.dropped_links
    }

    /// Depth-first traversal from the root that enumerates paths, fills
    /// transition priors from child hyponym counts, and normalizes each
    /// node's priors exactly once on first post-order exit.
    ///
    /// The traversal keeps an explicit frame stack; membership of the live
    /// stack detects cycles, which are fatal.
    pub fn finalize_paths(&mut self) -> Result<(), EngineError> {
        assert!(!self.finalized, "ontology already finalized");
        let root = self.root().ok_or(EngineError::MissingRoot)?;

        // (node, next child slot to expand)
        let mut stack: Vec<(u32, usize)> = Vec::new();
        let mut trail: SmallVec<[u32; 8]> = SmallVec::new();
        let mut choices: SmallVec<[u32; 8]> = SmallVec::new();
        let mut on_stack = vec![false; self.nodes.len()];

        self.enter_node(root, &mut trail, &choices);
        on_stack[root as usize] = true;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (node, slot) = *top;
            if slot < self.nodes[node as usize].children.len() {
                top.1 += 1;
                let child = self.nodes[node as usize].children[slot];
                if on_stack[child as usize] {
                    return Err(EngineError::CycleDetected {
                        key: self.nodes[child as usize].key.clone(),
                    });
                }
                // Revisits of a shared (already finalized) node must not
                // overwrite its normalized prior with raw mass.
                if !self.nodes[node as usize].finalized {
                    let mass = self.nodes[child as usize].hyponym_count;
                    self.nodes[node as usize].transition_prior[slot] = mass;
                }

                choices.push(slot as u32);
                self.enter_node(child, &mut trail, &choices);
                on_stack[child as usize] = true;
                stack.push((child, 0));
            } else {
                if !self.nodes[node as usize].finalized {
                    self.nodes[node as usize].finalize();
                }
                on_stack[node as usize] = false;
                stack.pop();
                trail.pop();
                if !choices.is_empty() {
                    choices.pop();
                }
            }
        }

        self.finalized = true;
        info!(
            nodes = self.nodes.len(),
            max_paths = self.max_paths,
            max_depth = self.max_depth,
            dropped_links = self.dropped_links,
            "finalized ontology"
        );
        Ok(())
    }

    /// Records the visit of `node` at the current trail position and emits
    /// one path per word it carries.
    fn enter_node(&mut self, node: u32, trail: &mut SmallVec<[u32; 8]>, choices: &SmallVec<[u32; 8]>) {
        trail.push(node);
        self.max_depth = self.max_depth.max(trail.len());
        self.nodes[node as usize].num_paths += 1;

        for language in 0..self.word_paths.len() {
            for slot in 0..self.nodes[node as usize].words[language].len() {
                let word = self.nodes[node as usize].words[language][slot];
                let path = Path {
                    nodes: trail.clone(),
                    choices: choices.clone(),
                    language,
                    word,
                    emission_index: slot as u32,
                };
                let paths = &mut self.word_paths[language][word as usize];
                paths.push(path);
                self.max_paths = self.max_paths.max(paths.len());
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Paths emitting `term` in `language`; empty when the word is outside
    /// the hierarchy.
    pub fn word_paths(&self, language: usize, term: u32) -> &[Path] {
        debug_assert!(self.finalized);
        &self.word_paths[language][term as usize]
    }

    /// Widest path set any single word has; bounds the sampling grid.
    pub fn max_paths(&self) -> usize {
        self.max_paths
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // root -> animal -> {canine, swine}; "dog" under canine and directly
    // under animal (two paths), "pig" under swine.
    pub(crate) fn toy_ontology() -> Ontology {
        let mut ont = Ontology::new(&[3]);
        ont.declare_root("root").unwrap();
        ont.add_node("root", 4.0, "", &[], true).unwrap();
        ont.add_node("animal", 3.0, "", &[(0, 0, 1.0)], true)
            .unwrap();
        ont.add_node("canine", 1.0, "", &[(0, 0, 2.0)], false)
            .unwrap();
        ont.add_node("swine", 1.0, "", &[(0, 1, 1.0)], false)
            .unwrap();
        ont.link_children("root", &["animal".into()]).unwrap();
        ont.link_children("animal", &["canine".into(), "swine".into()])
            .unwrap();
        ont.finalize_paths().unwrap();
        ont
    }

    #[test]
    fn enumerates_paths_per_word() {
        let ont = toy_ontology();
        // term 0 ("dog"): emitted at animal (depth 2) and canine (depth 3).
        let dog = ont.word_paths(0, 0);
        assert_eq!(dog.len(), 2);
        assert_eq!(dog[0].nodes.len(), 2);
        assert_eq!(dog[1].nodes.len(), 3);
        assert_eq!(dog[1].choices.as_slice(), &[0, 0]);
        // term 1 ("pig"): one path root->animal->swine via child slot 1.
        let pig = ont.word_paths(0, 1);
        assert_eq!(pig.len(), 1);
        assert_eq!(pig[0].choices.as_slice(), &[0, 1]);
        assert_eq!(pig[0].terminal(), ont.node_index("swine").unwrap());
        // term 2 ("walk") is outside the hierarchy.
        assert!(ont.word_paths(0, 2).is_empty());
        assert_eq!(ont.max_paths(), 2);
        assert_eq!(ont.max_depth(), 3);
    }

    #[test]
    fn transition_priors_follow_hyponym_counts() {
        let ont = toy_ontology();
        let animal = ont.node(ont.node_index("animal").unwrap());
        // Children canine/swine both weigh 1.0 -> uniform.
        assert_eq!(animal.transition_prior(), &[0.5, 0.5]);
        // Animal emits one word (mass 1.0) and transitions (mass 2.0).
        let choice = animal.choice_prior();
        assert!((choice[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((choice[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn node_path_counts_accumulate_per_visit() {
        let ont = toy_ontology();
        assert_eq!(ont.node(ont.node_index("root").unwrap()).num_paths, 1);
        assert_eq!(ont.node(ont.node_index("canine").unwrap()).num_paths, 1);
    }

    #[test]
    fn duplicate_node_is_fatal() {
        let mut ont = Ontology::new(&[1]);
        ont.add_node("x", 1.0, "", &[(0, 0, 1.0)], false).unwrap();
        assert!(matches!(
            ont.add_node("x", 1.0, "", &[(0, 0, 1.0)], false),
            Err(EngineError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn wordless_childless_node_is_pruned_and_links_drop() {
        let mut ont = Ontology::new(&[1]);
        ont.declare_root("root").unwrap();
        assert!(!ont.add_node("empty", 1.0, "", &[], false).unwrap());
        ont.add_node("root", 1.0, "", &[(0, 0, 1.0)], true).unwrap();
        ont.link_children("root", &["empty".into()]).unwrap();
        assert_eq!(ont.dropped_links(), 1);
        ont.finalize_paths().unwrap();
        assert_eq!(ont.word_paths(0, 0).len(), 1);
    }

    #[test]
    fn node_with_only_dropped_children_stays_inert() {
        // "a" survives pruning only because its record declares a child,
        // but that child is itself pruned, so "a" finalizes with no words
        // and no children. Loading must succeed; the dead branch just never
        // emits a path.
        let mut ont = Ontology::new(&[1]);
        ont.declare_root("root").unwrap();
        ont.add_node("root", 1.0, "", &[(0, 0, 1.0)], true).unwrap();
        ont.add_node("a", 1.0, "", &[], true).unwrap();
        assert!(!ont.add_node("b", 1.0, "", &[], false).unwrap());
        ont.link_children("root", &["a".into()]).unwrap();
        ont.link_children("a", &["b".into()]).unwrap();
        ont.finalize_paths().unwrap();

        let a = ont.node(ont.node_index("a").unwrap());
        assert_eq!(a.num_children(), 0);
        assert_eq!(a.choice_prior(), [0.0, 0.0]);
        assert_eq!(ont.word_paths(0, 0).len(), 1);
    }

    #[test]
    fn cycle_is_detected() {
        let mut ont = Ontology::new(&[1]);
        ont.declare_root("a").unwrap();
        ont.add_node("a", 1.0, "", &[(0, 0, 1.0)], true).unwrap();
        ont.add_node("b", 1.0, "", &[(0, 0, 1.0)], true).unwrap();
        ont.link_children("a", &["b".into()]).unwrap();
        ont.link_children("b", &["a".into()]).unwrap();
        assert!(matches!(
            ont.finalize_paths(),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn conflicting_root_is_fatal() {
        let mut ont = Ontology::new(&[1]);
        ont.declare_root("a").unwrap();
        ont.declare_root("a").unwrap();
        assert!(ont.declare_root("b").is_err());
    }

    #[test]
    fn missing_root_is_fatal() {
        let mut ont = Ontology::new(&[1]);
        ont.add_node("a", 1.0, "", &[(0, 0, 1.0)], false).unwrap();
        assert!(matches!(
            ont.finalize_paths(),
            Err(EngineError::MissingRoot)
        ));
    }

    #[test]
    fn shared_node_in_dag_finalizes_once() {
        // Diamond: root -> {a, b} -> shared leaf.
        let mut ont = Ontology::new(&[1]);
        ont.declare_root("root").unwrap();
        ont.add_node("root", 1.0, "", &[], true).unwrap();
        ont.add_node("a", 1.0, "", &[], true).unwrap();
        ont.add_node("b", 2.0, "", &[], true).unwrap();
        ont.add_node("leaf", 1.0, "", &[(0, 0, 1.0)], false).unwrap();
        ont.link_children("root", &["a".into(), "b".into()]).unwrap();
        ont.link_children("a", &["leaf".into()]).unwrap();
        ont.link_children("b", &["leaf".into()]).unwrap();
        ont.finalize_paths().unwrap();

        let leaf = ont.node(ont.node_index("leaf").unwrap());
        assert_eq!(leaf.num_paths, 2);
        // Emission prior normalized exactly once.
        assert_eq!(leaf.emission_prior(0), &[1.0]);
        assert_eq!(ont.word_paths(0, 0).len(), 2);
    }
}
