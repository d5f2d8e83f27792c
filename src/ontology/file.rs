//! On-disk ontology format and loader.
//!
//! JSON, one file or several (a hierarchy file plus word-attachment files
//! is a common split). Term strings are resolved against the corpus
//! vocabulary at load time; terms outside the vocabulary are dropped with a
//! count.

use std::fs;
use std::path::Path as FsPath;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::corpus::Corpus;
use crate::error::EngineError;
use crate::ontology::Ontology;

#[derive(Debug, Serialize, Deserialize)]
pub struct OntologyFile {
    /// Traversal root; exactly one file in a set must declare it.
    #[serde(default)]
    pub root: Option<String>,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub key: String,
    #[serde(default = "default_hyponym_count")]
    pub hyponym_count: f64,
    /// Hyperparameter group name; empty selects the default group.
    #[serde(default)]
    pub hyperparameter: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub words: Vec<WordSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WordSpec {
    #[serde(default)]
    pub lang: usize,
    pub term: String,
    #[serde(default = "default_word_count")]
    pub count: f64,
}

fn default_hyponym_count() -> f64 {
    1.0
}

fn default_word_count() -> f64 {
    1.0
}

impl OntologyFile {
    pub fn from_file(path: &FsPath) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::OntologyFormat(format!("{}: {e}", path.display())))
    }
}

/// Loads and finalizes an ontology from one or more files.
pub fn load_ontology<P: AsRef<FsPath>>(
    paths: &[P],
    corpus: &Corpus,
) -> Result<Ontology, EngineError> {
    let files: Vec<OntologyFile> = paths
        .iter()
        .map(|p| OntologyFile::from_file(p.as_ref()))
        .collect::<Result<_, _>>()?;
    build_ontology(&files, corpus)
}

/// Same as [`load_ontology`] but from already-parsed files.
pub fn build_ontology(files: &[OntologyFile], corpus: &Corpus) -> Result<Ontology, EngineError> {
    let vocab_sizes: Vec<usize> = (0..corpus.num_languages())
        .map(|l| corpus.vocab_size(l))
        .collect();
    let lookup: Vec<FxHashMap<String, u32>> = corpus.vocab_lookup();

    let mut ont = Ontology::new(&vocab_sizes);
    let mut unknown_terms = 0usize;
    let mut pruned = 0usize;

    for file in files {
        if let Some(root) = &file.root {
            ont.declare_root(root)?;
        }
        for spec in &file.nodes {
            let mut words = Vec::with_capacity(spec.words.len());
            for word in &spec.words {
                if word.lang >= lookup.len() {
                    return Err(EngineError::OntologyFormat(format!(
                        "node {} references unknown language {}",
                        spec.key, word.lang
                    )));
                }
                match lookup[word.lang].get(&word.term) {
                    Some(&term) => words.push((word.lang, term, word.count)),
                    None => {
                        unknown_terms += 1;
                        debug!(node = %spec.key, term = %word.term, "dropping out-of-vocabulary term");
                    }
                }
            }
            let kept = ont.add_node(
                &spec.key,
                spec.hyponym_count,
                &spec.hyperparameter,
                &words,
                !spec.children.is_empty(),
            )?;
            if !kept {
                pruned += 1;
            }
        }
    }

    for file in files {
        for spec in &file.nodes {
            if ont.node_index(&spec.key).is_some() {
                ont.link_children(&spec.key, &spec.children)?;
            }
        }
    }

    ont.finalize_paths()?;
    info!(
        nodes = ont.num_nodes(),
        pruned,
        unknown_terms,
        dropped_links = ont.dropped_links(),
        "loaded ontology"
    );
    Ok(ont)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use std::io::Write;

    fn corpus() -> Corpus {
        Corpus::new(vec![vec!["dog".into(), "pig".into()]])
    }

    fn toy_json() -> &'static str {
        r#"{
            "root": "root",
            "nodes": [
                {"key": "root", "hyponym_count": 2.0, "children": ["animal"]},
                {"key": "animal", "children": ["canine", "swine"]},
                {"key": "canine", "words": [{"term": "dog", "count": 2.0}]},
                {"key": "swine", "words": [{"term": "pig"}]}
            ]
        }"#
    }

    #[test]
    fn loads_and_finalizes() {
        let files = vec![serde_json::from_str::<OntologyFile>(toy_json()).unwrap()];
        let ont = build_ontology(&files, &corpus()).unwrap();
        assert!(ont.is_finalized());
        assert_eq!(ont.word_paths(0, 0).len(), 1);
        assert_eq!(ont.word_paths(0, 1).len(), 1);
        // Default hyponym/word counts kick in.
        let swine = ont.node(ont.node_index("swine").unwrap());
        assert_eq!(swine.hyponym_count, 1.0);
    }

    #[test]
    fn out_of_vocabulary_words_are_dropped() {
        let json = r#"{
            "root": "root",
            "nodes": [
                {"key": "root", "children": ["leaf"]},
                {"key": "leaf", "words": [
                    {"term": "dog"}, {"term": "unicorn"}
                ]}
            ]
        }"#;
        let files = vec![serde_json::from_str::<OntologyFile>(json).unwrap()];
        let ont = build_ontology(&files, &corpus()).unwrap();
        let leaf = ont.node(ont.node_index("leaf").unwrap());
        assert_eq!(leaf.num_words(0), 1);
    }

    #[test]
    fn multi_file_load_merges() {
        let hierarchy = r#"{"root": "root", "nodes": [
            {"key": "root", "children": ["a"]}
        ]}"#;
        let attachments = r#"{"nodes": [
            {"key": "a", "words": [{"term": "pig"}]}
        ]}"#;
        let mut f1 = tempfile::NamedTempFile::new().unwrap();
        f1.write_all(hierarchy.as_bytes()).unwrap();
        let mut f2 = tempfile::NamedTempFile::new().unwrap();
        f2.write_all(attachments.as_bytes()).unwrap();
        let ont = load_ontology(&[f1.path(), f2.path()], &corpus()).unwrap();
        assert_eq!(ont.word_paths(0, 1).len(), 1);
    }

    #[test]
    fn zero_count_word_is_a_format_error() {
        let json = r#"{"root": "r", "nodes": [
            {"key": "r", "words": [{"term": "dog", "count": 0.0}]}
        ]}"#;
        let files = vec![serde_json::from_str::<OntologyFile>(json).unwrap()];
        assert!(build_ontology(&files, &corpus()).is_err());
    }
}
