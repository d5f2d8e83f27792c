//! Shared fixtures: a tiny annotated corpus and the hierarchy over it.

use std::sync::Arc;

use arbor_core::{Corpus, Document, EngineConfig, Ontology};

/// Vocabulary: 0 "dog", 1 "pig", 2 "walk" (outside the hierarchy).
pub fn toy_corpus() -> Arc<Corpus> {
    let mut corpus = Corpus::new(vec![vec!["dog".into(), "pig".into(), "walk".into()]]);
    let canine = corpus.intern_sense("canine");

    let mut d0 = Document::new("d0", 0, vec![0, 0, 0, 2]);
    d0.senses[0] = Some(canine);
    d0.senses[1] = Some(canine);
    corpus.add_document(d0);
    corpus.add_document(Document::new("d1", 0, vec![1, 1, 1, 2]));
    corpus.add_document(Document::new("d2", 0, vec![0, 1, 0]));

    let mut held_out = Document::new("d3", 0, vec![0, 1, 2]);
    held_out.test = true;
    corpus.add_document(held_out);

    Arc::new(corpus)
}

/// root -> animal -> {canine, swine}; "dog" emitted at animal and canine
/// (two paths), "pig" at swine (one path), "walk" has none.
pub fn toy_ontology() -> Arc<Ontology> {
    let mut ont = Ontology::new(&[3]);
    ont.declare_root("root").unwrap();
    ont.add_node("root", 4.0, "", &[], true).unwrap();
    ont.add_node("animal", 3.0, "", &[(0, 0, 1.0)], true).unwrap();
    ont.add_node("canine", 1.0, "", &[(0, 0, 2.0)], false).unwrap();
    ont.add_node("swine", 1.0, "", &[(0, 1, 1.0)], false).unwrap();
    ont.link_children("root", &["animal".into()]).unwrap();
    ont.link_children("animal", &["canine".into(), "swine".into()])
        .unwrap();
    ont.finalize_paths().unwrap();
    Arc::new(ont)
}

pub fn toy_config(prefix: std::path::PathBuf) -> EngineConfig {
    EngineConfig {
        num_topics: 2,
        random_init: true,
        rand_seed: 7,
        save_delay: 10,
        sample_burnin: 2,
        sample_delay: 5,
        output_prefix: prefix,
        ..EngineConfig::default()
    }
}
