//! Full training runs over the toy corpus, flat and walk models.

mod common;

use arbor_core::{Sampler, TokenSupport};
use common::{toy_config, toy_corpus, toy_ontology};

#[test]
fn walk_model_trains_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path().join("model"));
    let corpus = toy_corpus();
    let mut sampler =
        Sampler::with_ontology(config, corpus.clone(), toy_ontology()).unwrap();
    sampler.run(20).unwrap();

    let state = sampler.state();
    for doc in 0..corpus.num_documents() {
        let document = &corpus.documents[doc];
        for token in 0..document.num_tokens() {
            let assignment = state.assignment(doc, token);
            if document.test {
                // Held-out documents never keep assignments.
                assert_eq!(assignment, None);
                continue;
            }
            let (topic, path) = assignment.expect("training token assigned");
            assert!((topic as usize) < 2);
            match state.support(doc, token) {
                TokenSupport::Paths(p) => {
                    let path = path.expect("in-hierarchy word carries a path");
                    assert!((path as usize) < p);
                }
                TokenSupport::Flat => assert_eq!(path, None),
                TokenSupport::Unmodeled => panic!("aux topics cover every word here"),
            }
        }
    }

    // Document counts match the assignment tables.
    for doc in 0..corpus.num_documents() {
        let mut hist = vec![0i64; 2];
        for token in 0..corpus.documents[doc].num_tokens() {
            if let Some((topic, _)) = state.assignment(doc, token) {
                hist[topic as usize] += 1;
            }
        }
        for topic in 0..2u32 {
            assert_eq!(state.doc_topic_count(doc, topic), hist[topic as usize]);
        }
    }

    // Every artifact of a checkpointed, annotated, held-out run exists.
    let artifacts = sampler.artifacts();
    for suffix in [
        "topic_assignments",
        "path_assignments",
        "params",
        "lhood",
        "param_hist",
        "topics",
        "doc_totals",
        "doc_id",
        "acc",
    ] {
        assert!(artifacts.exists(suffix), "missing .{suffix}");
    }

    // One lhood line per iteration, all finite.
    let lhood = artifacts.read_artifact("lhood").unwrap();
    let rows: Vec<&str> = lhood.lines().collect();
    assert_eq!(rows.len(), 21);
    let value = |row: &str| -> f64 { row.split('\t').nth(1).unwrap().parse().unwrap() };
    assert!(rows.iter().all(|r| value(r).is_finite()));

    // Accuracy is a proportion.
    let acc = artifacts.read_artifact("acc").unwrap();
    for line in acc.lines() {
        let a: f64 = line.split('\t').nth(1).unwrap().parse().unwrap();
        assert!((0.0..=1.0).contains(&a));
    }

    // Checkpoint lines carry a finite held-out likelihood.
    let checkpoint_row = rows.iter().find(|r| r.starts_with("10\t")).unwrap();
    let test_inc: f64 = checkpoint_row.split('\t').nth(3).unwrap().parse().unwrap();
    assert!(test_inc.is_finite() && test_inc < 0.0);
}

#[test]
fn gibbs_improves_likelihood_under_fixed_priors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = toy_config(dir.path().join("model"));
    // Fixed hyperparameters: the joint likelihood is directly comparable
    // across iterations.
    config.sample_delay = 0;
    let corpus = toy_corpus();
    let mut sampler =
        Sampler::with_ontology(config, corpus, toy_ontology()).unwrap();
    sampler.run(20).unwrap();

    let lhood = sampler.artifacts().read_artifact("lhood").unwrap();
    let values: Vec<f64> = lhood
        .lines()
        .map(|r| r.split('\t').nth(1).unwrap().parse().unwrap())
        .collect();
    let best_later = values[1..].iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(best_later > values[0]);
}

#[test]
fn flat_model_trains() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path().join("model"));
    let corpus = toy_corpus();
    let mut sampler = Sampler::flat(config, corpus.clone()).unwrap();
    sampler.run(12).unwrap();

    let state = sampler.state();
    for doc in 0..corpus.num_documents() {
        if corpus.documents[doc].test {
            continue;
        }
        for token in 0..corpus.documents[doc].num_tokens() {
            let (_, path) = state.assignment(doc, token).unwrap();
            assert_eq!(path, None);
        }
    }
    assert!(sampler.alpha() > 0.0);
    assert!(sampler.state().log_likelihood().is_finite());
}

#[test]
fn unassignable_words_stay_unassigned_without_aux() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = toy_config(dir.path().join("model"));
    config.use_aux_topics = false;
    let corpus = toy_corpus();
    let mut sampler =
        Sampler::with_ontology(config, corpus.clone(), toy_ontology()).unwrap();
    sampler.run(8).unwrap();

    let state = sampler.state();
    for doc in 0..corpus.num_documents() {
        if corpus.documents[doc].test {
            continue;
        }
        for token in 0..corpus.documents[doc].num_tokens() {
            // Term 2 ("walk") has no paths and no fallback.
            if corpus.documents[doc].term(token) == 2 {
                assert_eq!(state.assignment(doc, token), None);
            } else {
                assert!(state.assignment(doc, token).is_some());
            }
        }
    }
}
