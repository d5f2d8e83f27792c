//! Checkpoint/resume reproducibility: a run interrupted at a checkpoint and
//! resumed must retrace the uninterrupted run exactly.

mod common;

use arbor_core::{EngineConfig, Sampler};
use common::{toy_config, toy_corpus, toy_ontology};

fn artifact(sampler: &Sampler, suffix: &str) -> String {
    sampler.artifacts().read_artifact(suffix).unwrap()
}

#[test]
fn resumed_walk_run_matches_uninterrupted_run() {
    let corpus = toy_corpus();
    let ontology = toy_ontology();

    // Uninterrupted: iterations 0..=20, checkpoints at 10 and 20.
    let dir_a = tempfile::tempdir().unwrap();
    let mut full = Sampler::with_ontology(
        toy_config(dir_a.path().join("model")),
        corpus.clone(),
        ontology.clone(),
    )
    .unwrap();
    full.run(20).unwrap();

    // Interrupted: run to 10, drop the sampler, resume, run to 20.
    let dir_b = tempfile::tempdir().unwrap();
    {
        let mut first = Sampler::with_ontology(
            toy_config(dir_b.path().join("model")),
            corpus.clone(),
            ontology.clone(),
        )
        .unwrap();
        first.run(10).unwrap();
    }
    let resumed_config = EngineConfig {
        resume: true,
        ..toy_config(dir_b.path().join("model"))
    };
    let mut resumed =
        Sampler::with_ontology(resumed_config, corpus.clone(), ontology).unwrap();
    assert_eq!(resumed.next_iteration(), 11);
    resumed.run(20).unwrap();

    // Assignment tables and hyperparameters are byte-identical.
    for suffix in ["topic_assignments", "path_assignments", "params", "doc_totals"] {
        assert_eq!(
            artifact(&full, suffix),
            artifact(&resumed, suffix),
            "artifact .{suffix} diverged"
        );
    }

    // Likelihood trajectories match row for row; only the elapsed-time
    // column may differ.
    let trajectory = |text: &str| -> Vec<(String, String)> {
        text.lines()
            .map(|line| {
                let mut fields = line.split('\t');
                (
                    fields.next().unwrap().to_owned(),
                    fields.next().unwrap().to_owned(),
                )
            })
            .collect()
    };
    assert_eq!(
        trajectory(&artifact(&full, "lhood")),
        trajectory(&artifact(&resumed, "lhood"))
    );

    // In-memory state agrees too.
    for doc in 0..corpus.num_documents() {
        for token in 0..corpus.documents[doc].num_tokens() {
            assert_eq!(
                full.state().assignment(doc, token),
                resumed.state().assignment(doc, token)
            );
        }
    }
    assert_eq!(full.alpha(), resumed.alpha());
    assert_eq!(full.lambda(), resumed.lambda());
    assert!(
        (full.state().log_likelihood() - resumed.state().log_likelihood()).abs() < 1e-12
    );
}

#[test]
fn resume_floors_to_the_last_durable_checkpoint() {
    let corpus = toy_corpus();
    let ontology = toy_ontology();
    let dir = tempfile::tempdir().unwrap();
    {
        // Runs past the checkpoint at 10; iterations 11..=17 were never
        // saved.
        let mut first = Sampler::with_ontology(
            toy_config(dir.path().join("model")),
            corpus.clone(),
            ontology.clone(),
        )
        .unwrap();
        first.run(17).unwrap();
    }
    let resumed_config = EngineConfig {
        resume: true,
        ..toy_config(dir.path().join("model"))
    };
    let resumed = Sampler::with_ontology(resumed_config, corpus, ontology).unwrap();
    assert_eq!(resumed.next_iteration(), 11);
}

#[test]
fn resume_without_history_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        resume: true,
        ..toy_config(dir.path().join("model"))
    };
    assert!(Sampler::with_ontology(config, toy_corpus(), toy_ontology()).is_err());
}
