//! Persisted run artifacts, all keyed off one output prefix.
//!
//! Assignment files are the source of truth for resume: counts are never
//! deserialized, they are rebuilt by replaying the assignment tables through
//! the state, so a resumed run can never start from inconsistent counts.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use tracing::info;

use crate::corpus::Corpus;
use crate::error::EngineError;
use crate::state::SamplingState;

/// Sentinel for "unassigned" in the assignment files. Internally the engine
/// uses `Option`; the on-disk format keeps the compact form.
const UNASSIGNED: i64 = -1;

#[derive(Debug, Clone)]
pub struct Artifacts {
    prefix: PathBuf,
}

impl Artifacts {
    pub fn new(prefix: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let prefix = prefix.into();
        if let Some(parent) = prefix.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
        }
        Ok(Artifacts { prefix })
    }

    fn path(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    fn create(&self, suffix: &str) -> Result<BufWriter<File>, EngineError> {
        let path = self.path(suffix);
        let file = File::create(&path).map_err(|e| EngineError::io(&path, e))?;
        Ok(BufWriter::new(file))
    }

    fn append(&self, suffix: &str) -> Result<BufWriter<File>, EngineError> {
        let path = self.path(suffix);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;
        Ok(BufWriter::new(file))
    }

    /// Writes `.topic_assignments` and `.path_assignments`: one line per
    /// document, `num_tokens` then one value per token.
    pub fn write_assignments(&self, state: &SamplingState) -> Result<(), EngineError> {
        let mut topics = self.create("topic_assignments")?;
        let mut paths = self.create("path_assignments")?;
        for doc in 0..state.corpus().num_documents() {
            let tokens = state.corpus().documents[doc].num_tokens();
            write!(topics, "{tokens}").map_err(|e| EngineError::io(self.path("topic_assignments"), e))?;
            write!(paths, "{tokens}").map_err(|e| EngineError::io(self.path("path_assignments"), e))?;
            for token in 0..tokens {
                let (topic, path) = match state.assignment(doc, token) {
                    Some((t, p)) => (t as i64, p.map_or(UNASSIGNED, |p| p as i64)),
                    None => (UNASSIGNED, UNASSIGNED),
                };
                write!(topics, " {topic}").map_err(|e| EngineError::io(self.path("topic_assignments"), e))?;
                write!(paths, " {path}").map_err(|e| EngineError::io(self.path("path_assignments"), e))?;
            }
            writeln!(topics).map_err(|e| EngineError::io(self.path("topic_assignments"), e))?;
            writeln!(paths).map_err(|e| EngineError::io(self.path("path_assignments"), e))?;
        }
        Ok(())
    }

    /// Replays the persisted assignments through the state. The state must
    /// hold no assignments yet.
    pub fn read_assignments(&self, state: &mut SamplingState) -> Result<(), EngineError> {
        let topics = self.read_assignment_file("topic_assignments")?;
        let paths = self.read_assignment_file("path_assignments")?;
        if topics.len() != state.corpus().num_documents() || paths.len() != topics.len() {
            return Err(EngineError::ResumeMismatch(format!(
                "assignment files cover {} documents, corpus has {}",
                topics.len(),
                state.corpus().num_documents()
            )));
        }

        for (doc, (topic_row, path_row)) in topics.iter().zip(&paths).enumerate() {
            let tokens = state.corpus().documents[doc].num_tokens();
            if topic_row.len() != tokens || path_row.len() != tokens {
                return Err(EngineError::ResumeMismatch(format!(
                    "document {doc} has {tokens} tokens, file has {}",
                    topic_row.len()
                )));
            }
            for token in 0..tokens {
                let assignment = match (topic_row[token], path_row[token]) {
                    (UNASSIGNED, UNASSIGNED) => None,
                    (UNASSIGNED, _) => {
                        return Err(EngineError::ResumeMismatch(format!(
                            "document {doc} token {token} has a path but no topic"
                        )))
                    }
                    (t, p) if t >= 0 => {
                        let path = if p == UNASSIGNED { None } else { Some(p as u32) };
                        Some((t as u32, path))
                    }
                    (t, _) => {
                        return Err(EngineError::ResumeMismatch(format!(
                            "document {doc} token {token} has invalid topic {t}"
                        )))
                    }
                };
                state.assign(doc, token, assignment);
            }
        }
        info!(documents = topics.len(), "replayed persisted assignments");
        Ok(())
    }

    fn read_assignment_file(&self, suffix: &str) -> Result<Vec<Vec<i64>>, EngineError> {
        let path = self.path(suffix);
        let file = File::open(&path).map_err(|e| EngineError::io(&path, e))?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EngineError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let count: usize = fields
                .next()
                .ok_or_else(|| {
                    EngineError::ResumeMismatch(format!("{}: blank row", path.display()))
                })?
                .parse()
                .map_err(|e| EngineError::ResumeMismatch(format!("{}: {e}", path.display())))?;
            let values: Vec<i64> = fields
                .map(|f| f.parse())
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::ResumeMismatch(format!("{}: {e}", path.display())))?;
            if values.len() != count {
                return Err(EngineError::ResumeMismatch(format!(
                    "{}: row declares {count} values, has {}",
                    path.display(),
                    values.len()
                )));
            }
            rows.push(values);
        }
        Ok(rows)
    }

    /// `.params`: one `name value` line per hyperparameter, full round-trip
    /// precision.
    pub fn write_params(&self, names: &[String], values: &[f64]) -> Result<(), EngineError> {
        assert_eq!(names.len(), values.len());
        let mut out = self.create("params")?;
        for (name, value) in names.iter().zip(values) {
            writeln!(out, "{name}\t{value}").map_err(|e| EngineError::io(self.path("params"), e))?;
        }
        Ok(())
    }

    pub fn read_params(&self) -> Result<Vec<(String, f64)>, EngineError> {
        let path = self.path("params");
        let file = File::open(&path).map_err(|e| EngineError::io(&path, e))?;
        let mut params = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EngineError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let name = fields
                .next()
                .ok_or_else(|| EngineError::HyperparameterFormat("empty params line".into()))?;
            let value: f64 = fields
                .next()
                .ok_or_else(|| {
                    EngineError::HyperparameterFormat(format!("param {name} has no value"))
                })?
                .parse()
                .map_err(|e| EngineError::HyperparameterFormat(format!("param {name}: {e}")))?;
            params.push((name.to_owned(), value));
        }
        Ok(params)
    }

    /// Appends one `.lhood` line:
    /// `iteration lhood train_inc test_inc accuracy elapsed_secs`, with
    /// `nan` holding the place of increments not computed this iteration.
    pub fn append_lhood(
        &self,
        iteration: u32,
        lhood: f64,
        train_inc: Option<f64>,
        test_inc: Option<f64>,
        accuracy: Option<f64>,
        elapsed_secs: f64,
    ) -> Result<(), EngineError> {
        let mut out = self.append("lhood")?;
        writeln!(
            out,
            "{iteration}\t{lhood}\t{}\t{}\t{}\t{elapsed_secs}",
            train_inc.unwrap_or(f64::NAN),
            test_inc.unwrap_or(f64::NAN),
            accuracy.unwrap_or(f64::NAN),
        )
        .map_err(|e| EngineError::io(self.path("lhood"), e))
    }

    /// Last iteration with a durable checkpoint: the final `.lhood` entry
    /// floored to a multiple of `save_delay` (later iterations ran but were
    /// never saved).
    pub fn last_checkpoint_iteration(&self, save_delay: u32) -> Result<Option<u32>, EngineError> {
        if save_delay == 0 {
            return Err(EngineError::ResumeMismatch(
                "resume requires a positive save_delay; nothing was ever checkpointed".into(),
            ));
        }
        let path = self.path("lhood");
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::io(&path, e)),
        };
        let mut last = None;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EngineError::io(&path, e))?;
            if let Some(field) = line.split_whitespace().next() {
                let iter: u32 = field.parse().map_err(|e| {
                    EngineError::ResumeMismatch(format!("{}: {e}", path.display()))
                })?;
                last = Some(iter);
            }
        }
        Ok(last.map(|ii| ii - ii % save_delay))
    }

    pub fn write_param_history_header(&self, names: &[String]) -> Result<(), EngineError> {
        let mut out = self.create("param_hist")?;
        write!(out, "iteration").map_err(|e| EngineError::io(self.path("param_hist"), e))?;
        for name in names {
            write!(out, "\t{name}").map_err(|e| EngineError::io(self.path("param_hist"), e))?;
        }
        writeln!(out).map_err(|e| EngineError::io(self.path("param_hist"), e))
    }

    pub fn append_param_history(&self, iteration: u32, values: &[f64]) -> Result<(), EngineError> {
        let mut out = self.append("param_hist")?;
        write!(out, "{iteration}").map_err(|e| EngineError::io(self.path("param_hist"), e))?;
        for value in values {
            write!(out, "\t{value}").map_err(|e| EngineError::io(self.path("param_hist"), e))?;
        }
        writeln!(out).map_err(|e| EngineError::io(self.path("param_hist"), e))
    }

    /// `.doc_id`: document ids in corpus order, written once per run.
    pub fn write_doc_ids(&self, corpus: &Corpus) -> Result<(), EngineError> {
        let mut out = self.create("doc_id")?;
        for doc in &corpus.documents {
            writeln!(out, "{}\t{}", doc.id, doc.title)
                .map_err(|e| EngineError::io(self.path("doc_id"), e))?;
        }
        Ok(())
    }

    /// `.doc_totals`: per-document topic histograms.
    pub fn write_doc_totals(&self, state: &SamplingState) -> Result<(), EngineError> {
        let mut out = self.create("doc_totals")?;
        for doc in 0..state.corpus().num_documents() {
            write!(out, "{doc}").map_err(|e| EngineError::io(self.path("doc_totals"), e))?;
            for topic in 0..state.num_topics() as u32 {
                write!(out, "\t{}", state.doc_topic_count(doc, topic))
                    .map_err(|e| EngineError::io(self.path("doc_totals"), e))?;
            }
            writeln!(out).map_err(|e| EngineError::io(self.path("doc_totals"), e))?;
        }
        Ok(())
    }

    /// `.topics`: human-readable top terms (and walk transitions) per topic.
    pub fn write_topics(
        &self,
        state: &mut SamplingState,
        num_terms: usize,
    ) -> Result<(), EngineError> {
        let corpus = std::sync::Arc::clone(state.corpus_arc());
        let mut out = self.create("topics")?;
        state
            .model_mut()
            .write_topics(&corpus, num_terms, &mut out)
            .map_err(|e| EngineError::io(self.path("topics"), e))
    }

    /// `.acc`: disambiguation accuracy trajectory.
    pub fn append_accuracy(&self, iteration: u32, accuracy: f64) -> Result<(), EngineError> {
        let mut out = self.append("acc")?;
        writeln!(out, "{iteration}\t{accuracy}").map_err(|e| EngineError::io(self.path("acc"), e))
    }

    /// Reads one artifact to a string (test and tooling helper).
    pub fn read_artifact(&self, suffix: &str) -> Result<String, EngineError> {
        let path = self.path(suffix);
        fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))
    }

    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.path(suffix)
    }

    pub fn exists(&self, suffix: &str) -> bool {
        self.path(suffix).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::corpus::{Corpus, Document};
    use crate::state::{FlatModel, SamplingState};
    use std::sync::Arc;

    fn state() -> SamplingState {
        let config = EngineConfig {
            num_topics: 3,
            ..EngineConfig::default()
        };
        let mut corpus = Corpus::new(vec![vec!["a".into(), "b".into()]]);
        corpus.add_document(Document::new("d0", 0, vec![0, 1, 0]));
        corpus.add_document(Document::new("d1", 0, vec![1]));
        let model = Box::new(FlatModel::new(3, &[2], config.lambda));
        SamplingState::new(&config, Arc::new(corpus), model)
    }

    #[test]
    fn assignments_round_trip_through_replay() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("model")).unwrap();

        let mut original = state();
        original.assign(0, 0, Some((2, None)));
        original.assign(0, 2, Some((1, None)));
        original.assign(1, 0, Some((0, None)));
        artifacts.write_assignments(&original).unwrap();

        let mut restored = state();
        artifacts.read_assignments(&mut restored).unwrap();
        for doc in 0..2 {
            for token in 0..restored.corpus().documents[doc].num_tokens() {
                assert_eq!(restored.assignment(doc, token), original.assignment(doc, token));
            }
            for topic in 0..3u32 {
                assert_eq!(
                    restored.doc_topic_count(doc, topic),
                    original.doc_topic_count(doc, topic)
                );
            }
        }
        assert!((restored.log_likelihood() - original.log_likelihood()).abs() < 1e-12);
    }

    #[test]
    fn params_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("model")).unwrap();
        let names = vec!["alpha".to_owned(), "lambda".to_owned()];
        let values = vec![0.1234567890123456, 3.0e-7];
        artifacts.write_params(&names, &values).unwrap();
        let read = artifacts.read_params().unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].0, "alpha");
        // Default float formatting round-trips bit-exactly.
        assert_eq!(read[0].1, values[0]);
        assert_eq!(read[1].1, values[1]);
    }

    #[test]
    fn checkpoint_iteration_floors_to_save_delay() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("model")).unwrap();
        assert_eq!(artifacts.last_checkpoint_iteration(10).unwrap(), None);
        for ii in 0..=37 {
            artifacts
                .append_lhood(ii, -100.0, None, None, None, 0.5)
                .unwrap();
        }
        assert_eq!(artifacts.last_checkpoint_iteration(10).unwrap(), Some(30));
    }

    #[test]
    fn zero_save_delay_cannot_resume() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("model")).unwrap();
        artifacts.append_lhood(3, -1.0, None, None, None, 0.1).unwrap();
        assert!(matches!(
            artifacts.last_checkpoint_iteration(0),
            Err(EngineError::ResumeMismatch(_))
        ));
    }

    #[test]
    fn mismatched_corpus_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Artifacts::new(dir.path().join("model")).unwrap();
        let original = state();
        artifacts.write_assignments(&original).unwrap();

        let config = EngineConfig {
            num_topics: 3,
            ..EngineConfig::default()
        };
        let mut corpus = Corpus::new(vec![vec!["a".into(), "b".into()]]);
        corpus.add_document(Document::new("other", 0, vec![0]));
        let model = Box::new(FlatModel::new(3, &[2], config.lambda));
        let mut restored = SamplingState::new(&config, Arc::new(corpus), model);
        assert!(matches!(
            artifacts.read_assignments(&mut restored),
            Err(EngineError::ResumeMismatch(_))
        ));
    }
}
