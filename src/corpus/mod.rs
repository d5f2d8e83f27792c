//! Corpus boundary types.
//!
//! Ingestion, tokenization, and vocabulary filtering happen upstream; the
//! engine receives fully resolved documents: ordered term ids per language
//! vocabulary, an optional gold sense annotation per token, and a test flag
//! that keeps held-out documents out of training.

use rustc_hash::FxHashMap;

/// A single document as the sampler sees it.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Index into the corpus's per-language vocabularies.
    pub language: usize,
    /// Term ids in document order.
    pub tokens: Vec<u32>,
    /// Gold sense key (interned in [`Corpus::sense_keys`]) per token, where
    /// annotated.
    pub senses: Vec<Option<u32>>,
    /// Held out from training; scored by left-to-right likelihood only.
    pub test: bool,
}

impl Document {
    pub fn new(id: impl Into<String>, language: usize, tokens: Vec<u32>) -> Self {
        let senses = vec![None; tokens.len()];
        Document {
            id: id.into(),
            title: String::new(),
            language,
            tokens,
            senses,
            test: false,
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn term(&self, index: usize) -> u32 {
        self.tokens[index]
    }

    pub fn sense(&self, index: usize) -> Option<u32> {
        self.senses[index]
    }
}

/// Documents plus the per-language vocabularies their term ids index into.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    /// `vocab[lang][term_id]` is the surface string.
    pub vocab: Vec<Vec<String>>,
    /// Interned sense keys referenced by document annotations and ontology
    /// terminal nodes.
    pub sense_keys: Vec<String>,
}

impl Corpus {
    pub fn new(vocab: Vec<Vec<String>>) -> Self {
        Corpus {
            documents: Vec::new(),
            vocab,
            sense_keys: Vec::new(),
        }
    }

    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn num_languages(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocab_size(&self, language: usize) -> usize {
        self.vocab[language].len()
    }

    pub fn term_string(&self, language: usize, term: u32) -> &str {
        &self.vocab[language][term as usize]
    }

    pub fn add_document(&mut self, doc: Document) {
        assert!(doc.language < self.vocab.len(), "unknown language");
        assert_eq!(doc.tokens.len(), doc.senses.len());
        let size = self.vocab[doc.language].len() as u32;
        assert!(doc.tokens.iter().all(|&t| t < size), "term id out of vocabulary");
        self.documents.push(doc);
    }

    /// Interns a sense key, returning its stable id.
    pub fn intern_sense(&mut self, key: &str) -> u32 {
        if let Some(pos) = self.sense_keys.iter().position(|k| k == key) {
            return pos as u32;
        }
        self.sense_keys.push(key.to_owned());
        (self.sense_keys.len() - 1) as u32
    }

    pub fn sense_key(&self, id: u32) -> &str {
        &self.sense_keys[id as usize]
    }

    /// Whether any training token carries a gold sense annotation.
    pub fn has_annotations(&self) -> bool {
        self.documents
            .iter()
            .any(|d| d.senses.iter().any(Option::is_some))
    }

    /// Per-language string-to-id lookup for resolving ontology emissions.
    pub fn vocab_lookup(&self) -> Vec<FxHashMap<String, u32>> {
        self.vocab
            .iter()
            .map(|words| {
                words
                    .iter()
                    .enumerate()
                    .map(|(ii, w)| (w.clone(), ii as u32))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_corpus() -> Corpus {
        let vocab = vec![vec!["dog".into(), "pig".into(), "walk".into()]];
        let mut corpus = Corpus::new(vocab);
        corpus.add_document(Document::new("d0", 0, vec![0, 2, 1]));
        corpus
    }

    #[test]
    fn document_accessors() {
        let corpus = small_corpus();
        let doc = &corpus.documents[0];
        assert_eq!(doc.num_tokens(), 3);
        assert_eq!(doc.term(1), 2);
        assert_eq!(doc.sense(0), None);
        assert_eq!(corpus.term_string(0, doc.term(0)), "dog");
    }

    #[test]
    #[should_panic]
    fn out_of_vocabulary_token_rejected() {
        let mut corpus = small_corpus();
        corpus.add_document(Document::new("d1", 0, vec![9]));
    }

    #[test]
    fn sense_interning_is_stable() {
        let mut corpus = small_corpus();
        let a = corpus.intern_sense("dog%1");
        let b = corpus.intern_sense("pig%1");
        assert_eq!(corpus.intern_sense("dog%1"), a);
        assert_ne!(a, b);
        assert_eq!(corpus.sense_key(b), "pig%1");
    }

    #[test]
    fn vocab_lookup_inverts_vocab() {
        let corpus = small_corpus();
        let lookup = corpus.vocab_lookup();
        assert_eq!(lookup[0]["pig"], 1);
    }
}
