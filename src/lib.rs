//! Collapsed Gibbs sampling for topic models whose topics can be
//! constrained to walk a concept hierarchy.
//!
//! Two models share one engine. The flat model is ordinary LDA: each topic
//! is a vocabulary distribution per language. The walk model replaces the
//! vocabulary distribution with a per-topic random walk down a fixed
//! ontology; assigning a token means choosing both a topic and a
//! root-to-word path, so sense disambiguation falls out of inference.
//!
//! Modules:
//! - [`prob`]: log-space numerics and the Dirichlet-multinomial posterior
//!   family every count table is built from.
//! - [`ontology`]: the concept graph, its file format, and the per-topic
//!   walk distributions.
//! - [`corpus`]: resolved documents and vocabularies (ingestion lives
//!   upstream).
//! - [`state`]: assignment tables and counts, with the topic side behind a
//!   strategy trait.
//! - [`sampler`]: the Gibbs loop, slice sampling, checkpointing.
//! - [`report`]: persisted artifacts; resume replays assignments so counts
//!   are always consistent.

pub mod config;
pub mod corpus;
pub mod error;
pub mod ontology;
pub mod prob;
pub mod report;
pub mod sampler;
pub mod state;

pub use config::{EngineConfig, WalkPriorGroup};
pub use corpus::{Corpus, Document};
pub use error::EngineError;
pub use ontology::{load_ontology, Ontology, TopicWalk};
pub use report::Artifacts;
pub use sampler::Sampler;
pub use state::{FlatModel, SamplingState, TokenSupport, TopicModel, WalkModel};
