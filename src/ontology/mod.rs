//! The concept hierarchy and the per-topic walk distributions over it.

pub mod file;
pub mod graph;
pub mod types;
pub mod walk;

pub use file::{load_ontology, OntologyFile};
pub use graph::Ontology;
pub use types::{OntologyNode, Path, EMISSION_CHOICE, TRANSITION_CHOICE};
pub use walk::TopicWalk;
