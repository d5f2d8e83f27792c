//! Iteration loop and hyperparameter sampling.

pub mod engine;
pub mod slice;

pub use engine::Sampler;
pub use slice::slice_sample;
