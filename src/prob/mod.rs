//! Probability primitives: log-space numerics and the
//! Dirichlet-multinomial posterior family.

pub mod logspace;
pub mod multinomial;

pub use logspace::{log_sum, log_vector_sample, safe_log, LOG_ZERO};
pub use multinomial::{
    CachedMultinomial, DegenerateMultinomial, DenseMultinomial, Posterior, SparseMultinomial,
};
