//! Log-space numerics shared by every posterior distribution and the
//! sampler's categorical draws.

use rand::rngs::SmallRng;
use rand::Rng;
use statrs::function::gamma::ln_gamma;

/// Stand-in for ln(0); small enough to never win a categorical draw, large
/// enough that sums of a few of them stay finite.
pub const LOG_ZERO: f64 = -1e16;

/// Natural log that maps non-positive input to [`LOG_ZERO`] instead of NaN.
#[inline]
pub fn safe_log(x: f64) -> f64 {
    if x > 0.0 {
        x.ln()
    } else {
        LOG_ZERO
    }
}

/// ln(exp(a) + exp(b)) without leaving log space.
#[inline]
pub fn log_sum(log_a: f64, log_b: f64) -> f64 {
    if log_a < log_b {
        log_b + (log_a - log_b).exp().ln_1p()
    } else {
        log_a + (log_b - log_a).exp().ln_1p()
    }
}

/// ln(Σ exp(vals[i])) over a slice.
pub fn log_sum_slice(vals: &[f64]) -> f64 {
    debug_assert!(!vals.is_empty());
    let mut total = vals[0];
    for &v in &vals[1..] {
        total = log_sum(total, v);
    }
    total
}

/// Draws an index from an unnormalized log-probability vector.
///
/// The vector is normalized by its log-sum, a uniform variate picks a point
/// in the cumulative distribution, and the index covering that point wins.
/// Rounding can leave the cumulative sum epsilon short of 1, so the final
/// index absorbs the remainder.
pub fn log_vector_sample(vals: &[f64], rng: &mut SmallRng) -> usize {
    debug_assert!(!vals.is_empty());
    let norm = log_sum_slice(vals);
    let cutoff: f64 = rng.random();

    let mut cumulative = 0.0;
    for (ii, &v) in vals.iter().enumerate() {
        cumulative += (v - norm).exp();
        if cumulative >= cutoff {
            return ii;
        }
    }
    vals.len() - 1
}

/// Closed-form log marginal likelihood of counts under a symmetric
/// Dirichlet prior with total mass `prior_sum` spread over `size` items.
///
/// Only items with non-zero counts need enumerating; `num_seen` items were
/// observed and the remaining `size - num_seen` contribute cancelling
/// `ln Γ(prior)` terms handled by the caller passing them through `counts`
/// implicitly (they add zero because `ln Γ(c + p) - ln Γ(p) = 0` at `c = 0`).
pub fn log_dirichlet_likelihood<I>(counts: I, sum: i64, size: usize, prior_sum: f64) -> f64
where
    I: IntoIterator<Item = i64>,
{
    debug_assert!(size > 0);
    debug_assert!(prior_sum > 0.0);
    let prior = prior_sum / size as f64;

    let mut val = ln_gamma(prior_sum) - ln_gamma(prior_sum + sum as f64);
    for count in counts {
        debug_assert!(count >= 0);
        if count > 0 {
            val += ln_gamma(count as f64 + prior) - ln_gamma(prior);
        }
    }
    val
}

/// Explicit-prior form: `prior[i]` already sums to the full prior mass.
/// Zero prior entries force zero counts (the item is structurally
/// impossible) and contribute nothing.
pub fn log_dirichlet_likelihood_with_prior(counts: &[i64], sum: i64, prior: &[f64]) -> f64 {
    debug_assert_eq!(counts.len(), prior.len());
    let prior_sum: f64 = prior.iter().sum();

    let mut val = ln_gamma(prior_sum) - ln_gamma(prior_sum + sum as f64);
    for (&count, &p) in counts.iter().zip(prior) {
        debug_assert!(count >= 0);
        if p == 0.0 {
            debug_assert_eq!(count, 0);
            continue;
        }
        if count > 0 {
            val += ln_gamma(count as f64 + p) - ln_gamma(p);
        }
    }
    val
}
