//! Multivariate slice sampling over log-hyperparameters.
//!
//! One bracket per dimension, drawn jointly: the slice level comes from the
//! objective at the current point plus ln(u), each rejected candidate
//! shrinks its own dimension's bracket toward the current point. The shrink
//! loop carries a large safety bound; hitting it reverts to the current
//! point instead of looping forever on a pathological objective.

use rand::rngs::SmallRng;
use rand::Rng;
use tracing::{debug, warn};

/// Runs `reps` slice updates of `vals` in place.
///
/// `objective` must apply the candidate point as a side effect (rescaling
/// priors) and return the resulting log objective; on exit it has been
/// called last with the point left in `vals`.
pub fn slice_sample<F>(
    vals: &mut [f64],
    step: f64,
    reps: u32,
    max_shrinks: u32,
    rng: &mut SmallRng,
    mut objective: F,
) where
    F: FnMut(&[f64]) -> f64,
{
    assert!(step > 0.0);
    assert!(max_shrinks > 0);
    let dim = vals.len();
    let mut left = vec![0.0; dim];
    let mut right = vec![0.0; dim];
    let mut candidate = vec![0.0; dim];

    for _ in 0..reps {
        let current_val = objective(vals);
        let goal = current_val + rng.random::<f64>().ln();
        for d in 0..dim {
            let u: f64 = rng.random();
            left[d] = vals[d] - u * step;
            right[d] = left[d] + step;
        }

        let mut shrinks = 0;
        loop {
            for d in 0..dim {
                candidate[d] = left[d] + rng.random::<f64>() * (right[d] - left[d]);
            }
            let val = objective(&candidate);
            if val > goal {
                vals.copy_from_slice(&candidate);
                debug!(val, goal, "accepted hyperparameter move");
                break;
            }
            shrinks += 1;
            if shrinks >= max_shrinks {
                warn!(shrinks, "slice bracket collapsed without acceptance, keeping current point");
                objective(vals);
                break;
            }
            for d in 0..dim {
                if candidate[d] < vals[d] {
                    left[d] = candidate[d];
                } else {
                    right[d] = candidate[d];
                }
            }
        }
    }
}
