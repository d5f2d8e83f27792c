//! Dirichlet-multinomial posterior distributions.
//!
//! Every count table in the engine is one of these: a running count vector
//! (or map) plus a Dirichlet prior, queried in log space. The collapsed
//! sampler only ever needs `log((count + prior) / (sum + prior_sum))`, the
//! numerator alone, or the closed-form marginal likelihood for diagnostics.
//!
//! Counts move through `change_count(item, delta)` with signed deltas; a
//! delta that would drive any count below zero is a corrupted-state bug and
//! panics.

use rustc_hash::FxHashMap;

use crate::prob::logspace::{
    log_dirichlet_likelihood, log_dirichlet_likelihood_with_prior, safe_log,
};

/// Array-backed posterior with either a uniform prior or an explicit
/// per-item prior vector.
#[derive(Debug, Clone)]
pub struct DenseMultinomial {
    counts: Vec<i64>,
    sum: i64,
    prior_sum: f64,
    prior_val: f64,
    prior: Option<Vec<f64>>,
    degenerate: bool,
}

impl DenseMultinomial {
    /// Uniform prior: `prior_sum` mass spread evenly over `size` items.
    pub fn new(size: usize, prior_sum: f64) -> Self {
        assert!(size > 0);
        assert!(prior_sum > 0.0);
        DenseMultinomial {
            counts: vec![0; size],
            sum: 0,
            prior_sum,
            prior_val: prior_sum / size as f64,
            prior: None,
            degenerate: false,
        }
    }

    /// Explicit prior, rescaled so it sums to `prior_sum`.
    ///
    /// A single zero entry marks the distribution degenerate (the item is
    /// structurally impossible and the other item absorbs all mass); more
    /// than one zero entry is a construction bug.
    pub fn with_prior(prior: Vec<f64>, prior_sum: f64) -> Self {
        assert!(!prior.is_empty());
        assert!(prior_sum > 0.0);
        let size = prior.len();
        let mut dist = DenseMultinomial {
            counts: vec![0; size],
            sum: 0,
            prior_sum,
            prior_val: prior_sum / size as f64,
            prior: Some(prior),
            degenerate: false,
        };
        dist.rescale_prior();
        dist
    }

    fn rescale_prior(&mut self) {
        let prior = match self.prior.as_mut() {
            Some(p) => p,
            None => return,
        };
        let total: f64 = prior.iter().sum();
        assert!(total > 0.0, "explicit prior has no mass");

        let mut zeros = 0;
        for val in prior.iter_mut() {
            assert!(*val >= 0.0, "negative prior entry");
            *val *= self.prior_sum / total;
            if *val == 0.0 {
                zeros += 1;
            }
        }
        assert!(zeros <= 1, "explicit prior has multiple impossible items");
        if zeros == 1 {
            assert!(prior.len() <= 2);
            self.degenerate = true;
        }
    }

    pub fn size(&self) -> usize {
        self.counts.len()
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn count(&self, item: usize) -> i64 {
        self.counts[item]
    }

    fn prior_of(&self, item: usize) -> f64 {
        match &self.prior {
            Some(p) => p[item],
            None => self.prior_val,
        }
    }

    pub fn change_count(&mut self, item: usize, delta: i64) {
        let count = &mut self.counts[item];
        *count += delta;
        assert!(*count >= 0, "count for item {item} went negative");
        self.sum += delta;
        assert!(self.sum >= 0);
    }

    /// ln(count + prior), the unnormalized conditional weight.
    pub fn log_numerator(&self, item: usize) -> f64 {
        safe_log(self.counts[item] as f64 + self.prior_of(item))
    }

    /// Full log posterior-predictive probability of `item`.
    ///
    /// Singleton and degenerate distributions concentrate all mass on the
    /// only possible item, so the answer is ln(1).
    pub fn log_probability(&self, item: usize) -> f64 {
        if self.counts.len() <= 1 || self.degenerate {
            return 0.0;
        }
        self.log_numerator(item) - safe_log(self.sum as f64 + self.prior_sum)
    }

    /// Closed-form log marginal likelihood of the current counts.
    pub fn log_likelihood(&self) -> f64 {
        match &self.prior {
            Some(p) => log_dirichlet_likelihood_with_prior(&self.counts, self.sum, p),
            None => log_dirichlet_likelihood(
                self.counts.iter().copied(),
                self.sum,
                self.counts.len(),
                self.prior_sum,
            ),
        }
    }

    /// Clears all counts; the alphabet and prior survive.
    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.sum = 0;
    }

    pub fn prior_sum(&self) -> f64 {
        self.prior_sum
    }

    pub fn set_prior_sum(&mut self, prior_sum: f64) {
        assert!(prior_sum > 0.0);
        self.prior_sum = prior_sum;
        self.prior_val = prior_sum / self.counts.len() as f64;
        self.rescale_prior();
    }

    /// Per-item scale: total prior mass becomes `size * scale`.
    pub fn set_prior_scale(&mut self, scale: f64) {
        self.set_prior_sum(self.counts.len() as f64 * scale);
    }

    /// (log-probability, item) pairs sorted most probable first; ties break
    /// on item id for determinism.
    pub fn ranked_items(&self) -> Vec<(f64, usize)> {
        let mut ranked: Vec<(f64, usize)> = (0..self.counts.len())
            .map(|ii| (self.log_probability(ii), ii))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        ranked
    }
}

/// Map-backed posterior over a large alphabet where most counts stay zero.
/// The prior is always uniform.
#[derive(Debug, Clone)]
pub struct SparseMultinomial {
    counts: FxHashMap<u32, i64>,
    size: usize,
    sum: i64,
    prior_sum: f64,
}

impl SparseMultinomial {
    pub fn new(size: usize, prior_sum: f64) -> Self {
        assert!(size > 0);
        assert!(prior_sum > 0.0);
        SparseMultinomial {
            counts: FxHashMap::default(),
            size,
            sum: 0,
            prior_sum,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn count(&self, item: u32) -> i64 {
        debug_assert!((item as usize) < self.size);
        self.counts.get(&item).copied().unwrap_or(0)
    }

    fn prior_val(&self) -> f64 {
        self.prior_sum / self.size as f64
    }

    pub fn change_count(&mut self, item: u32, delta: i64) {
        debug_assert!((item as usize) < self.size);
        let count = self.counts.entry(item).or_insert(0);
        *count += delta;
        assert!(*count >= 0, "count for item {item} went negative");
        if *count == 0 {
            self.counts.remove(&item);
        }
        self.sum += delta;
        assert!(self.sum >= 0);
    }

    pub fn log_numerator(&self, item: u32) -> f64 {
        safe_log(self.count(item) as f64 + self.prior_val())
    }

    pub fn log_probability(&self, item: u32) -> f64 {
        if self.size <= 1 {
            return 0.0;
        }
        self.log_numerator(item) - safe_log(self.sum as f64 + self.prior_sum)
    }

    /// Marginal likelihood; iterates observed keys in sorted order so the
    /// floating-point sum is reproducible regardless of insertion history.
    pub fn log_likelihood(&self) -> f64 {
        let mut keys: Vec<u32> = self.counts.keys().copied().collect();
        keys.sort_unstable();
        log_dirichlet_likelihood(
            keys.iter().map(|k| self.counts[k]),
            self.sum,
            self.size,
            self.prior_sum,
        )
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.sum = 0;
    }

    pub fn prior_sum(&self) -> f64 {
        self.prior_sum
    }

    pub fn set_prior_sum(&mut self, prior_sum: f64) {
        assert!(prior_sum > 0.0);
        self.prior_sum = prior_sum;
    }

    pub fn set_prior_scale(&mut self, scale: f64) {
        self.set_prior_sum(self.size as f64 * scale);
    }

    /// Observed items only, sorted most probable first.
    pub fn ranked_items(&self) -> Vec<(f64, u32)> {
        let mut ranked: Vec<(f64, u32)> = self
            .counts
            .keys()
            .map(|&k| (self.log_probability(k), k))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        ranked
    }
}

/// Dense posterior plus a per-item log-probability memo.
///
/// The memo is invalidated wholesale on any count change, which pays off
/// when the distribution is read many times between writes (topic
/// vocabularies are read once per token but written only when a token moves
/// in or out of the topic).
#[derive(Debug, Clone)]
pub struct CachedMultinomial {
    base: DenseMultinomial,
    cache: Vec<f64>,
    valid: Vec<bool>,
}

impl CachedMultinomial {
    pub fn new(size: usize, prior_sum: f64) -> Self {
        CachedMultinomial::wrap(DenseMultinomial::new(size, prior_sum))
    }

    pub fn with_prior(prior: Vec<f64>, prior_sum: f64) -> Self {
        CachedMultinomial::wrap(DenseMultinomial::with_prior(prior, prior_sum))
    }

    fn wrap(base: DenseMultinomial) -> Self {
        let size = base.size();
        CachedMultinomial {
            base,
            cache: vec![0.0; size],
            valid: vec![false; size],
        }
    }

    pub fn size(&self) -> usize {
        self.base.size()
    }

    pub fn sum(&self) -> i64 {
        self.base.sum()
    }

    pub fn count(&self, item: usize) -> i64 {
        self.base.count(item)
    }

    pub fn change_count(&mut self, item: usize, delta: i64) {
        self.base.change_count(item, delta);
        self.valid.fill(false);
    }

    pub fn log_numerator(&self, item: usize) -> f64 {
        self.base.log_numerator(item)
    }

    /// Memoized log probability; fills the memo lazily per item.
    pub fn log_probability(&mut self, item: usize) -> f64 {
        if !self.valid[item] {
            self.cache[item] = self.base.log_probability(item);
            self.valid[item] = true;
        }
        self.cache[item]
    }

    /// Uncached read for contexts holding only a shared borrow.
    pub fn log_probability_fresh(&self, item: usize) -> f64 {
        self.base.log_probability(item)
    }

    pub fn log_likelihood(&self) -> f64 {
        self.base.log_likelihood()
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.valid.fill(false);
    }

    pub fn prior_sum(&self) -> f64 {
        self.base.prior_sum()
    }

    pub fn set_prior_sum(&mut self, prior_sum: f64) {
        self.base.set_prior_sum(prior_sum);
        self.valid.fill(false);
    }

    pub fn set_prior_scale(&mut self, scale: f64) {
        self.base.set_prior_scale(scale);
        self.valid.fill(false);
    }

    pub fn ranked_items(&self) -> Vec<(f64, usize)> {
        self.base.ranked_items()
    }
}

/// Posterior over an alphabet of at most one item: every query answers
/// ln(1) = 0 and only the aggregate count is tracked. Used as the shared
/// fallback for ontology nodes that offer no real choice.
#[derive(Debug, Clone, Default)]
pub struct DegenerateMultinomial {
    sum: i64,
}

impl DegenerateMultinomial {
    pub fn new() -> Self {
        DegenerateMultinomial { sum: 0 }
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn change_count(&mut self, _item: u32, delta: i64) {
        self.sum += delta;
        assert!(self.sum >= 0, "degenerate count went negative");
    }

    pub fn log_probability(&self, _item: u32) -> f64 {
        0.0
    }

    pub fn log_likelihood(&self) -> f64 {
        0.0
    }

    pub fn reset(&mut self) {
        self.sum = 0;
    }
}

/// Runtime-selected posterior. Count tables whose representation depends on
/// configuration (document proportions, walk node distributions) hold one of
/// these; the hot paths match once per call.
#[derive(Debug, Clone)]
pub enum Posterior {
    Dense(DenseMultinomial),
    Sparse(SparseMultinomial),
    Cached(CachedMultinomial),
    Degenerate(DegenerateMultinomial),
}

impl Posterior {
    pub fn sum(&self) -> i64 {
        match self {
            Posterior::Dense(d) => d.sum(),
            Posterior::Sparse(s) => s.sum(),
            Posterior::Cached(c) => c.sum(),
            Posterior::Degenerate(d) => d.sum(),
        }
    }

    pub fn count(&self, item: u32) -> i64 {
        match self {
            Posterior::Dense(d) => d.count(item as usize),
            Posterior::Sparse(s) => s.count(item),
            Posterior::Cached(c) => c.count(item as usize),
            Posterior::Degenerate(d) => d.sum(),
        }
    }

    pub fn change_count(&mut self, item: u32, delta: i64) {
        match self {
            Posterior::Dense(d) => d.change_count(item as usize, delta),
            Posterior::Sparse(s) => s.change_count(item, delta),
            Posterior::Cached(c) => c.change_count(item as usize, delta),
            Posterior::Degenerate(d) => d.change_count(item, delta),
        }
    }

    pub fn log_numerator(&self, item: u32) -> f64 {
        match self {
            Posterior::Dense(d) => d.log_numerator(item as usize),
            Posterior::Sparse(s) => s.log_numerator(item),
            Posterior::Cached(c) => c.log_numerator(item as usize),
            Posterior::Degenerate(_) => 0.0,
        }
    }

    /// Read-only log probability; the cached variant recomputes instead of
    /// memoizing here.
    pub fn log_probability(&self, item: u32) -> f64 {
        match self {
            Posterior::Dense(d) => d.log_probability(item as usize),
            Posterior::Sparse(s) => s.log_probability(item),
            Posterior::Cached(c) => c.log_probability_fresh(item as usize),
            Posterior::Degenerate(d) => d.log_probability(item),
        }
    }

    /// Memoizing log probability for exclusive-borrow hot paths.
    pub fn log_probability_cached(&mut self, item: u32) -> f64 {
        match self {
            Posterior::Cached(c) => c.log_probability(item as usize),
            other => other.log_probability(item),
        }
    }

    pub fn log_likelihood(&self) -> f64 {
        match self {
            Posterior::Dense(d) => d.log_likelihood(),
            Posterior::Sparse(s) => s.log_likelihood(),
            Posterior::Cached(c) => c.log_likelihood(),
            Posterior::Degenerate(d) => d.log_likelihood(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Posterior::Dense(d) => d.reset(),
            Posterior::Sparse(s) => s.reset(),
            Posterior::Cached(c) => c.reset(),
            Posterior::Degenerate(d) => d.reset(),
        }
    }

    pub fn set_prior_scale(&mut self, scale: f64) {
        match self {
            Posterior::Dense(d) => d.set_prior_scale(scale),
            Posterior::Sparse(s) => s.set_prior_scale(scale),
            Posterior::Cached(c) => c.set_prior_scale(scale),
            Posterior::Degenerate(_) => {}
        }
    }

    /// Observed/rankable items, most probable first.
    pub fn ranked_items(&self) -> Vec<(f64, u32)> {
        match self {
            Posterior::Dense(d) => d
                .ranked_items()
                .into_iter()
                .map(|(p, i)| (p, i as u32))
                .collect(),
            Posterior::Sparse(s) => s.ranked_items(),
            Posterior::Cached(c) => c
                .ranked_items()
                .into_iter()
                .map(|(p, i)| (p, i as u32))
                .collect(),
            Posterior::Degenerate(_) => Vec::new(),
        }
    }
}
