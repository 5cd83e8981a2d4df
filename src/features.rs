//! Fisher-kernel features computed on the fly from a positive and a negative model.
use crate::assembler::Assembler;
use crate::cache::{FeatureCache, FeatureMatrix};
use crate::error::{FisherError, Result};
use crate::optimizer::{self, OptimizeOutcome, WeightOptimizer};
use crate::provider::DerivativeProvider;
use crate::{FisherConfig, DEFAULT_WEIGHT};
use rayon::prelude::*;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The current mixing weight and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixingWeight {
    /// Neither set nor optimized yet. `DEFAULT_WEIGHT` is used to compute rows.
    Unset,
    Manual(f64),
    Optimized(f64),
}

impl MixingWeight {
    pub fn value(&self) -> Option<f64> {
        match *self {
            MixingWeight::Unset => None,
            MixingWeight::Manual(a) | MixingWeight::Optimized(a) => Some(a),
        }
    }
    pub fn value_or_default(&self) -> f64 {
        self.value().unwrap_or(DEFAULT_WEIGHT)
    }
}

#[derive(Debug)]
struct Inner<P: ?Sized> {
    assembler: Assembler<P>,
    weight: MixingWeight,
    cache: FeatureCache,
}

/// Feature matrix over the sequences shared by the two models.
/// Rows are computed on the first access and kept until the models or the weight change.
/// Reading rows only takes a shared lock, so rows can be computed from many threads at once;
/// `replace_models`, `set_a`, and `optimize` wait for them and block new readers.
#[derive(Debug)]
pub struct FisherFeatures<P: ?Sized> {
    config: FisherConfig,
    inner: RwLock<Inner<P>>,
}

impl<P: DerivativeProvider + Send + Sync + ?Sized> FisherFeatures<P> {
    pub fn new(pos: Arc<P>, neg: Arc<P>, config: FisherConfig) -> Self {
        let assembler = Assembler::new(pos, neg, &config);
        let cache = FeatureCache::new(assembler.sequence_count().unwrap_or(0));
        let inner = Inner {
            assembler,
            weight: MixingWeight::Unset,
            cache,
        };
        Self {
            config,
            inner: RwLock::new(inner),
        }
    }
    pub fn with_default(pos: Arc<P>, neg: Arc<P>) -> Self {
        Self::new(pos, neg, FisherConfig::default())
    }
    fn read(&self) -> RwLockReadGuard<'_, Inner<P>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, Inner<P>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn config(&self) -> &FisherConfig {
        &self.config
    }
    /// Length of each feature vector.
    pub fn num_features(&self) -> usize {
        self.read().assembler.num_features()
    }
    /// Number of sequences, i.e., rows. Fails if the two models disagree.
    pub fn num_vectors(&self) -> Result<usize> {
        self.read().assembler.sequence_count()
    }
    /// The current pair of models.
    pub fn models(&self) -> (Arc<P>, Arc<P>) {
        let inner = self.read();
        let pos = inner.assembler.positive().clone();
        let neg = inner.assembler.negative().clone();
        (pos, neg)
    }
    /// Swap both models at once. Every row and any optimized weight are discarded;
    /// a weight given by `set_a` is kept.
    pub fn replace_models(&self, pos: Arc<P>, neg: Arc<P>) {
        let mut inner = self.write();
        inner.assembler = Assembler::new(pos, neg, &self.config);
        let num_rows = inner.assembler.sequence_count().unwrap_or(0);
        inner.cache.reset(num_rows);
        if let MixingWeight::Optimized(_) = inner.weight {
            inner.weight = MixingWeight::Unset;
        }
        debug!("MODEL\tReplaced. {} rows, {} features", num_rows, inner.assembler.num_features());
    }
    /// Set the mixing weight. It should be in [0,1]. Every row is discarded.
    pub fn set_a(&self, a: f64) -> Result<()> {
        if !a.is_finite() || !(0f64..=1f64).contains(&a) {
            return Err(FisherError::InvalidWeight(a));
        }
        let mut inner = self.write();
        inner.weight = MixingWeight::Manual(a);
        let num_rows = inner.cache.len();
        inner.cache.reset(num_rows);
        Ok(())
    }
    /// The mixing weight, or `None` if it has been neither set nor optimized.
    pub fn get_a(&self) -> Option<f64> {
        self.read().weight.value()
    }
    pub fn weight(&self) -> MixingWeight {
        self.read().weight
    }
    /// The `seq_index`-th row. It is computed at most once until it is invalidated.
    pub fn get_feature_vector(&self, seq_index: usize) -> Result<Arc<[f64]>> {
        let inner = self.read();
        Self::cached_row(&inner, seq_index)
    }
    fn cached_row(inner: &Inner<P>, seq_index: usize) -> Result<Arc<[f64]>> {
        inner.assembler.check_index(seq_index)?;
        let a = inner.weight.value_or_default();
        inner.cache.get_or_compute(seq_index, || {
            let mut row = vec![0f64; inner.assembler.num_features()];
            inner.assembler.compute(seq_index, a, &mut row)?;
            Ok(row)
        })
    }
    /// Compute the `seq_index`-th row without touching the cache.
    /// The allocation of `target` is reused if given; the returned buffer belongs to the caller.
    pub fn compute_feature_vector(&self, seq_index: usize, target: Option<Vec<f64>>) -> Result<Vec<f64>> {
        let inner = self.read();
        let len = inner.assembler.num_features();
        let mut target = target.unwrap_or_default();
        target.clear();
        target.resize(len, 0f64);
        let a = inner.weight.value_or_default();
        inner.assembler.compute(seq_index, a, &mut target)?;
        Ok(target)
    }
    /// Compute the `seq_index`-th row into `dest`, which should have length `num_features()`.
    pub fn compute_into(&self, seq_index: usize, dest: &mut [f64]) -> Result<()> {
        let inner = self.read();
        let a = inner.weight.value_or_default();
        inner.assembler.compute(seq_index, a, dest)
    }
    /// Compute every row (in parallel) and return them as a dense matrix.
    /// Rows already in the cache are reused, and new rows are kept in the cache.
    pub fn materialize_full_matrix(&self) -> Result<FeatureMatrix> {
        let guard = self.read();
        let inner: &Inner<P> = &guard;
        let num_rows = inner.assembler.sequence_count()?;
        let rows: Vec<_> = (0..num_rows)
            .into_par_iter()
            .map(|i| Self::cached_row(inner, i))
            .collect::<Result<_>>()?;
        debug!("MATRIX\t{}x{}", num_rows, inner.assembler.num_features());
        FeatureMatrix::from_rows(&rows, inner.assembler.num_features())
    }
    fn likelihoods(inner: &Inner<P>) -> Result<Vec<(f64, f64)>> {
        let num_rows = inner.assembler.sequence_count()?;
        (0..num_rows)
            .into_par_iter()
            .map(|i| inner.assembler.likelihoods(i))
            .collect()
    }
    /// d/da sum_i log (a Pr{x_i|pos} + (1-a) Pr{x_i|neg}). If `dimension` is `Some(i)`,
    /// only the term of the `i`-th sequence. `None` gives exactly the sum of every term.
    /// `a` should be in [0,1], and is clamped as in the rows, so that `deriv_a(a, Some(i))`
    /// equals the sensitivity term of the `i`-th row under the same weight.
    pub fn deriv_a(&self, a: f64, dimension: Option<usize>) -> Result<f64> {
        let a = optimizer::clamp_weight(a, self.config.clamp)?;
        let inner = self.read();
        match dimension {
            Some(i) => {
                let lk = inner.assembler.likelihoods(i)?;
                optimizer::aggregate_sensitivity(a, &[lk])
                    .map_err(|e| Self::reindex(e, i))
            }
            None => optimizer::aggregate_sensitivity(a, &Self::likelihoods(&inner)?),
        }
    }
    fn reindex(err: FisherError, i: usize) -> FisherError {
        match err {
            FisherError::NumericDegeneracy {
                side,
                parameter,
                value,
                ..
            } => FisherError::NumericDegeneracy {
                seq_index: i,
                side,
                parameter,
                value,
            },
            err => err,
        }
    }
    /// The objective maximized by `optimize`, evaluated at the clamped `a`.
    pub fn mixture_log_likelihood(&self, a: f64) -> Result<f64> {
        let a = optimizer::clamp_weight(a, self.config.clamp)?;
        let inner = self.read();
        let lks = Self::likelihoods(&inner)?;
        optimizer::aggregate_mixture_log_likelihood(a, &lks)
    }
    /// Search the weight maximizing the mixture likelihood, starting from `initial`
    /// (`DEFAULT_WEIGHT` if `None`), and install the best weight found even if the search
    /// did not converge. Every row is discarded.
    pub fn optimize(&self, initial: Option<f64>) -> Result<OptimizeOutcome> {
        let mut inner = self.write();
        let lks = Self::likelihoods(&inner)?;
        let initial = initial.unwrap_or(DEFAULT_WEIGHT);
        let outcome = WeightOptimizer::from(&self.config).optimize(&lks, initial)?;
        inner.weight = MixingWeight::Optimized(outcome.a);
        let num_rows = inner.cache.len();
        inner.cache.reset(num_rows);
        info!(
            "OPT\ta={}\tderiv={:.3e}\titer={}\tconverged={}",
            outcome.a, outcome.derivative, outcome.iterations, outcome.converged
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::tests::Coin;
    fn coins(theta: f64) -> Arc<Coin> {
        Arc::new(Coin {
            theta,
            flips: vec![(3, 1), (1, 3), (2, 2)],
        })
    }
    #[test]
    fn rows_are_cached() {
        let features = FisherFeatures::with_default(coins(0.7), coins(0.3));
        assert_eq!(features.num_features(), 3);
        assert_eq!(features.num_vectors().unwrap(), 3);
        let row = features.get_feature_vector(1).unwrap();
        let again = features.get_feature_vector(1).unwrap();
        assert!(Arc::ptr_eq(&row, &again));
        let fresh = features.compute_feature_vector(1, None).unwrap();
        assert_eq!(row.as_ref(), fresh.as_slice());
        let reused = features.compute_feature_vector(1, Some(vec![9f64; 10])).unwrap();
        assert_eq!(reused, fresh);
        let mut dest = vec![0f64; 3];
        features.compute_into(1, &mut dest).unwrap();
        assert_eq!(dest, fresh);
    }
    #[test]
    fn weight_changes_invalidate() {
        let features = FisherFeatures::with_default(coins(0.7), coins(0.3));
        assert_eq!(features.get_a(), None);
        assert_eq!(features.weight(), MixingWeight::Unset);
        let before = features.get_feature_vector(0).unwrap();
        features.set_a(0.9).unwrap();
        assert_eq!(features.weight(), MixingWeight::Manual(0.9));
        let after = features.get_feature_vector(0).unwrap();
        assert!(after[0] > before[0], "{:?}\t{:?}", before, after);
        assert_eq!(after[2], before[2]);
        assert!(features.set_a(1.1).is_err());
        assert!(features.set_a(f64::NAN).is_err());
        assert_eq!(features.get_a(), Some(0.9));
    }
    #[test]
    fn replace_keeps_manual_weight() {
        let features = FisherFeatures::with_default(coins(0.7), coins(0.3));
        features.set_a(0.2).unwrap();
        features.replace_models(coins(0.6), coins(0.4));
        assert_eq!(features.get_a(), Some(0.2));
        features.optimize(None).unwrap();
        assert!(matches!(features.weight(), MixingWeight::Optimized(_)));
        features.replace_models(coins(0.7), coins(0.3));
        assert_eq!(features.weight(), MixingWeight::Unset);
        let (pos, _) = features.models();
        assert_eq!(pos.theta, 0.7);
    }
    #[test]
    fn deriv_a_single() {
        let features = FisherFeatures::with_default(coins(0.7), coins(0.3));
        let total = features.deriv_a(0.4, None).unwrap();
        let sum: f64 = (0..3).map(|i| features.deriv_a(0.4, Some(i)).unwrap()).sum();
        assert_eq!(total, sum);
        assert!(features.deriv_a(0.4, Some(3)).is_err());
    }
    #[test]
    fn weight_out_of_range() {
        let features = FisherFeatures::with_default(coins(0.7), coins(0.3));
        for &a in [2f64, -0.5, f64::NAN, f64::INFINITY].iter() {
            match features.deriv_a(a, Some(0)).unwrap_err() {
                FisherError::InvalidWeight(_) => {}
                err => panic!("{}\t{:?}", a, err),
            }
            assert!(features.deriv_a(a, None).is_err());
            assert!(features.mixture_log_likelihood(a).is_err());
        }
        assert!(features.mixture_log_likelihood(0.5).unwrap().is_finite());
    }
    #[test]
    fn sensitivity_term_matches_deriv_a() {
        let mut config = FisherConfig::default();
        config.scalar_terms = crate::ScalarTerms::LogRatioAndSensitivity;
        let features = FisherFeatures::new(coins(0.7), coins(0.3), config);
        for &a in [0f64, 0.25, 1f64].iter() {
            features.set_a(a).unwrap();
            for i in 0..3 {
                let row = features.get_feature_vector(i).unwrap();
                assert_eq!(row[3], features.deriv_a(a, Some(i)).unwrap(), "{}\t{}", a, i);
            }
        }
    }
}
