//! Search for the mixing weight `a` maximizing sum_i log (a Pr{x_i|pos} + (1-a) Pr{x_i|neg}).
//! The objective is concave in `a`, so its derivative is monotone decreasing on [0,1].
use crate::error::{FisherError, Result, Side};
use crate::FisherConfig;

// Stop when the bracket is narrower than this.
const BRACKET_WIDTH: f64 = 1e-12;

/// Result of a weight search. A non-converged search still reports the best point it found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizeOutcome {
    /// The weight with the smallest |d/da| seen so far.
    pub a: f64,
    /// d/da of the objective at `a`.
    pub derivative: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// d/da log (a exp(ll_pos) + (1-a) exp(ll_neg)) = (p - n) / (a p + (1-a) n).
/// The larger log likelihood is subtracted first, as the ratio is scale-free.
pub fn sensitivity(a: f64, ll_pos: f64, ll_neg: f64) -> f64 {
    let (pp, pn) = scaled(ll_pos, ll_neg);
    (pp - pn) / (a * pp + (1f64 - a) * pn)
}

fn scaled(ll_pos: f64, ll_neg: f64) -> (f64, f64) {
    let sub = ll_pos.max(ll_neg);
    ((ll_pos - sub).exp(), (ll_neg - sub).exp())
}

/// log (a exp(ll_pos) + (1-a) exp(ll_neg)).
pub fn mixture_log_likelihood(a: f64, ll_pos: f64, ll_neg: f64) -> f64 {
    let sub = ll_pos.max(ll_neg);
    let (pp, pn) = scaled(ll_pos, ll_neg);
    sub + (a * pp + (1f64 - a) * pn).ln()
}

/// Validate a weight given from outside and keep it `clamp` away from 0 and 1,
/// exactly as the rows and the search see it.
pub fn clamp_weight(a: f64, clamp: f64) -> Result<f64> {
    match a.is_finite() && (0f64..=1f64).contains(&a) {
        true => Ok(a.max(clamp).min(1f64 - clamp)),
        false => Err(FisherError::InvalidWeight(a)),
    }
}

fn degeneracy(seq_index: usize, value: f64) -> FisherError {
    FisherError::NumericDegeneracy {
        seq_index,
        side: Side::Mixture,
        parameter: None,
        value,
    }
}

// The scaled mixture a p + (1-a) n. It must be positive and finite.
fn checked_mixture(a: f64, seq_index: usize, (ll_pos, ll_neg): (f64, f64)) -> Result<(f64, f64, f64)> {
    let (pp, pn) = scaled(ll_pos, ll_neg);
    let mixture = a * pp + (1f64 - a) * pn;
    match mixture.is_finite() && 0f64 < mixture {
        true => Ok((pp, pn, mixture)),
        false => Err(degeneracy(seq_index, mixture)),
    }
}

fn checked_sensitivity(a: f64, seq_index: usize, lk: (f64, f64)) -> Result<f64> {
    let (pp, pn, mixture) = checked_mixture(a, seq_index, lk)?;
    let value = (pp - pn) / mixture;
    match value.is_finite() {
        true => Ok(value),
        false => Err(degeneracy(seq_index, value)),
    }
}

/// sum_i log (a Pr{x_i|pos} + (1-a) Pr{x_i|neg}), in the order of `lks`.
/// Fails if the mixture of some sequence is not positive.
pub fn aggregate_mixture_log_likelihood(a: f64, lks: &[(f64, f64)]) -> Result<f64> {
    lks.iter()
        .enumerate()
        .map(|(i, &lk)| -> Result<f64> {
            let (_, _, mixture) = checked_mixture(a, i, lk)?;
            Ok(lk.0.max(lk.1) + mixture.ln())
        })
        .sum()
}

/// Sum of the per-sequence sensitivities, in the order of `lks`.
/// Exactly the same as adding up `sensitivity` of each sequence one by one.
pub fn aggregate_sensitivity(a: f64, lks: &[(f64, f64)]) -> Result<f64> {
    lks.iter()
        .enumerate()
        .map(|(i, &lk)| checked_sensitivity(a, i, lk))
        .sum()
}

/// The first and the second derivative of the objective at `a`.
fn derivatives(a: f64, lks: &[(f64, f64)]) -> Result<(f64, f64)> {
    let (mut first, mut second) = (0f64, 0f64);
    for (i, &lk) in lks.iter().enumerate() {
        let d = checked_sensitivity(a, i, lk)?;
        first += d;
        second -= d * d;
    }
    Ok((first, second))
}

/// Safeguarded Newton's method on d/da inside a shrinking bracket.
#[derive(Debug, Clone, Copy)]
pub struct WeightOptimizer {
    tolerance: f64,
    max_iter: usize,
    clamp: f64,
}

impl WeightOptimizer {
    pub fn new(tolerance: f64, max_iter: usize, clamp: f64) -> Self {
        Self {
            tolerance,
            max_iter,
            clamp,
        }
    }
    /// Find the stationary point of the objective, starting from `initial`.
    /// `lks` are the (log Pr{x_i|pos}, log Pr{x_i|neg}) of each sequence, all finite.
    /// Each iteration evaluates d/da once. If the optimum lies on the boundary,
    /// the bracket collapses to it and the search is regarded as converged.
    pub fn optimize(&self, lks: &[(f64, f64)], initial: f64) -> Result<OptimizeOutcome> {
        let mut a = clamp_weight(initial, self.clamp)?;
        let (mut lower, mut upper) = (0f64, 1f64);
        let mut best: Option<(f64, f64)> = None;
        for iter in 1..=self.max_iter {
            let (first, second) = derivatives(a, lks)?;
            trace!("OPT\t{}\t{:.6e}\t{:.3e}\t[{:.6e},{:.6e}]", iter, a, first, lower, upper);
            if best.map(|(_, d)| first.abs() < d.abs()).unwrap_or(true) {
                best = Some((a, first));
            }
            if first.abs() < self.tolerance {
                return Ok(self.outcome(a, first, iter, true));
            }
            if 0f64 < first {
                lower = a;
            } else {
                upper = a;
            }
            if upper - lower < BRACKET_WIDTH {
                let (a, first) = best.unwrap_or((a, first));
                return Ok(self.outcome(a, first, iter, true));
            }
            // The second derivative is strictly negative unless every term is zero,
            // in which case `first` is zero as well and we have returned already.
            let newton = a - first / second;
            a = match lower < newton && newton < upper {
                true => newton,
                false => (lower + upper) / 2f64,
            };
        }
        let (a, first) = best.unwrap_or((a, f64::NAN));
        debug!("OPT\tDid not converge in {} iterations. a={}", self.max_iter, a);
        Ok(self.outcome(a, first, self.max_iter, false))
    }
    fn outcome(&self, a: f64, derivative: f64, iterations: usize, converged: bool) -> OptimizeOutcome {
        OptimizeOutcome {
            a,
            derivative,
            iterations,
            converged,
        }
    }
}

impl std::convert::From<&FisherConfig> for WeightOptimizer {
    fn from(config: &FisherConfig) -> Self {
        Self::new(config.tolerance, config.max_iter, config.clamp)
    }
}
