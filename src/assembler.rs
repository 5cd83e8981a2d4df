//! Combine the outputs of the two derivative providers into one feature vector.
use crate::error::{FisherError, Result, Side};
use crate::optimizer::sensitivity;
use crate::provider::DerivativeProvider;
use crate::{FisherConfig, ScalarTerms};
use std::sync::Arc;

/// The layout of a row is
/// `[r * d log Pr{x|pos}, (1-r) * d log Pr{x|neg}, log Pr{x|pos} - log Pr{x|neg}, (d/da)?]`,
/// where `r = a Pr{x|pos} / (a Pr{x|pos} + (1-a) Pr{x|neg})` is the posterior of the positive model.
/// In other words, the first two blocks are the gradient of the log mixture likelihood.
/// The assembler does not keep any result; `compute` is a pure function of the index,
/// the two models, and the weight.
#[derive(Debug)]
pub struct Assembler<P: ?Sized> {
    pos: Arc<P>,
    neg: Arc<P>,
    pos_params: usize,
    neg_params: usize,
    clamp: f64,
    scalar_terms: ScalarTerms,
}

impl<P: ?Sized> Clone for Assembler<P> {
    fn clone(&self) -> Self {
        Self {
            pos: self.pos.clone(),
            neg: self.neg.clone(),
            pos_params: self.pos_params,
            neg_params: self.neg_params,
            clamp: self.clamp,
            scalar_terms: self.scalar_terms,
        }
    }
}

fn check_finite(value: f64, seq_index: usize, side: Side, parameter: Option<usize>) -> Result<f64> {
    match value.is_finite() {
        true => Ok(value),
        false => Err(FisherError::NumericDegeneracy {
            seq_index,
            side,
            parameter,
            value,
        }),
    }
}

impl<P: DerivativeProvider + ?Sized> Assembler<P> {
    pub fn new(pos: Arc<P>, neg: Arc<P>, config: &FisherConfig) -> Self {
        let (pos_params, neg_params) = (pos.parameter_count(), neg.parameter_count());
        Self {
            pos,
            neg,
            pos_params,
            neg_params,
            clamp: config.clamp,
            scalar_terms: config.scalar_terms,
        }
    }
    pub fn positive(&self) -> &Arc<P> {
        &self.pos
    }
    pub fn negative(&self) -> &Arc<P> {
        &self.neg
    }
    /// Length of a feature vector.
    pub fn num_features(&self) -> usize {
        self.pos_params + self.neg_params + self.scalar_terms.len()
    }
    /// The common number of sequences. Fails if the two models disagree or have no sequence.
    pub fn sequence_count(&self) -> Result<usize> {
        let (positive, negative) = (self.pos.sequence_count(), self.neg.sequence_count());
        match positive == negative && positive > 0 {
            true => Ok(positive),
            false => Err(FisherError::ModelMismatch { positive, negative }),
        }
    }
    pub fn check_index(&self, seq_index: usize) -> Result<()> {
        let count = self.sequence_count()?;
        match seq_index < count {
            true => Ok(()),
            false => Err(FisherError::InvalidIndex {
                index: seq_index,
                count,
            }),
        }
    }
    /// (log Pr{x|pos}, log Pr{x|neg}), both finite.
    pub fn likelihoods(&self, seq_index: usize) -> Result<(f64, f64)> {
        self.check_index(seq_index)?;
        let ll_pos = self.pos.log_likelihood(seq_index)?;
        let ll_pos = check_finite(ll_pos, seq_index, Side::Positive, None)?;
        let ll_neg = self.neg.log_likelihood(seq_index)?;
        let ll_neg = check_finite(ll_neg, seq_index, Side::Negative, None)?;
        Ok((ll_pos, ll_neg))
    }
    fn clamped(&self, a: f64) -> f64 {
        a.max(self.clamp).min(1f64 - self.clamp)
    }
    /// Posterior probability of the positive model. Computed in log space.
    pub fn responsibility(&self, a: f64, ll_pos: f64, ll_neg: f64) -> f64 {
        let a = self.clamped(a);
        let pos = a.ln() + ll_pos;
        let neg = (1f64 - a).ln() + ll_neg;
        1f64 / (1f64 + (neg - pos).exp())
    }
    /// Compute the feature vector of the `seq_index`-th sequence under weight `a` into `dest`.
    /// `dest` is written only when every value has been computed successfully.
    pub fn compute(&self, seq_index: usize, a: f64, dest: &mut [f64]) -> Result<()> {
        let len = self.num_features();
        if dest.len() != len {
            return Err(FisherError::LengthMismatch {
                expected: len,
                found: dest.len(),
            });
        }
        self.check_index(seq_index)?;
        let mut row = vec![0f64; len];
        let (pos_block, rest) = row.split_at_mut(self.pos_params);
        let (neg_block, scalars) = rest.split_at_mut(self.neg_params);
        let ll_pos = self.pos.log_likelihood_and_derivatives(seq_index, pos_block)?;
        let ll_pos = check_finite(ll_pos, seq_index, Side::Positive, None)?;
        let ll_neg = self.neg.log_likelihood_and_derivatives(seq_index, neg_block)?;
        let ll_neg = check_finite(ll_neg, seq_index, Side::Negative, None)?;
        let r = self.responsibility(a, ll_pos, ll_neg);
        for (j, x) in pos_block.iter_mut().enumerate() {
            *x = r * check_finite(*x, seq_index, Side::Positive, Some(j))?;
        }
        for (j, x) in neg_block.iter_mut().enumerate() {
            *x = (1f64 - r) * check_finite(*x, seq_index, Side::Negative, Some(j))?;
        }
        scalars[0] = ll_pos - ll_neg;
        if self.scalar_terms == ScalarTerms::LogRatioAndSensitivity {
            let sens = sensitivity(self.clamped(a), ll_pos, ll_neg);
            scalars[1] = check_finite(sens, seq_index, Side::Mixture, None)?;
        }
        trace!("ROW\t{}\t{:.3}\t{:.3}\t{:.3}", seq_index, ll_pos, ll_neg, r);
        dest.copy_from_slice(&row);
        Ok(())
    }
}
