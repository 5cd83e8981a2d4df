//! The capability a generative sequence model has to expose to be turned into Fisher features.
use crate::error::Result;

/// A trained model together with the sequences it is evaluated on.
///
/// Every method must be deterministic for a fixed model state and free of side effects,
/// so that rows can be computed in any order and on any thread.
pub trait DerivativeProvider {
    /// Number of sequences in the domain of this provider.
    fn sequence_count(&self) -> usize;
    /// Number of free parameters. It should not change during the life of the provider.
    fn parameter_count(&self) -> usize;
    /// log Pr{x_{seq_index} | self}.
    fn log_likelihood(&self, seq_index: usize) -> Result<f64>;
    /// d/d(theta_j) log Pr{x_{seq_index} | self}.
    fn derivative(&self, seq_index: usize, parameter_index: usize) -> Result<f64>;
    /// Fill `out` with all the derivatives of the `seq_index`-th sequence.
    /// `out.len()` should be `self.parameter_count()`.
    /// Override this when the derivatives share a dynamic programming pass.
    fn derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<()> {
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = self.derivative(seq_index, j)?;
        }
        Ok(())
    }
    /// Fill `out` as `derivatives` does and return `log_likelihood` of the same sequence.
    /// Override this when both come out of the same dynamic programming pass.
    fn log_likelihood_and_derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<f64> {
        let lk = self.log_likelihood(seq_index)?;
        self.derivatives(seq_index, out)?;
        Ok(lk)
    }
}

impl<P: DerivativeProvider + ?Sized> DerivativeProvider for std::sync::Arc<P> {
    fn sequence_count(&self) -> usize {
        (**self).sequence_count()
    }
    fn parameter_count(&self) -> usize {
        (**self).parameter_count()
    }
    fn log_likelihood(&self, seq_index: usize) -> Result<f64> {
        (**self).log_likelihood(seq_index)
    }
    fn derivative(&self, seq_index: usize, parameter_index: usize) -> Result<f64> {
        (**self).derivative(seq_index, parameter_index)
    }
    fn derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<()> {
        (**self).derivatives(seq_index, out)
    }
    fn log_likelihood_and_derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<f64> {
        (**self).log_likelihood_and_derivatives(seq_index, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FisherError;
    struct Linear {
        xs: Vec<f64>,
    }
    impl DerivativeProvider for Linear {
        fn sequence_count(&self) -> usize {
            self.xs.len()
        }
        fn parameter_count(&self) -> usize {
            3
        }
        fn log_likelihood(&self, seq_index: usize) -> Result<f64> {
            self.xs
                .get(seq_index)
                .map(|x| -x)
                .ok_or(FisherError::InvalidIndex {
                    index: seq_index,
                    count: self.xs.len(),
                })
        }
        fn derivative(&self, seq_index: usize, parameter_index: usize) -> Result<f64> {
            let x = self.log_likelihood(seq_index)?;
            Ok(x * parameter_index as f64)
        }
    }
    #[test]
    fn default_derivatives() {
        let model = Linear {
            xs: vec![1f64, 2f64],
        };
        let mut out = vec![0f64; 3];
        model.derivatives(1, &mut out).unwrap();
        assert_eq!(out, vec![-0f64, -2f64, -4f64]);
        let err = model.derivatives(2, &mut out).unwrap_err();
        assert_eq!(err, FisherError::InvalidIndex { index: 2, count: 2 });
        let shared = std::sync::Arc::new(model);
        assert_eq!(shared.parameter_count(), 3);
        assert_eq!(shared.log_likelihood(0).unwrap(), -1f64);
        let lk = shared.log_likelihood_and_derivatives(1, &mut out).unwrap();
        assert_eq!(lk, -2f64);
        assert_eq!(out, vec![-0f64, -2f64, -4f64]);
    }
}
