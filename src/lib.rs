//! Fisher-kernel features from a positive and a negative generative sequence model.
//! Each sequence is mapped to the gradient of the log-likelihood of the mixture
//! `a * Pr{x|pos} + (1-a) * Pr{x|neg}` with respect to the parameters of both models.
#[macro_use]
extern crate log;
pub mod assembler;
pub mod cache;
pub mod error;
pub mod features;
pub mod gen_seq;
pub mod hmm;
pub mod optimizer;
pub mod provider;
use serde::{Deserialize, Serialize};

pub use assembler::Assembler;
pub use cache::{FeatureCache, FeatureMatrix};
pub use error::{FisherError, Result, Side};
pub use features::{FisherFeatures, MixingWeight};
pub use optimizer::OptimizeOutcome;
pub use provider::DerivativeProvider;

/// The weight used while `a` is neither set nor optimized.
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Scalar terms appended after the two derivative blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarTerms {
    /// `log Pr{x|pos} - log Pr{x|neg}`.
    LogRatio,
    /// The log ratio, then `d/da log (a Pr{x|pos} + (1-a) Pr{x|neg})`.
    LogRatioAndSensitivity,
}

impl ScalarTerms {
    pub fn len(&self) -> usize {
        match self {
            ScalarTerms::LogRatio => 1,
            ScalarTerms::LogRatioAndSensitivity => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Configurations
pub struct FisherConfig {
    /// `a` is clamped into `[clamp, 1 - clamp]` when combining the two models.
    pub clamp: f64,
    /// The optimizer stops when |d/da| falls below this value.
    pub tolerance: f64,
    pub max_iter: usize,
    pub scalar_terms: ScalarTerms,
}

impl FisherConfig {
    pub fn new(clamp: f64, tolerance: f64, max_iter: usize, scalar_terms: ScalarTerms) -> Self {
        Self {
            clamp,
            tolerance,
            max_iter,
            scalar_terms,
        }
    }
}

impl std::default::Default for FisherConfig {
    fn default() -> Self {
        Self::new(1e-10, 1e-10, 100, ScalarTerms::LogRatio)
    }
}
