use thiserror::Error;

/// Which of the two models a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
    /// The mixture of the two models.
    Mixture,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Positive => write!(f, "positive"),
            Side::Negative => write!(f, "negative"),
            Side::Mixture => write!(f, "mixture"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FisherError {
    /// Sequence index outside of the models' sequence domain.
    #[error("Invalid sequence index: {index} (sequence count: {count})")]
    InvalidIndex { index: usize, count: usize },
    /// The two models disagree on the number of sequences, or have none.
    #[error("Model mismatch: positive model has {positive} sequences, negative model has {negative}")]
    ModelMismatch { positive: usize, negative: usize },
    /// A likelihood (`parameter` is `None`) or a derivative evaluated to a non-finite value.
    #[error("Non-finite value {value} in the {side} model at sequence {seq_index} (parameter: {parameter:?})")]
    NumericDegeneracy {
        seq_index: usize,
        side: Side,
        parameter: Option<usize>,
        value: f64,
    },
    /// Destination buffer does not have the feature length.
    #[error("Buffer length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Invalid mixing weight: {0}")]
    InvalidWeight(f64),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

pub type Result<T> = std::result::Result<T, FisherError>;
