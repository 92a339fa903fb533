//! Error type shared by every estimator.
//!
//! All failures propagate synchronously to the caller. Nothing is retried
//! automatically.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CausalError {
    /// Input arrays disagree on their leading dimension.
    #[error("shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Input data is unusable (non-finite values, empty sample).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A parameter supplied by the caller is out of its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing propensity score: fit one before calling this operation")]
    MissingPropensityScore,

    #[error("missing strata: stratify the sample before calling blocking")]
    MissingStrata,

    /// The logistic likelihood maximization did not converge.
    #[error("propensity fit failed: {0}")]
    FitFailure(String),

    /// A stratum is too small (or too unbalanced) for its within regression.
    #[error("stratum {index} is degenerate: {units} units, at least {required} required with a full-rank design")]
    DegenerateStratum {
        index: usize,
        units: usize,
        required: usize,
    },

    /// A least-squares design is rank deficient.
    #[error("singular design: {0}")]
    SingularDesign(String),

    /// Fewer opposite-group units exist than matches requested.
    #[error("insufficient matching pool: {needed} matches requested, {available} available")]
    InsufficientPool { needed: usize, available: usize },

    /// An estimator needs both treated and control units.
    #[error("no {0} units in the sample")]
    EmptyGroup(&'static str),
}

pub type Result<T> = std::result::Result<T, CausalError>;
