//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during estimation
//! - handed to a reporting layer after the fact
//! - stored alongside an analysis for later comparison

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Default trimming cutoff for propensity scores.
pub const DEFAULT_CUTOFF: f64 = 0.1;

/// Default number of equal-mass propensity blocks.
pub const DEFAULT_BLOCK_COUNT: usize = 5;

/// Default likelihood-ratio critical value for linear terms.
pub const DEFAULT_C_LIN: f64 = 1.0;

/// Default likelihood-ratio critical value for quadratic terms.
pub const DEFAULT_C_QUA: f64 = 2.71;

/// Treatment arm of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Treated,
    Control,
}

impl Group {
    pub fn of(treated: bool) -> Self {
        if treated { Group::Treated } else { Group::Control }
    }

    pub fn opposite(self) -> Self {
        match self {
            Group::Treated => Group::Control,
            Group::Control => Group::Treated,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Group::Treated => "treated",
            Group::Control => "control",
        }
    }
}

/// L-BFGS settings for the logistic likelihood maximization.
///
/// The objective is the *mean* negative log-likelihood, so `tol_grad` does not
/// need to scale with the sample size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum number of quasi-Newton iterations.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol_grad: f64,
    /// Absolute change in cost below which the solver stops.
    pub tol_cost: f64,
    /// Number of correction pairs kept for the inverse-Hessian approximation.
    pub memory: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol_grad: 1e-8,
            tol_cost: 1e-12,
            memory: 7,
        }
    }
}

/// Which covariate columns enter the propensity design matrix.
///
/// Indices are zero-based columns of the covariate matrix. A quadratic term
/// `(i, j)` contributes the product of columns `i` and `j`; `(i, i)` is a square.
/// The intercept is always present and is not listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSpec {
    pub linear: Vec<usize>,
    pub quadratic: Vec<(usize, usize)>,
}

impl TermSpec {
    /// Every covariate linearly, no quadratic terms.
    pub fn all_linear(k: usize) -> Self {
        Self {
            linear: (0..k).collect(),
            quadratic: Vec::new(),
        }
    }

    /// Number of design columns, intercept included.
    pub fn width(&self) -> usize {
        1 + self.linear.len() + self.quadratic.len()
    }
}

/// Options for stepwise propensity term selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionOptions {
    /// Columns always included linearly, regardless of the test.
    pub forced_linear: Vec<usize>,
    /// Critical value for linear candidates. `0` includes every covariate.
    pub c_lin: f64,
    /// Critical value for quadratic candidates. `0` includes every pair,
    /// `f64::INFINITY` includes none.
    pub c_qua: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            forced_linear: Vec::new(),
            c_lin: DEFAULT_C_LIN,
            c_qua: DEFAULT_C_QUA,
        }
    }
}

/// How to partition the propensity score range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blocks {
    /// Number of equal-mass bins.
    Count(usize),
    /// Explicit, strictly increasing boundaries.
    Boundaries(Vec<f64>),
}

impl Default for Blocks {
    fn default() -> Self {
        Blocks::Count(DEFAULT_BLOCK_COUNT)
    }
}

/// Distance used to rank candidate matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `Σ_k (Δx_k)² / var(x_k)` with the full-sample covariate variances.
    InverseVariance,
    /// Quadratic form with the inverse sample covariance matrix.
    Mahalanobis,
    /// Quadratic form `Δxᵀ W Δx` with a caller-supplied K×K matrix.
    Custom(DMatrix<f64>),
}

/// Nearest-neighbor matching options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingOptions {
    pub metric: DistanceMetric,
    /// Matches per subject before tie inclusion.
    pub m: usize,
    /// Apply the regression bias correction for imperfect matches.
    pub bias_adjust: bool,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::InverseVariance,
            m: 1,
            bias_adjust: false,
        }
    }
}

/// Which estimator produced an [`Estimates`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Estimator {
    Blocking,
    Matching,
    Ols,
    Weighting,
}

impl Estimator {
    pub fn display_name(self) -> &'static str {
        match self {
            Estimator::Blocking => "Blocking",
            Estimator::Matching => "Matching",
            Estimator::Ols => "OLS",
            Estimator::Weighting => "Weighting",
        }
    }
}

/// A point estimate with its standard error, when one is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub estimate: f64,
    pub std_err: Option<f64>,
}

impl Effect {
    pub fn new(estimate: f64, std_err: Option<f64>) -> Self {
        Self { estimate, std_err }
    }

    pub fn point(estimate: f64) -> Self {
        Self {
            estimate,
            std_err: None,
        }
    }
}

/// Treatment-effect estimates from the most recent estimator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimates {
    pub method: Estimator,
    pub ate: Effect,
    pub att: Option<Effect>,
    pub atc: Option<Effect>,
}
