//! `causal-estimate` library crate.
//!
//! Average treatment effects (ATE, ATT, ATC) from observational data with a
//! binary treatment, via propensity-score methods:
//!
//! - a logit propensity score with stepwise term selection (`pscore`)
//! - trimming of units with extreme scores (`trim`)
//! - stratification on the score and the blocking estimator (`strata`)
//! - nearest-neighbor matching with optional bias correction (`matching`)
//! - pooled OLS and inverse-probability weighting (`estimators`)
//!
//! `models::CausalModel` ties these steps together into one analysis state.

pub mod data;
pub mod domain;
pub mod error;
pub mod estimators;
pub mod matching;
pub mod math;
pub mod models;
pub mod pscore;
pub mod report;
pub mod strata;
pub mod trim;

pub use data::Sample;
pub use error::{CausalError, Result};
pub use models::CausalModel;
