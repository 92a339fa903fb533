//! Reporting: formatted terminal output for a model and its parts.
//!
//! Formatting lives here so the estimators stay free of presentation code.

pub mod format;

pub use format::{format_balance, format_estimates, format_propensity, format_sample, format_strata, format_summary};
