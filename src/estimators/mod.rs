//! Regression and weighting estimators on the full (possibly trimmed) sample.

pub mod regression;

pub use regression::{ols, weighting};
