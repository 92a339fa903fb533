//! Mathematical utilities: logistic link, least squares, descriptive statistics.

pub mod logistic;
pub mod ols;
pub mod stats;

pub use logistic::*;
pub use ols::*;
