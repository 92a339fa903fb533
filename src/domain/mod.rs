//! Domain types used throughout the estimators.
//!
//! This module defines:
//!
//! - option structs with their defaults (`OptimizerConfig`, `SelectionOptions`, `MatchingOptions`)
//! - propensity term specifications (`TermSpec`) and block layouts (`Blocks`)
//! - estimation outputs (`Estimates`, `Effect`)

pub mod types;

pub use types::*;
