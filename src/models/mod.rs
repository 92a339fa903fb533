//! Analysis state owned across propensity, trimming, stratification and
//! estimation steps.

pub mod causal;

pub use causal::CausalModel;
