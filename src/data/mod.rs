//! Sample container and synthetic data generation.

pub mod sample;
pub mod simulate;

pub use sample::Sample;
pub use simulate::{simulate, SelectionLink, SimulatedData, SimulationParams};
