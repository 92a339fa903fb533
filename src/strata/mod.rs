//! Stratification on the propensity score and the blocking estimator.

pub mod blocks;
pub mod stratum;

use nalgebra::DVector;

use crate::data::Sample;
use crate::domain::{Blocks, Effect, Estimates, Estimator};
use crate::error::{CausalError, Result};

pub use blocks::{adaptive_boundaries, equal_mass_boundaries, stratify, validate_boundaries};
pub use stratum::Stratum;

/// Strata of the current sample together with the boundaries that made them.
#[derive(Debug, Clone)]
pub struct Stratification {
    pub boundaries: Vec<f64>,
    pub strata: Vec<Stratum>,
}

impl Stratification {
    /// Stratify on `blocks`: a bin count means equal-mass bins on `fitted`.
    pub fn build(sample: &Sample, fitted: &DVector<f64>, blocks: &Blocks) -> Result<Self> {
        let boundaries = match blocks {
            Blocks::Count(count) => equal_mass_boundaries(fitted, *count)?,
            Blocks::Boundaries(list) => {
                validate_boundaries(list)?;
                list.clone()
            }
        };
        Self::from_boundaries(sample, fitted, boundaries)
    }

    /// Stratify on boundaries chosen by [`adaptive_boundaries`].
    pub fn adaptive(sample: &Sample, fitted: &DVector<f64>) -> Result<Self> {
        let boundaries = adaptive_boundaries(fitted, sample.treatment(), sample.k())?;
        Self::from_boundaries(sample, fitted, boundaries)
    }

    fn from_boundaries(sample: &Sample, fitted: &DVector<f64>, boundaries: Vec<f64>) -> Result<Self> {
        let strata = stratify(sample, fitted, &boundaries)?;
        Ok(Self { boundaries, strata })
    }

    pub fn len(&self) -> usize {
        self.strata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strata.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.strata.iter().map(Stratum::n).collect()
    }

    /// Weighted average of the within-stratum effects.
    ///
    /// Weights are each stratum's share of all, treated, or control units.
    /// Empty strata carry zero weight; any other stratum must support the
    /// within regression. Standard errors combine the strata as independent.
    pub fn blocking(&self) -> Result<Estimates> {
        let n: usize = self.strata.iter().map(Stratum::n).sum();
        let n_t: usize = self.strata.iter().map(Stratum::n_treated).sum();
        let n_c = n - n_t;
        if n_t == 0 {
            return Err(CausalError::EmptyGroup("treated"));
        }
        if n_c == 0 {
            return Err(CausalError::EmptyGroup("control"));
        }

        let mut ate = Accumulator::default();
        let mut att = Accumulator::default();
        let mut atc = Accumulator::default();
        for stratum in self.strata.iter().filter(|s| s.n() > 0) {
            let tau = stratum.within()?;
            let se = stratum.se()?;
            ate.add(stratum.n() as f64 / n as f64, tau, se);
            att.add(stratum.n_treated() as f64 / n_t as f64, tau, se);
            atc.add(stratum.n_control() as f64 / n_c as f64, tau, se);
        }

        Ok(Estimates {
            method: Estimator::Blocking,
            ate: ate.effect(),
            att: Some(att.effect()),
            atc: Some(atc.effect()),
        })
    }
}

#[derive(Default)]
struct Accumulator {
    estimate: f64,
    variance: f64,
}

impl Accumulator {
    fn add(&mut self, weight: f64, tau: f64, se: f64) {
        self.estimate += weight * tau;
        self.variance += weight * weight * se * se;
    }

    fn effect(&self) -> Effect {
        Effect::new(self.estimate, Some(self.variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Two score bins with different constant effects and an exact linear fit.
    fn two_bin_sample() -> (Sample, DVector<f64>) {
        let mut y = Vec::new();
        let mut d = Vec::new();
        let mut rows = Vec::new();
        let mut p = Vec::new();
        for i in 0..12 {
            let x = i as f64 * 0.5;
            let treated = i % 3 == 0;
            let (score, effect) = if i < 6 { (0.3, 1.0) } else { (0.7, 4.0) };
            y.push(0.5 + 2.0 * x + if treated { effect } else { 0.0 });
            d.push(treated);
            rows.push(vec![x]);
            p.push(score);
        }
        (Sample::from_rows(&y, &d, &rows).unwrap(), DVector::from_vec(p))
    }

    #[test]
    fn blocking_weights_strata_by_group_shares() {
        let (sample, p) = two_bin_sample();
        let strat = Stratification::build(&sample, &p, &Blocks::Boundaries(vec![0.0, 0.5, 1.0])).unwrap();
        assert_eq!(strat.sizes(), vec![6, 6]);

        let est = strat.blocking().unwrap();
        assert_eq!(est.method, Estimator::Blocking);
        // Both strata hold 2 treated and 4 control units.
        assert_relative_eq!(est.ate.estimate, 2.5, epsilon = 1e-9);
        assert_relative_eq!(est.att.unwrap().estimate, 2.5, epsilon = 1e-9);
        assert_relative_eq!(est.atc.unwrap().estimate, 2.5, epsilon = 1e-9);
        assert!(est.ate.std_err.unwrap() < 1e-6);
    }

    #[test]
    fn empty_strata_are_skipped_but_small_ones_fail() {
        let (sample, p) = two_bin_sample();
        let strat = Stratification::build(&sample, &p, &Blocks::Boundaries(vec![0.0, 0.5, 0.6, 1.0])).unwrap();
        assert_eq!(strat.sizes(), vec![6, 0, 6]);
        assert!(strat.blocking().is_ok());

        let strat = Stratification::build(&sample, &p, &Blocks::Count(0));
        assert!(matches!(strat, Err(CausalError::InvalidArgument(_))));

        // A bin of two units cannot fit [1, D, X].
        let mut scores = p.clone();
        scores[0] = 0.1;
        scores[3] = 0.1;
        let strat = Stratification::build(&sample, &scores, &Blocks::Boundaries(vec![0.0, 0.2, 0.5, 1.0])).unwrap();
        assert!(matches!(
            strat.blocking(),
            Err(CausalError::DegenerateStratum { index: 0, units: 2, .. })
        ));
    }
}
