//! Per-stratum effect estimates from a within-bin regression.
//!
//! A stratum that is too small for `[1, D, X]`, or whose design is rank
//! deficient, reports [`CausalError::DegenerateStratum`].

use std::cell::OnceCell;

use nalgebra::{DMatrix, DVector};

use crate::data::Sample;
use crate::error::{CausalError, Result};
use crate::math::LeastSquares;

/// One propensity bin: the units falling in it and their scores.
///
/// The within-stratum regression `Y ~ [1, D, X]` is fitted on first use and
/// shared by [`Stratum::within`] and [`Stratum::se`].
#[derive(Debug, Clone)]
pub struct Stratum {
    index: usize,
    sample: Sample,
    pscore: DVector<f64>,
    regression: OnceCell<Option<LeastSquares>>,
}

impl Stratum {
    pub fn new(index: usize, sample: Sample, pscore: DVector<f64>) -> Self {
        Self {
            index,
            sample,
            pscore,
            regression: OnceCell::new(),
        }
    }

    /// Position of the stratum in its stratification.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn pscore(&self) -> &DVector<f64> {
        &self.pscore
    }

    pub fn n(&self) -> usize {
        self.sample.n()
    }

    pub fn n_treated(&self) -> usize {
        self.sample.n_treated()
    }

    pub fn n_control(&self) -> usize {
        self.sample.n_control()
    }

    /// Regression-adjusted treatment effect within the stratum.
    pub fn within(&self) -> Result<f64> {
        Ok(self.regression()?.coefficients()[1])
    }

    /// Heteroskedasticity-robust standard error of [`Stratum::within`].
    pub fn se(&self) -> Result<f64> {
        self.regression()?.robust_std_err(1).ok_or_else(|| self.degenerate())
    }

    fn regression(&self) -> Result<&LeastSquares> {
        if self.n() < self.required_units() {
            return Err(self.degenerate());
        }
        self.regression
            .get_or_init(|| LeastSquares::fit(self.design(), self.sample.outcome()))
            .as_ref()
            .ok_or_else(|| self.degenerate())
    }

    /// `[1, D, X]`
    fn design(&self) -> DMatrix<f64> {
        let (n, k) = (self.sample.n(), self.sample.k());
        let mut z = DMatrix::<f64>::zeros(n, k + 2);
        z.column_mut(0).fill(1.0);
        for (i, &d) in self.sample.treatment().iter().enumerate() {
            z[(i, 1)] = if d { 1.0 } else { 0.0 };
        }
        z.columns_mut(2, k).copy_from(self.sample.covariates());
        z
    }

    fn required_units(&self) -> usize {
        self.sample.k() + 2
    }

    fn degenerate(&self) -> CausalError {
        CausalError::DegenerateStratum {
            index: self.index,
            units: self.n(),
            required: self.required_units(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stratum(y: &[f64], d: &[bool], x: &[f64]) -> Stratum {
        let rows: Vec<Vec<f64>> = x.iter().map(|&v| vec![v]).collect();
        let sample = Sample::from_rows(y, d, &rows).unwrap();
        let n = sample.n();
        Stratum::new(0, sample, DVector::from_element(n, 0.5))
    }

    #[test]
    fn within_recovers_constant_effect() {
        // y = 1 + 2 d + 0.5 x, exactly.
        let d = [true, false, true, false, true, false];
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = d
            .iter()
            .zip(&x)
            .map(|(&di, &xi)| 1.0 + if di { 2.0 } else { 0.0 } + 0.5 * xi)
            .collect();
        let s = stratum(&y, &d, &x);
        assert_relative_eq!(s.within().unwrap(), 2.0, epsilon = 1e-10);
        assert!(s.se().unwrap() < 1e-8);
    }

    #[test]
    fn se_matches_explicit_sandwich() {
        let d = [true, false, true, false, true, false, true, false];
        let x = [0.3, 1.1, 2.0, 2.9, 4.2, 5.0, 0.7, 3.3];
        let y = [2.1, 1.4, 4.0, 2.2, 5.5, 3.1, 2.0, 3.0];
        let s = stratum(&y, &d, &x);

        let z = s.design();
        let fit = LeastSquares::fit(z.clone(), s.sample().outcome()).unwrap();
        let a = (z.transpose() * &z).try_inverse().unwrap();
        let u2 = fit.residuals().map(|v| v * v);
        let meat = z.transpose() * DMatrix::from_diagonal(&u2) * &z;
        let cov = &a * meat * &a;

        assert_relative_eq!(s.within().unwrap(), fit.coefficients()[1], epsilon = 1e-12);
        assert_relative_eq!(s.se().unwrap(), cov[(1, 1)].sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn too_few_units_or_one_group_is_degenerate() {
        let s = stratum(&[1.0, 2.0], &[true, false], &[0.0, 1.0]);
        assert!(matches!(
            s.within(),
            Err(CausalError::DegenerateStratum { units: 2, required: 3, .. })
        ));

        let s = stratum(&[1.0, 2.0, 3.0, 4.0], &[true; 4], &[0.0, 1.0, 2.0, 4.0]);
        assert!(matches!(s.se(), Err(CausalError::DegenerateStratum { .. })));
    }
}
