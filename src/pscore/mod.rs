//! Propensity score estimation.
//!
//! Responsibilities:
//!
//! - build the logit design matrix from the chosen terms
//! - fit the logit by maximum likelihood (`optimizer`)
//! - choose terms by stepwise likelihood-ratio tests (`selection`)

pub mod optimizer;
pub mod selection;

use nalgebra::{DMatrix, DVector};

use crate::domain::{OptimizerConfig, TermSpec};
use crate::error::{CausalError, Result};
use crate::math::sigmoid;

pub use optimizer::{maximize_loglike, LogitFit};
pub use selection::select_terms;

/// A fitted propensity score.
#[derive(Debug, Clone)]
pub struct PropensityScore {
    /// Terms of the design matrix the coefficients refer to.
    pub terms: TermSpec,
    /// Intercept first, then linear terms, then quadratic terms.
    pub coefficients: DVector<f64>,
    pub loglike: f64,
    /// Fitted probability per unit of the current sample.
    pub fitted: DVector<f64>,
    pub n_iter: u64,
}

impl PropensityScore {
    /// The same fit restricted to the units where `keep` is true.
    pub fn filter(&self, keep: &[bool]) -> Self {
        let idx: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        Self {
            fitted: self.fitted.select_rows(idx.iter()),
            ..self.clone()
        }
    }

    pub fn min(&self) -> f64 {
        self.fitted.min()
    }

    pub fn max(&self) -> f64 {
        self.fitted.max()
    }
}

/// Check that every term refers to an existing covariate column.
pub fn validate_terms(terms: &TermSpec, k: usize) -> Result<()> {
    let bad_linear = terms.linear.iter().find(|&&j| j >= k);
    let bad_quadratic = terms.quadratic.iter().find(|&&(a, b)| a >= k || b >= k);
    if let Some(j) = bad_linear {
        return Err(CausalError::InvalidArgument(format!(
            "linear term {j} out of range for {k} covariates"
        )));
    }
    if let Some((a, b)) = bad_quadratic {
        return Err(CausalError::InvalidArgument(format!(
            "quadratic term ({a}, {b}) out of range for {k} covariates"
        )));
    }
    Ok(())
}

/// Design matrix `[1, X[:, linear], X[:, a] * X[:, b] for (a, b) in quadratic]`.
///
/// # Panics
/// Panics if a term index is out of range; call [`validate_terms`] first.
pub fn design_matrix(covariates: &DMatrix<f64>, terms: &TermSpec) -> DMatrix<f64> {
    let n = covariates.nrows();
    let mut z = DMatrix::<f64>::zeros(n, terms.width());
    z.column_mut(0).fill(1.0);

    let mut col = 1;
    for &j in &terms.linear {
        z.column_mut(col).copy_from(&covariates.column(j));
        col += 1;
    }
    for &(a, b) in &terms.quadratic {
        z.column_mut(col)
            .copy_from(&covariates.column(a).component_mul(&covariates.column(b)));
        col += 1;
    }
    z
}

/// Fit the propensity score for `terms`.
pub fn fit(
    covariates: &DMatrix<f64>,
    treatment: &[bool],
    terms: &TermSpec,
    config: &OptimizerConfig,
) -> Result<PropensityScore> {
    validate_terms(terms, covariates.ncols())?;
    let design = design_matrix(covariates, terms);
    let logit = maximize_loglike(&design, treatment, config)?;
    let fitted = (&design * &logit.coefficients).map(sigmoid);

    Ok(PropensityScore {
        terms: terms.clone(),
        coefficients: logit.coefficients,
        loglike: logit.loglike,
        fitted,
        n_iter: logit.n_iter,
    })
}

/// Maximized log-likelihood for `terms`, without building fitted values.
pub(crate) fn loglike_of(
    covariates: &DMatrix<f64>,
    treatment: &[bool],
    terms: &TermSpec,
    config: &OptimizerConfig,
) -> Result<f64> {
    let design = design_matrix(covariates, terms);
    Ok(maximize_loglike(&design, treatment, config)?.loglike)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{simulate, SelectionLink, SimulationParams};
    use approx::assert_relative_eq;

    #[test]
    fn design_matrix_layout() {
        let x = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let terms = TermSpec {
            linear: vec![2, 0],
            quadratic: vec![(0, 0), (1, 2)],
        };
        let z = design_matrix(&x, &terms);
        assert_eq!(z.shape(), (2, 5));
        assert_eq!(z.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 3.0, 1.0, 1.0, 6.0]);
        assert_eq!(z.row(1).iter().copied().collect::<Vec<_>>(), vec![1.0, 6.0, 4.0, 16.0, 30.0]);
    }

    #[test]
    fn out_of_range_terms_are_rejected() {
        let x = DMatrix::zeros(4, 2);
        let terms = TermSpec {
            linear: vec![0],
            quadratic: vec![(0, 2)],
        };
        let err = fit(&x, &[true, false, true, false], &terms, &OptimizerConfig::default()).unwrap_err();
        assert!(matches!(err, CausalError::InvalidArgument(_)));
    }

    #[test]
    fn logit_fit_recovers_selection_coefficients() {
        let mut params = SimulationParams::new(4000, 2);
        params.link = SelectionLink::Logit;
        params.seed = 11;
        let data = simulate(&params).unwrap();
        let s = &data.sample;

        let ps = fit(
            s.covariates(),
            s.treatment(),
            &TermSpec::all_linear(2),
            &OptimizerConfig::default(),
        )
        .unwrap();

        assert_eq!(ps.coefficients.len(), 3);
        assert!(ps.coefficients[0].abs() < 0.2);
        assert!((ps.coefficients[1] - 1.0).abs() < 0.2);
        assert!((ps.coefficients[2] - 1.0).abs() < 0.2);
        assert!(ps.fitted.iter().all(|&p| p > 0.0 && p < 1.0));
        assert!(ps.loglike < 0.0);

        // Score equations: Σ (d - p) x = 0 at the MLE.
        let resid: f64 = s
            .treatment()
            .iter()
            .zip(ps.fitted.iter())
            .map(|(&d, &p)| if d { 1.0 - p } else { -p })
            .sum();
        assert_relative_eq!(resid / s.n() as f64, 0.0, epsilon = 1e-5);
    }
}
