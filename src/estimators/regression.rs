//! Regression-adjusted effects from one pooled least-squares fit.
//!
//! ```text
//! Y = b0 + b1 D + D (X - X̄) b2 + X b3 + e
//! ```
//!
//! `b1` is the ATE. Centering the interaction at the full-sample mean makes
//! the group effects linear in the coefficients:
//! `ATT = b1 + (X̄_t - X̄)·b2` and `ATC = b1 + (X̄_c - X̄)·b2`, so their robust
//! variances are `Cᵀ V C` with `C = [1, X̄_g - X̄]` and `V` the White covariance
//! of `(b1, b2)`.

use nalgebra::{DMatrix, DVector};

use crate::data::Sample;
use crate::domain::{Effect, Estimates, Estimator, Group};
use crate::error::{CausalError, Result};
use crate::math::LeastSquares;

pub fn ols(sample: &Sample) -> Result<Estimates> {
    require_both_groups(sample)?;
    let (n, k) = (sample.n(), sample.k());
    let xbar = sample.covariate_means();

    let design = ols_design(sample, &xbar);
    let fit = LeastSquares::fit(design, sample.outcome()).ok_or_else(|| {
        CausalError::SingularDesign(format!("OLS design with {n} rows and {} columns is rank deficient", 2 + 2 * k))
    })?;
    let beta = fit.coefficients();
    let interaction = beta.rows(2, k);

    let cov = fit
        .robust_covariance(1..2 + k)
        .ok_or_else(|| CausalError::SingularDesign("robust covariance unavailable".to_string()))?;

    let group_effect = |group: Group| -> Effect {
        let shift = sample.group_covariate_means(group) - &xbar;
        let mut c = DVector::<f64>::zeros(k + 1);
        c[0] = 1.0;
        c.rows_mut(1, k).copy_from(&shift);
        let estimate = beta[1] + shift.dot(&interaction);
        Effect::new(estimate, std_err(&cov, &c))
    };

    let mut e0 = DVector::<f64>::zeros(k + 1);
    e0[0] = 1.0;
    let ate = Effect::new(beta[1], std_err(&cov, &e0));
    let att = group_effect(Group::Treated);
    let atc = group_effect(Group::Control);
    log::debug!("ols: ate={:.6}, att={:.6}, atc={:.6}", ate.estimate, att.estimate, atc.estimate);

    Ok(Estimates {
        method: Estimator::Ols,
        ate,
        att: Some(att),
        atc: Some(atc),
    })
}

/// `[1, D, D (X - X̄), X]`
fn ols_design(sample: &Sample, xbar: &DVector<f64>) -> DMatrix<f64> {
    let (n, k) = (sample.n(), sample.k());
    let x = sample.covariates();
    let mut z = DMatrix::<f64>::zeros(n, 2 + 2 * k);
    z.column_mut(0).fill(1.0);
    for (i, &d) in sample.treatment().iter().enumerate() {
        if d {
            z[(i, 1)] = 1.0;
            for j in 0..k {
                z[(i, 2 + j)] = x[(i, j)] - xbar[j];
            }
        }
    }
    z.columns_mut(2 + k, k).copy_from(x);
    z
}

fn std_err(cov: &DMatrix<f64>, c: &DVector<f64>) -> Option<f64> {
    let var = (c.transpose() * cov * c)[(0, 0)];
    (var.is_finite() && var >= 0.0).then(|| var.sqrt())
}

/// Normalized inverse-probability weighting estimate of the ATE.
pub fn weighting(sample: &Sample, fitted: &DVector<f64>) -> Result<Estimates> {
    require_both_groups(sample)?;
    if fitted.len() != sample.n() {
        return Err(CausalError::ShapeMismatch {
            what: "propensity score",
            expected: sample.n(),
            found: fitted.len(),
        });
    }

    let (mut num_t, mut den_t, mut num_c, mut den_c) = (0.0, 0.0, 0.0, 0.0);
    for ((&y, &d), &p) in sample.outcome().iter().zip(sample.treatment()).zip(fitted.iter()) {
        if d {
            num_t += y / p;
            den_t += 1.0 / p;
        } else {
            num_c += y / (1.0 - p);
            den_c += 1.0 / (1.0 - p);
        }
    }
    let ate = num_t / den_t - num_c / den_c;
    log::debug!("weighting: ate={ate:.6}");

    Ok(Estimates {
        method: Estimator::Weighting,
        ate: Effect::point(ate),
        att: None,
        atc: None,
    })
}

fn require_both_groups(sample: &Sample) -> Result<()> {
    for group in [Group::Treated, Group::Control] {
        if sample.count(group) == 0 {
            return Err(CausalError::EmptyGroup(group.display_name()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{simulate, SimulationParams};
    use approx::assert_relative_eq;

    // `[1, D, D (X - X̄), X]` assembled row by row.
    fn design_by_hand(s: &Sample) -> DMatrix<f64> {
        let xbar = s.covariate_means();
        let (n, k) = (s.n(), s.k());
        DMatrix::from_fn(n, 2 + 2 * k, |i, c| {
            let d = if s.treatment()[i] { 1.0 } else { 0.0 };
            match c {
                0 => 1.0,
                1 => d,
                c if c < 2 + k => d * (s.covariates()[(i, c - 2)] - xbar[c - 2]),
                c => s.covariates()[(i, c - 2 - k)],
            }
        })
    }

    fn heterogeneous() -> Sample {
        let mut params = SimulationParams::new(400, 2);
        params.theta = DVector::from_row_slice(&[0.5, -0.25]);
        params.seed = 3;
        simulate(&params).unwrap().sample
    }

    #[test]
    fn ate_matches_normal_equations() {
        let s = heterogeneous();
        let est = ols(&s).unwrap();

        // Independent fit: solve (ZᵀZ) b = Zᵀy directly.
        let z = design_by_hand(&s);
        let b = (z.transpose() * &z).lu().solve(&(z.transpose() * s.outcome())).unwrap();
        assert_relative_eq!(est.ate.estimate, b[1], epsilon = 1e-8);

        let xt = s.group_covariate_means(Group::Treated) - s.covariate_means();
        let att = b[1] + xt[0] * b[2] + xt[1] * b[3];
        assert_relative_eq!(est.att.unwrap().estimate, att, epsilon = 1e-8);
    }

    #[test]
    fn ate_is_the_share_weighted_average_of_att_and_atc() {
        let s = heterogeneous();
        let est = ols(&s).unwrap();
        let wt = s.n_treated() as f64 / s.n() as f64;
        let mix = wt * est.att.unwrap().estimate + (1.0 - wt) * est.atc.unwrap().estimate;
        assert_relative_eq!(est.ate.estimate, mix, epsilon = 1e-8);
    }

    #[test]
    fn standard_errors_follow_the_sandwich() {
        let s = heterogeneous();
        let est = ols(&s).unwrap();

        let z = design_by_hand(&s);
        let a = (z.transpose() * &z).try_inverse().unwrap();
        let b = &a * z.transpose() * s.outcome();
        let u = s.outcome() - &z * &b;
        let meat = z.transpose() * DMatrix::from_diagonal(&u.map(|v| v * v)) * &z;
        let cov = &a * meat * &a;
        assert_relative_eq!(est.ate.std_err.unwrap(), cov[(1, 1)].sqrt(), epsilon = 1e-8);

        let xc = s.group_covariate_means(Group::Control) - s.covariate_means();
        let c = DVector::from_row_slice(&[1.0, xc[0], xc[1]]);
        let block = cov.view((1, 1), (3, 3));
        let var = (c.transpose() * block * &c)[(0, 0)];
        assert_relative_eq!(est.atc.unwrap().std_err.unwrap(), var.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn ols_needs_full_rank_and_both_groups() {
        let rows = vec![vec![1.0], vec![1.0], vec![1.0], vec![1.0], vec![1.0]];
        let s = Sample::from_rows(&[1.0, 2.0, 3.0, 4.0, 5.0], &[true, false, true, false, false], &rows).unwrap();
        assert!(matches!(ols(&s), Err(CausalError::SingularDesign(_))));

        let rows = vec![vec![0.0], vec![1.0], vec![2.0]];
        let s = Sample::from_rows(&[1.0, 2.0, 3.0], &[true; 3], &rows).unwrap();
        assert!(matches!(ols(&s), Err(CausalError::EmptyGroup("control"))));
    }

    #[test]
    fn weighting_reduces_to_difference_in_means_for_constant_score() {
        let rows = vec![vec![0.0]; 6];
        let y = [4.0, 1.0, 6.0, 2.0, 5.0, 3.0];
        let d = [true, false, true, false, true, false];
        let s = Sample::from_rows(&y, &d, &rows).unwrap();
        let est = weighting(&s, &DVector::from_element(6, 0.4)).unwrap();
        assert_relative_eq!(est.ate.estimate, 5.0 - 2.0, epsilon = 1e-12);
        assert!(est.att.is_none() && est.atc.is_none());
        assert!(est.ate.std_err.is_none());
    }
}
