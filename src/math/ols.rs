//! Least squares solvers and White's robust covariance.
//!
//! Every estimator in this crate ends in a small regression of the form:
//!
//! ```text
//! minimize Σ (y_i - z_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Full-rank problems are solved with a thin QR factorization followed by
//!   back-substitution against the upper-triangular factor `R`. `R` is kept so
//!   the robust covariance can reuse it without refactoring.
//! - Rank-deficient problems (the pooled match regression of the bias
//!   correction may repeat units many times) go through SVD and return the
//!   minimum-norm solution.
//! - The heteroskedasticity-robust covariance is
//!   `inv(ZᵀZ) Zᵀ diag(u²) Z inv(ZᵀZ)`; we never build the N×N diagonal.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};

/// Relative threshold on the diagonal of `R` below which a design is treated as
/// rank deficient.
const RANK_TOL: f64 = 1e-10;

/// A fitted least-squares regression with its cached triangular factor.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    design: DMatrix<f64>,
    r: DMatrix<f64>,
    coefficients: DVector<f64>,
    residuals: DVector<f64>,
}

impl LeastSquares {
    /// Fit `y` on the columns of `design` via QR.
    ///
    /// Returns `None` when the design has fewer rows than columns or is
    /// numerically rank deficient.
    pub fn fit(design: DMatrix<f64>, y: &DVector<f64>) -> Option<Self> {
        let (n, p) = design.shape();
        if p == 0 || n < p || y.len() != n {
            return None;
        }

        let qr = design.clone().qr();
        let q = qr.q();
        let r = qr.r();

        let scale = r.diagonal().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if !(scale.is_finite() && scale > 0.0) {
            return None;
        }
        if r.diagonal().iter().any(|v| v.abs() <= RANK_TOL * scale) {
            return None;
        }

        let qty = q.transpose() * y;
        let coefficients = r.solve_upper_triangular(&qty)?;
        if coefficients.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let residuals = y - &design * &coefficients;

        Some(Self {
            design,
            r,
            coefficients,
            residuals,
        })
    }

    pub fn coefficients(&self) -> &DVector<f64> {
        &self.coefficients
    }

    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    pub fn design(&self) -> &DMatrix<f64> {
        &self.design
    }

    /// White (HC0) covariance of the coefficients in `cols`.
    ///
    /// With `A = inv(RᵀR) = inv(ZᵀZ)` and `B = (u∘Z) A[:, cols]`, the requested
    /// block of the sandwich estimator is `BᵀB`.
    pub fn robust_covariance(&self, cols: Range<usize>) -> Option<DMatrix<f64>> {
        let p = self.r.ncols();
        if cols.start >= cols.end || cols.end > p {
            return None;
        }

        let r_inv = self.r.solve_upper_triangular(&DMatrix::identity(p, p))?;
        let a = &r_inv * r_inv.transpose();
        let a_cols = a.columns(cols.start, cols.end - cols.start);

        let mut weighted = self.design.clone();
        for (i, mut row) in weighted.row_iter_mut().enumerate() {
            row *= self.residuals[i];
        }

        let b = weighted * a_cols;
        Some(b.transpose() * b)
    }

    /// Robust standard error of a single coefficient.
    pub fn robust_std_err(&self, col: usize) -> Option<f64> {
        let cov = self.robust_covariance(col..col + 1)?;
        let var = cov[(0, 0)];
        if var.is_finite() && var >= 0.0 {
            Some(var.sqrt())
        } else {
            None
        }
    }
}

/// Solve a least squares problem using SVD.
///
/// Returns the minimum-norm solution, or `None` if no tolerance yields a
/// finite answer.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
