//! Distance metrics and nearest-neighbor search with ties.

use std::cmp::Ordering;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::data::Sample;
use crate::domain::DistanceMetric;
use crate::error::{CausalError, Result};

/// A resolved quadratic-form distance `d(a, b) = (a - b)ᵀ W (a - b)`.
#[derive(Debug, Clone)]
pub enum Metric {
    /// `W` diagonal; only the diagonal is stored.
    Diagonal(DVector<f64>),
    Quadratic(DMatrix<f64>),
}

impl Metric {
    /// Resolve `metric` against the covariates of `sample`.
    ///
    /// Inverse-variance weights use the population variance of the whole
    /// sample; a covariate with zero variance gets weight zero since every
    /// difference in it is zero. Mahalanobis inverts the sample covariance.
    pub fn resolve(sample: &Sample, metric: &DistanceMetric) -> Result<Self> {
        let k = sample.k();
        match metric {
            DistanceMetric::InverseVariance => Ok(Self::Diagonal(
                sample
                    .covariate_variance()
                    .map(|v| if v > 0.0 { 1.0 / v } else { 0.0 }),
            )),
            DistanceMetric::Mahalanobis => {
                let cov = sample_covariance(sample.covariates()).ok_or_else(|| {
                    CausalError::SingularDesign("need at least two units for a covariance".to_string())
                })?;
                let inv = cov.try_inverse().ok_or_else(|| {
                    CausalError::SingularDesign("covariate covariance matrix is not invertible".to_string())
                })?;
                Ok(Self::Quadratic(inv))
            }
            DistanceMetric::Custom(w) => {
                if w.nrows() != k || w.ncols() != k {
                    return Err(CausalError::ShapeMismatch {
                        what: "distance weight matrix",
                        expected: k,
                        found: if w.nrows() != k { w.nrows() } else { w.ncols() },
                    });
                }
                Ok(Self::Quadratic(w.clone()))
            }
        }
    }

    /// Distance from `subject` to every row of `pool`.
    pub fn distances(&self, pool: &DMatrix<f64>, subject: &RowDVector<f64>) -> Vec<f64> {
        pool.row_iter()
            .map(|row| {
                let dx = row - subject;
                match self {
                    Self::Diagonal(w) => dx.iter().zip(w.iter()).map(|(d, w)| d * d * w).sum::<f64>(),
                    Self::Quadratic(w) => (&dx * w).dot(&dx),
                }
            })
            .collect()
    }
}

/// Unbiased sample covariance of the columns of `x`.
fn sample_covariance(x: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = x.nrows();
    if n < 2 {
        return None;
    }
    let mut centered = x.clone();
    for mut col in centered.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    Some(centered.tr_mul(&centered) / (n - 1) as f64)
}

/// Positions of the `m` smallest distances, plus every position tied with the
/// m-th smallest; ascending by position.
///
/// Expected linear time: one selection pass finds the m-th order statistic,
/// one scan collects everything not above it.
pub fn m_smallest_with_ties(distances: &[f64], m: usize) -> Result<Vec<usize>> {
    if m == 0 {
        return Err(CausalError::InvalidArgument("number of matches must be positive".to_string()));
    }
    if distances.len() < m {
        return Err(CausalError::InsufficientPool {
            needed: m,
            available: distances.len(),
        });
    }

    let mut order: Vec<usize> = (0..distances.len()).collect();
    let cmp = |a: &usize, b: &usize| -> Ordering { distances[*a].total_cmp(&distances[*b]) };
    let (_, &mut nth, _) = order.select_nth_unstable_by(m - 1, cmp);
    let threshold = distances[nth];

    Ok((0..distances.len())
        .filter(|&i| distances[i].total_cmp(&threshold) != Ordering::Greater)
        .collect())
}
