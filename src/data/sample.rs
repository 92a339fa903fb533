//! The aligned (outcome, treatment, covariates) sample every estimator reads.
//!
//! A `Sample` is immutable once built. Operations that change the unit set
//! (trimming, stratification) build a new `Sample` via [`Sample::subset`], which
//! starts with empty caches, so a stale derived value can never outlive the
//! units it was computed from.

use std::cell::OnceCell;

use nalgebra::{DMatrix, DVector};

use crate::domain::Group;
use crate::error::{CausalError, Result};
use crate::math::stats;

#[derive(Debug, Clone)]
pub struct Sample {
    outcome: DVector<f64>,
    treatment: Vec<bool>,
    covariates: DMatrix<f64>,
    treated: Vec<usize>,
    control: Vec<usize>,

    // Derived on first use; never invalidated in place (see module docs).
    variance: OnceCell<DVector<f64>>,
    ndiff: OnceCell<Vec<Option<f64>>>,
}

impl Sample {
    /// Build a sample from raw arrays.
    ///
    /// Fails with `ShapeMismatch` if the three inputs disagree on the number of
    /// units, and with `InvalidInput` on non-finite outcomes or covariates.
    pub fn new(outcome: DVector<f64>, treatment: Vec<bool>, covariates: DMatrix<f64>) -> Result<Self> {
        let n = outcome.len();
        if treatment.len() != n {
            return Err(CausalError::ShapeMismatch {
                what: "treatment",
                expected: n,
                found: treatment.len(),
            });
        }
        if covariates.nrows() != n {
            return Err(CausalError::ShapeMismatch {
                what: "covariate rows",
                expected: n,
                found: covariates.nrows(),
            });
        }
        if outcome.iter().any(|v| !v.is_finite()) {
            return Err(CausalError::InvalidInput("non-finite outcome value".to_string()));
        }
        if covariates.iter().any(|v| !v.is_finite()) {
            return Err(CausalError::InvalidInput("non-finite covariate value".to_string()));
        }

        Ok(Self::from_parts(outcome, treatment, covariates))
    }

    /// Build a sample from per-unit covariate rows.
    pub fn from_rows(outcome: &[f64], treatment: &[bool], rows: &[Vec<f64>]) -> Result<Self> {
        let k = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != k) {
            return Err(CausalError::ShapeMismatch {
                what: "covariate row length",
                expected: k,
                found: bad.len(),
            });
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let covariates = DMatrix::from_row_slice(rows.len(), k, &flat);
        Self::new(DVector::from_column_slice(outcome), treatment.to_vec(), covariates)
    }

    fn from_parts(outcome: DVector<f64>, treatment: Vec<bool>, covariates: DMatrix<f64>) -> Self {
        let (treated, control): (Vec<usize>, Vec<usize>) = (0..treatment.len()).partition(|&i| treatment[i]);
        Self {
            outcome,
            treatment,
            covariates,
            treated,
            control,
            variance: OnceCell::new(),
            ndiff: OnceCell::new(),
        }
    }

    /// A new sample holding only the units where `keep` is true.
    pub fn subset(&self, keep: &[bool]) -> Result<Self> {
        if keep.len() != self.n() {
            return Err(CausalError::ShapeMismatch {
                what: "subset mask",
                expected: self.n(),
                found: keep.len(),
            });
        }
        let idx: Vec<usize> = (0..self.n()).filter(|&i| keep[i]).collect();
        Ok(self.select(&idx))
    }

    /// A new sample holding the units at `idx`, in that order.
    pub fn select(&self, idx: &[usize]) -> Self {
        let outcome = self.outcome.select_rows(idx.iter());
        let covariates = self.covariates.select_rows(idx.iter());
        let treatment = idx.iter().map(|&i| self.treatment[i]).collect();
        Self::from_parts(outcome, treatment, covariates)
    }

    /// Number of units.
    pub fn n(&self) -> usize {
        self.outcome.len()
    }

    /// Number of covariates.
    pub fn k(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn n_treated(&self) -> usize {
        self.treated.len()
    }

    pub fn n_control(&self) -> usize {
        self.control.len()
    }

    pub fn count(&self, group: Group) -> usize {
        self.indices(group).len()
    }

    pub fn outcome(&self) -> &DVector<f64> {
        &self.outcome
    }

    pub fn treatment(&self) -> &[bool] {
        &self.treatment
    }

    pub fn covariates(&self) -> &DMatrix<f64> {
        &self.covariates
    }

    /// Positions of the units in `group`, ascending.
    pub fn indices(&self, group: Group) -> &[usize] {
        match group {
            Group::Treated => &self.treated,
            Group::Control => &self.control,
        }
    }

    pub fn outcome_of(&self, group: Group) -> DVector<f64> {
        self.outcome.select_rows(self.indices(group).iter())
    }

    pub fn covariates_of(&self, group: Group) -> DMatrix<f64> {
        self.covariates.select_rows(self.indices(group).iter())
    }

    /// Column means of the covariates over the whole sample.
    pub fn covariate_means(&self) -> DVector<f64> {
        column_means(&self.covariates)
    }

    /// Column means of the covariates within `group`.
    pub fn group_covariate_means(&self, group: Group) -> DVector<f64> {
        column_means(&self.covariates_of(group))
    }

    /// Per-covariate population variance over the whole sample (cached).
    pub fn covariate_variance(&self) -> &DVector<f64> {
        self.variance.get_or_init(|| {
            DVector::from_iterator(
                self.k(),
                self.covariates
                    .column_iter()
                    .map(|c| stats::variance(c.as_slice()).unwrap_or(f64::NAN)),
            )
        })
    }

    /// Normalized difference in covariate means (cached).
    ///
    /// `(mean_t - mean_c) / sqrt((var_t + var_c) / 2)` per covariate. Unlike a
    /// t-statistic it does not grow with the sample size, which makes it the
    /// better balance diagnostic. Entries are `None` when the quantity is
    /// undefined: an empty group, or zero pooled variance.
    pub fn normalized_difference(&self) -> &[Option<f64>] {
        self.ndiff.get_or_init(|| {
            let xt = self.covariates_of(Group::Treated);
            let xc = self.covariates_of(Group::Control);
            (0..self.k())
                .map(|j| {
                    let t = xt.column(j);
                    let c = xc.column(j);
                    let (mt, vt) = (stats::mean(t.as_slice())?, stats::variance(t.as_slice())?);
                    let (mc, vc) = (stats::mean(c.as_slice())?, stats::variance(c.as_slice())?);
                    let pooled = (vt + vc) / 2.0;
                    if pooled > 0.0 {
                        Some((mt - mc) / pooled.sqrt())
                    } else {
                        None
                    }
                })
                .collect()
        })
    }
}

fn column_means(x: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        x.ncols(),
        x.column_iter()
            .map(|c| stats::mean(c.as_slice()).unwrap_or(f64::NAN)),
    )
}
