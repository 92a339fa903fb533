//! Propensity bin boundaries and the assignment of units to bins.
//!
//! A list of boundaries `b_0 < b_1 < ... < b_B` defines `B` bins. Bin `i`
//! holds the units with `b_i < p <= b_{i+1}`, except the first bin which is
//! closed on the left so a unit sitting exactly on `b_0` is not lost.

use nalgebra::DVector;

use crate::data::Sample;
use crate::error::{CausalError, Result};
use crate::math::{log_odds, stats};
use crate::strata::Stratum;

/// Critical value of the two-sided 5% test used by adaptive splitting.
const T_CRIT: f64 = 1.96;

/// Minimum units per treatment/control and left/right cell for a split.
const MIN_CELL: usize = 3;

/// Check an explicit boundary list: finite, strictly increasing, at least two.
pub fn validate_boundaries(boundaries: &[f64]) -> Result<()> {
    if boundaries.len() < 2 {
        return Err(CausalError::InvalidArgument(format!(
            "need at least two block boundaries, got {}",
            boundaries.len()
        )));
    }
    if boundaries.iter().any(|b| !b.is_finite()) {
        return Err(CausalError::InvalidArgument("block boundaries must be finite".to_string()));
    }
    if boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CausalError::InvalidArgument(
            "block boundaries must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// `[0, q_1, ..., q_{count-1}, 1]` with `q_j` the `100 j / count` percentile
/// of the scores.
pub fn equal_mass_boundaries(fitted: &DVector<f64>, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(CausalError::InvalidArgument("block count must be positive".to_string()));
    }
    if fitted.is_empty() {
        return Err(CausalError::InvalidInput("cannot stratify an empty sample".to_string()));
    }
    let sorted = stats::sorted(fitted.as_slice());
    let mut boundaries = Vec::with_capacity(count + 1);
    boundaries.push(0.0);
    for j in 1..count {
        let q = 100.0 * j as f64 / count as f64;
        if let Some(value) = stats::percentile_sorted(&sorted, q) {
            boundaries.push(value);
        }
    }
    boundaries.push(1.0);
    Ok(boundaries)
}

/// Membership mask of bin `bin` (see module docs).
pub fn bin_mask(fitted: &DVector<f64>, boundaries: &[f64], bin: usize) -> Vec<bool> {
    let (lo, hi) = (boundaries[bin], boundaries[bin + 1]);
    fitted
        .iter()
        .map(|&p| (p > lo || (bin == 0 && p >= lo)) && p <= hi)
        .collect()
}

/// Split `sample` into one stratum per bin.
pub fn stratify(sample: &Sample, fitted: &DVector<f64>, boundaries: &[f64]) -> Result<Vec<Stratum>> {
    if fitted.len() != sample.n() {
        return Err(CausalError::ShapeMismatch {
            what: "propensity score",
            expected: sample.n(),
            found: fitted.len(),
        });
    }
    if boundaries.len() < 2 {
        return Err(CausalError::InvalidArgument("need at least two block boundaries".to_string()));
    }

    let strata: Vec<Stratum> = (0..boundaries.len() - 1)
        .map(|bin| {
            let mask = bin_mask(fitted, boundaries, bin);
            let idx: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
            Stratum::new(bin, sample.select(&idx), fitted.select_rows(idx.iter()))
        })
        .collect();

    log::debug!(
        "stratify: {} strata, sizes {:?}",
        strata.len(),
        strata.iter().map(Stratum::n).collect::<Vec<_>>()
    );
    Ok(strata)
}

/// Data-driven boundaries by recursive median splits.
///
/// A bin is split at the largest score not above its median while the mean
/// log-odds of treated and control units in it differ significantly, as long
/// as both halves keep more than `k + 2` units and every treated/control
/// cell keeps more than three.
pub fn adaptive_boundaries(fitted: &DVector<f64>, treatment: &[bool], k: usize) -> Result<Vec<f64>> {
    if fitted.is_empty() {
        return Err(CausalError::InvalidInput("cannot stratify an empty sample".to_string()));
    }
    if treatment.len() != fitted.len() {
        return Err(CausalError::ShapeMismatch {
            what: "treatment",
            expected: fitted.len(),
            found: treatment.len(),
        });
    }

    let splitter = Splitter {
        score: fitted.as_slice(),
        logit: fitted.iter().map(|&p| log_odds(p)).collect(),
        treatment,
        min_side: k + 2,
    };
    let root = Bin {
        lo: fitted.min(),
        hi: fitted.max(),
        lo_open: false,
    };

    let mut out = Vec::new();
    splitter.split(root, &mut out);
    out.sort_by(f64::total_cmp);
    out.dedup();
    // All scores equal: one block `[p, p]`, closed on both sides.
    if out.len() == 1 {
        out.push(out[0]);
    }

    log::debug!("adaptive blocks: boundaries {out:?}");
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct Bin {
    lo: f64,
    hi: f64,
    // Only the root bin contains its lower boundary.
    lo_open: bool,
}

impl Bin {
    fn contains(&self, p: f64) -> bool {
        (p > self.lo || (!self.lo_open && p >= self.lo)) && p <= self.hi
    }
}

struct Splitter<'a> {
    score: &'a [f64],
    logit: Vec<f64>,
    treatment: &'a [bool],
    min_side: usize,
}

impl Splitter<'_> {
    // Every accepted split leaves both halves non-empty, so each recursive
    // call covers strictly fewer units than its parent.
    fn split(&self, bin: Bin, out: &mut Vec<f64>) {
        match self.split_point(bin) {
            Some(med) => {
                self.split(Bin { hi: med, ..bin }, out);
                self.split(
                    Bin {
                        lo: med,
                        hi: bin.hi,
                        lo_open: true,
                    },
                    out,
                );
            }
            None => {
                out.push(bin.lo);
                out.push(bin.hi);
            }
        }
    }

    /// Score to split `bin` at, or `None` if `bin` is terminal.
    fn split_point(&self, bin: Bin) -> Option<f64> {
        let scope: Vec<usize> = (0..self.score.len()).filter(|&i| bin.contains(self.score[i])).collect();

        let (lt, lc): (Vec<f64>, Vec<f64>) = {
            let (t, c): (Vec<usize>, Vec<usize>) = scope.iter().copied().partition(|&i| self.treatment[i]);
            (
                t.iter().map(|&i| self.logit[i]).collect(),
                c.iter().map(|&i| self.logit[i]).collect(),
            )
        };
        let t = welch_t(&lt, &lc)?;
        // NaN statistics end the recursion.
        if !(t.abs() > T_CRIT) {
            return None;
        }

        let in_scope: Vec<f64> = scope.iter().map(|&i| self.score[i]).collect();
        let median = stats::median(&in_scope)?;
        let med = in_scope
            .iter()
            .copied()
            .filter(|&p| p <= median)
            .fold(f64::NEG_INFINITY, f64::max);

        let (mut left, mut left_t, mut right, mut right_t) = (0, 0, 0, 0);
        for &i in &scope {
            let treated = self.treatment[i] as usize;
            if self.score[i] <= med {
                left += 1;
                left_t += treated;
            } else {
                right += 1;
                right_t += treated;
            }
        }

        if left.min(right) <= self.min_side {
            return None;
        }
        if [left_t, left - left_t, right_t, right - right_t].into_iter().min()? <= MIN_CELL {
            return None;
        }
        Some(med)
    }
}

/// Two-sample t-statistic with population variances; `None` if a group is empty.
fn welch_t(a: &[f64], b: &[f64]) -> Option<f64> {
    let (ma, va) = (stats::mean(a)?, stats::variance(a)?);
    let (mb, vb) = (stats::mean(b)?, stats::variance(b)?);
    Some((ma - mb) / (va / a.len() as f64 + vb / b.len() as f64).sqrt())
}
