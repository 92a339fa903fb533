//! Nearest-neighbor matching with replacement.
//!
//! Each treated unit is matched to its `m` nearest controls (ties included)
//! and each control unit to its `m` nearest treated units. The individual
//! effect of a unit is the difference between its outcome and the mean outcome
//! of its matches, signed so that it always reads "treated minus control".
//!
//! With bias adjustment, the discrepancy left by imperfect matches is
//! estimated by regressing the matched outcomes on `[1, X]` over all matches
//! (with repetition) and removed from every individual effect.

pub mod neighbors;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::data::Sample;
use crate::domain::{Effect, Estimates, Estimator, Group, MatchingOptions};
use crate::error::{CausalError, Result};
use crate::math::{solve_least_squares, stats};

pub use neighbors::{m_smallest_with_ties, Metric};

/// Matching estimates together with the per-unit effects they average.
#[derive(Debug, Clone)]
pub struct MatchingResult {
    pub estimates: Estimates,
    /// Individual effect per unit, in sample order.
    pub individual_effects: DVector<f64>,
}

pub fn matching(sample: &Sample, options: &MatchingOptions) -> Result<MatchingResult> {
    if options.m == 0 {
        return Err(CausalError::InvalidArgument("number of matches must be positive".to_string()));
    }
    for group in [Group::Treated, Group::Control] {
        if sample.count(group) == 0 {
            return Err(CausalError::EmptyGroup(group.display_name()));
        }
        if sample.count(group) < options.m {
            return Err(CausalError::InsufficientPool {
                needed: options.m,
                available: sample.count(group),
            });
        }
    }

    let metric = Metric::resolve(sample, &options.metric)?;
    let (xt, xc) = (sample.covariates_of(Group::Treated), sample.covariates_of(Group::Control));
    let (yt, yc) = (sample.outcome_of(Group::Treated), sample.outcome_of(Group::Control));

    let matches_t = find_matches(&xt, &xc, &metric, options.m)?;
    let matches_c = find_matches(&xc, &xt, &metric, options.m)?;

    let mut itt_t: Vec<f64> = yt
        .iter()
        .zip(&matches_t)
        .map(|(&y, m)| y - mean_of(&yc, m))
        .collect();
    let mut itt_c: Vec<f64> = yc
        .iter()
        .zip(&matches_c)
        .map(|(&y, m)| mean_of(&yt, m) - y)
        .collect();

    if options.bias_adjust {
        let bias_t = bias(&matches_t, &yc, &xc, &xt)?;
        let bias_c = bias(&matches_c, &yt, &xt, &xc)?;
        itt_t.iter_mut().zip(&bias_t).for_each(|(e, b)| *e -= b);
        itt_c.iter_mut().zip(&bias_c).for_each(|(e, b)| *e += b);
    }

    let mut individual_effects = DVector::zeros(sample.n());
    for (&unit, &e) in sample.indices(Group::Treated).iter().zip(&itt_t) {
        individual_effects[unit] = e;
    }
    for (&unit, &e) in sample.indices(Group::Control).iter().zip(&itt_c) {
        individual_effects[unit] = e;
    }

    let att = stats::mean(&itt_t).ok_or(CausalError::EmptyGroup("treated"))?;
    let atc = stats::mean(&itt_c).ok_or(CausalError::EmptyGroup("control"))?;
    let ate = individual_effects.mean();
    log::debug!(
        "matching: m={}, bias_adjust={}, ate={ate:.6}",
        options.m,
        options.bias_adjust
    );

    Ok(MatchingResult {
        estimates: Estimates {
            method: Estimator::Matching,
            ate: Effect::point(ate),
            att: Some(Effect::point(att)),
            atc: Some(Effect::point(atc)),
        },
        individual_effects,
    })
}

/// Matches for every row of `subjects` among the rows of `pool`.
///
/// Subjects are independent; results come back in subject order.
fn find_matches(subjects: &DMatrix<f64>, pool: &DMatrix<f64>, metric: &Metric, m: usize) -> Result<Vec<Vec<usize>>> {
    (0..subjects.nrows())
        .into_par_iter()
        .map(|i| {
            let distances = metric.distances(pool, &subjects.row(i).into_owned());
            m_smallest_with_ties(&distances, m)
        })
        .collect()
}

fn mean_of(values: &DVector<f64>, idx: &[usize]) -> f64 {
    idx.iter().map(|&j| values[j]).sum::<f64>() / idx.len() as f64
}

/// Bias of each subject's match: `(x_i - mean X_matches) · β`, where `β` are
/// the slopes of `Y ~ [1, X]` over all matched pool units with repetition.
fn bias(
    matches: &[Vec<usize>],
    y_pool: &DVector<f64>,
    x_pool: &DMatrix<f64>,
    x_subjects: &DMatrix<f64>,
) -> Result<Vec<f64>> {
    let flat: Vec<usize> = matches.iter().flatten().copied().collect();
    let k = x_pool.ncols();

    let mut design = DMatrix::<f64>::zeros(flat.len(), k + 1);
    design.column_mut(0).fill(1.0);
    design.columns_mut(1, k).copy_from(&x_pool.select_rows(flat.iter()));
    let y = y_pool.select_rows(flat.iter());

    let beta = solve_least_squares(&design, &y)
        .ok_or_else(|| CausalError::SingularDesign("bias-correction regression has no solution".to_string()))?;
    let slopes = beta.rows(1, k);

    Ok(matches
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let matched_mean = x_pool.select_rows(m.iter()).row_mean();
            (x_subjects.row(i) - matched_mean).dot(&slopes.transpose())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DistanceMetric;
    use approx::assert_relative_eq;

    fn small_sample() -> Sample {
        let y = [3.1, 0.2, 4.4, 1.9, 2.8, 0.7, 5.0, 1.1, 3.6, 2.2];
        let d = [true, false, true, false, true, false, true, false, false, false];
        let rows = vec![
            vec![0.10, 1.30],
            vec![0.45, 0.20],
            vec![1.70, -0.40],
            vec![1.05, 0.90],
            vec![-0.80, 0.35],
            vec![-1.20, 1.75],
            vec![2.30, 0.05],
            vec![0.95, -1.10],
            vec![-0.15, -0.65],
            vec![1.60, 2.40],
        ];
        Sample::from_rows(&y, &d, &rows).unwrap()
    }

    #[test]
    fn single_match_equals_brute_force() {
        let s = small_sample();
        let res = matching(&s, &MatchingOptions::default()).unwrap();

        let var = s.covariate_variance();
        let x = s.covariates();
        let dist = |a: usize, b: usize| -> f64 {
            (0..2).map(|j| (x[(a, j)] - x[(b, j)]).powi(2) / var[j]).sum()
        };
        for i in 0..s.n() {
            let pool = s.indices(Group::of(!s.treatment()[i]));
            let nearest = *pool
                .iter()
                .min_by(|&&a, &&b| dist(i, a).partial_cmp(&dist(i, b)).unwrap())
                .unwrap();
            let expected = if s.treatment()[i] {
                s.outcome()[i] - s.outcome()[nearest]
            } else {
                s.outcome()[nearest] - s.outcome()[i]
            };
            assert_relative_eq!(res.individual_effects[i], expected, epsilon = 1e-12);
        }

        let est = res.estimates;
        assert_relative_eq!(est.ate.estimate, res.individual_effects.mean(), epsilon = 1e-12);
        let att: f64 = s.indices(Group::Treated).iter().map(|&i| res.individual_effects[i]).sum::<f64>() / 4.0;
        assert_relative_eq!(est.att.unwrap().estimate, att, epsilon = 1e-12);
        assert!(est.ate.std_err.is_none());
    }

    #[test]
    fn bias_adjustment_removes_linear_discrepancy() {
        // y = 2 + 3x + 1.5 d: adjusted matching recovers 1.5 for every unit.
        let x = [0.0, 0.3, 1.0, 1.2, 2.1, 2.5, 3.3, 3.9, 4.4, 5.0];
        let d = [true, false, false, true, false, true, true, false, true, false];
        let y: Vec<f64> = x
            .iter()
            .zip(&d)
            .map(|(&xi, &di)| 2.0 + 3.0 * xi + if di { 1.5 } else { 0.0 })
            .collect();
        let rows: Vec<Vec<f64>> = x.iter().map(|&v| vec![v]).collect();
        let s = Sample::from_rows(&y, &d, &rows).unwrap();

        let plain = matching(&s, &MatchingOptions::default()).unwrap();
        assert!((plain.estimates.ate.estimate - 1.5).abs() > 1e-6);

        let options = MatchingOptions {
            bias_adjust: true,
            ..MatchingOptions::default()
        };
        let adjusted = matching(&s, &options).unwrap();
        for e in adjusted.individual_effects.iter() {
            assert_relative_eq!(*e, 1.5, epsilon = 1e-8);
        }
    }

    #[test]
    fn more_matches_than_pool_fails() {
        let s = small_sample();
        let options = MatchingOptions {
            m: 5,
            ..MatchingOptions::default()
        };
        assert!(matches!(
            matching(&s, &options),
            Err(CausalError::InsufficientPool { needed: 5, available: 4 })
        ));

        let options = MatchingOptions {
            m: 0,
            metric: DistanceMetric::Mahalanobis,
            ..MatchingOptions::default()
        };
        assert!(matches!(matching(&s, &options), Err(CausalError::InvalidArgument(_))));
    }

    #[test]
    fn mahalanobis_and_custom_metrics_run() {
        let s = small_sample();
        for metric in [DistanceMetric::Mahalanobis, DistanceMetric::Custom(DMatrix::identity(2, 2))] {
            let options = MatchingOptions {
                metric,
                m: 2,
                bias_adjust: true,
            };
            let res = matching(&s, &options).unwrap();
            assert!(res.estimates.ate.estimate.is_finite());
            assert_eq!(res.individual_effects.len(), s.n());
        }
    }
}
