//! Stepwise selection of propensity terms by likelihood-ratio tests.
//!
//! Starting from a set of accepted terms, every remaining candidate is added
//! in turn and scored by `LR = 2 (ll_with_candidate - ll_null)`. The best
//! candidate is accepted if `LR >= critical value` and the step repeats on the
//! shrunken candidate list; otherwise the accepted set is final.
//!
//! Linear terms are decided first. Quadratic candidates are then all pairs
//! (with replacement) of the decided linear terms, tested with the linear
//! terms held fixed.
//!
//! The search is greedy and never revisits a decision. Every step either
//! stops or removes one candidate, so the search terminates after at most
//! `#candidates + 1` rounds.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::domain::{OptimizerConfig, SelectionOptions, TermSpec};
use crate::error::{CausalError, Result};
use crate::pscore::loglike_of;

/// Choose linear and quadratic terms for the propensity model.
pub fn select_terms(
    covariates: &DMatrix<f64>,
    treatment: &[bool],
    options: &SelectionOptions,
    config: &OptimizerConfig,
) -> Result<TermSpec> {
    let k = covariates.ncols();
    validate_options(options, k)?;

    let linear = if options.c_lin == 0.0 {
        (0..k).collect()
    } else {
        let candidates: Vec<usize> = (0..k).filter(|j| !options.forced_linear.contains(j)).collect();
        forward_select(options.forced_linear.clone(), candidates, options.c_lin, |lin: &[usize]| {
            let terms = TermSpec {
                linear: lin.to_vec(),
                quadratic: Vec::new(),
            };
            loglike_of(covariates, treatment, &terms, config)
        })?
    };
    log::debug!("term selection: linear terms {linear:?}");

    let pairs = quadratic_candidates(&linear);
    let quadratic = if options.c_qua == f64::INFINITY {
        Vec::new()
    } else if options.c_qua == 0.0 {
        pairs
    } else {
        forward_select(Vec::new(), pairs, options.c_qua, |qua: &[(usize, usize)]| {
            let terms = TermSpec {
                linear: linear.clone(),
                quadratic: qua.to_vec(),
            };
            loglike_of(covariates, treatment, &terms, config)
        })?
    };
    log::debug!("term selection: quadratic terms {quadratic:?}");

    Ok(TermSpec { linear, quadratic })
}

fn validate_options(options: &SelectionOptions, k: usize) -> Result<()> {
    for (name, c) in [("c_lin", options.c_lin), ("c_qua", options.c_qua)] {
        if c.is_nan() || c < 0.0 {
            return Err(CausalError::InvalidArgument(format!(
                "critical value {name} must be >= 0, got {c}"
            )));
        }
    }
    for (pos, &j) in options.forced_linear.iter().enumerate() {
        if j >= k {
            return Err(CausalError::InvalidArgument(format!(
                "forced linear term {j} out of range for {k} covariates"
            )));
        }
        if options.forced_linear[..pos].contains(&j) {
            return Err(CausalError::InvalidArgument(format!("forced linear term {j} listed twice")));
        }
    }
    Ok(())
}

/// All pairs `(lin[a], lin[b])` with `a <= b`, in order.
fn quadratic_candidates(linear: &[usize]) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(linear.len() * (linear.len() + 1) / 2);
    for a in 0..linear.len() {
        for b in a..linear.len() {
            out.push((linear[a], linear[b]));
        }
    }
    out
}

/// Greedy forward selection over `candidates`.
///
/// `loglike` evaluates the maximized log-likelihood of the model built from an
/// accepted set. Candidates of one round are evaluated in parallel and ties in
/// the statistic go to the earliest candidate.
fn forward_select<T, F>(mut accepted: Vec<T>, mut candidates: Vec<T>, crit: f64, loglike: F) -> Result<Vec<T>>
where
    T: Clone + Send + Sync + std::fmt::Debug,
    F: Fn(&[T]) -> Result<f64> + Sync,
{
    while !candidates.is_empty() {
        let ll_null = loglike(&accepted)?;

        let lr: Vec<f64> = candidates
            .par_iter()
            .map(|c| {
                let mut trial = accepted.clone();
                trial.push(c.clone());
                loglike(&trial).map(|ll| 2.0 * (ll - ll_null))
            })
            .collect::<Result<Vec<f64>>>()?;

        let mut best = 0;
        for (i, &v) in lr.iter().enumerate().skip(1) {
            if v > lr[best] {
                best = i;
            }
        }

        // NaN statistics never pass the test.
        if !(lr[best] >= crit) {
            break;
        }
        let term = candidates.remove(best);
        log::debug!("term selection: accepted {term:?} (LR={:.4})", lr[best]);
        accepted.push(term);
    }

    Ok(accepted)
}
