//! Propensity-score trimming.
//!
//! Units with extreme scores carry little information about the effect and
//! inflate the variance of every estimator. Trimming keeps the units with
//! `cutoff <= p <= 1 - cutoff`.
//!
//! The automatic cutoff follows Crump, Hotz, Imbens & Mitnik (2009): with
//! `g = 1 / (p (1 - p))` sorted ascending, the asymptotic variance bound of the
//! trimmed-sample ATE is proportional to `h_i = (Σ_{j<=i} g_j) / i²`; the cutoff
//! is the score whose `g` minimizes `h`, i.e. `0.5 - sqrt(0.25 - 1/g_{i*})`.

use std::cmp::Ordering;

use nalgebra::DVector;

use crate::data::Sample;
use crate::domain::Group;
use crate::error::{CausalError, Result};
use crate::pscore::PropensityScore;

/// Check `0 <= cutoff < 0.5`.
pub fn validate_cutoff(cutoff: f64) -> Result<()> {
    if (0.0..0.5).contains(&cutoff) {
        Ok(())
    } else {
        Err(CausalError::InvalidArgument(format!(
            "trimming cutoff must lie in [0, 0.5), got {cutoff}"
        )))
    }
}

/// Mask of the units whose score lies in `[cutoff, 1 - cutoff]`.
pub fn untrimmed(fitted: &DVector<f64>, cutoff: f64) -> Vec<bool> {
    fitted
        .iter()
        .map(|&p| p >= cutoff && p <= 1.0 - cutoff)
        .collect()
}

/// Restrict `sample` and its score to the untrimmed units.
pub fn trim(sample: &Sample, pscore: &PropensityScore, cutoff: f64) -> Result<(Sample, PropensityScore)> {
    validate_cutoff(cutoff)?;
    if pscore.fitted.len() != sample.n() {
        return Err(CausalError::ShapeMismatch {
            what: "propensity score",
            expected: sample.n(),
            found: pscore.fitted.len(),
        });
    }

    let keep = untrimmed(&pscore.fitted, cutoff);
    let trimmed = sample.subset(&keep)?;
    let score = pscore.filter(&keep);

    log::debug!(
        "trim: cutoff={cutoff:.4}, kept {} of {} units",
        trimmed.n(),
        sample.n()
    );
    for group in [Group::Treated, Group::Control] {
        if trimmed.count(group) == 0 && sample.count(group) > 0 {
            log::warn!("trim: no {} units left after trimming", group.display_name());
        }
    }

    Ok((trimmed, score))
}

/// Variance-bound minimizing cutoff for the fitted scores.
pub fn select_cutoff(fitted: &DVector<f64>) -> Result<f64> {
    if fitted.is_empty() {
        return Err(CausalError::InvalidInput("no fitted scores to select a cutoff from".to_string()));
    }

    let mut g: Vec<f64> = fitted.iter().map(|&p| 1.0 / (p * (1.0 - p))).collect();
    g.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut cum = 0.0;
    let mut best = (0, f64::INFINITY);
    for (i, &gi) in g.iter().enumerate() {
        cum += gi;
        let rank = (i + 1) as f64;
        let h = cum / (rank * rank);
        if h < best.1 {
            best = (i, h);
        }
    }

    let inv_g = 1.0 / g[best.0];
    let cutoff = 0.5 - (0.25 - inv_g).max(0.0).sqrt();
    log::debug!("select_cutoff: cutoff={cutoff:.6} at rank {}", best.0 + 1);
    Ok(cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TermSpec;

    fn scored(scores: &[f64]) -> (Sample, PropensityScore) {
        let n = scores.len();
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let d: Vec<bool> = (0..n).map(|i| i % 2 == 0).collect();
        let sample = Sample::from_rows(&vec![0.0; n], &d, &rows).unwrap();
        let ps = PropensityScore {
            terms: TermSpec::all_linear(1),
            coefficients: DVector::zeros(2),
            loglike: 0.0,
            fitted: DVector::from_column_slice(scores),
            n_iter: 0,
        };
        (sample, ps)
    }

    #[test]
    fn trim_keeps_closed_interval_and_is_idempotent() {
        let (s, ps) = scored(&[0.05, 0.1, 0.3, 0.5, 0.9, 0.95, 0.7]);
        let (s1, ps1) = trim(&s, &ps, 0.1).unwrap();
        assert_eq!(ps1.fitted.as_slice(), &[0.1, 0.3, 0.5, 0.9, 0.7]);
        assert_eq!(s1.n(), 5);
        assert_eq!(s1.covariates().column(0).as_slice(), &[1.0, 2.0, 3.0, 4.0, 6.0]);

        let (s2, ps2) = trim(&s1, &ps1, 0.1).unwrap();
        assert_eq!(s2.n(), s1.n());
        assert_eq!(ps2.fitted, ps1.fitted);
        assert_eq!(s2.outcome(), s1.outcome());
    }

    #[test]
    fn cutoff_outside_domain_is_rejected() {
        let (s, ps) = scored(&[0.2, 0.8]);
        assert!(matches!(trim(&s, &ps, 0.5), Err(CausalError::InvalidArgument(_))));
        assert!(validate_cutoff(-0.01).is_err());
        assert!(validate_cutoff(0.0).is_ok());
    }

    #[test]
    fn selected_cutoff_minimizes_variance_bound() {
        let scores = [0.01, 0.02, 0.2, 0.35, 0.5, 0.6, 0.75, 0.97, 0.99, 0.45];
        let fitted = DVector::from_column_slice(&scores);
        let cutoff = select_cutoff(&fitted).unwrap();
        assert!((0.0..0.5).contains(&cutoff));

        // Brute force over ranks.
        let mut g: Vec<f64> = scores.iter().map(|p| 1.0 / (p * (1.0 - p))).collect();
        g.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let h: Vec<f64> = (0..g.len())
            .map(|i| g[..=i].iter().sum::<f64>() / ((i + 1) as f64).powi(2))
            .collect();
        let i_star = (0..h.len()).min_by(|&a, &b| h[a].partial_cmp(&h[b]).unwrap()).unwrap();
        let expected = 0.5 - (0.25 - 1.0 / g[i_star]).sqrt();
        assert!((cutoff - expected).abs() < 1e-12);

        // After trimming, exactly the scores inside the interval survive.
        let (s, ps) = scored(&scores);
        let (_, kept) = trim(&s, &ps, cutoff).unwrap();
        for &p in &scores {
            let inside = p >= cutoff && p <= 1.0 - cutoff;
            assert_eq!(kept.fitted.iter().any(|&q| q == p), inside, "score {p}");
        }
    }
}
