//! Plain-text rendering of samples, propensity fits, strata and estimates.
//!
//! Every function returns a `String` so callers decide where output goes.

use crate::data::Sample;
use crate::domain::{Effect, Estimates, Group, TermSpec};
use crate::models::CausalModel;
use crate::pscore::PropensityScore;
use crate::strata::Stratification;

const NOT_AVAILABLE: &str = "not available";

/// Everything the model currently knows, section by section.
pub fn format_summary(model: &CausalModel) -> String {
    let mut out = String::new();

    out.push_str("=== Causal effect estimation ===\n");
    out.push_str(&format_sample(model.sample()));
    if model.sample().n() != model.original().n() {
        out.push_str(&format!(
            "Trimmed: cutoff={:.4} | kept {} of {} units\n",
            model.cutoff(),
            model.sample().n(),
            model.original().n()
        ));
    }
    out.push('\n');
    out.push_str(&format_balance(model.sample()));
    out.push('\n');
    out.push_str(&format_propensity(model.pscore()));
    out.push('\n');
    out.push_str(&format_strata(model.stratification()));
    out.push('\n');
    out.push_str(&format_estimates(model.estimates()));

    out
}

pub fn format_sample(sample: &Sample) -> String {
    format!(
        "Sample: N={} | treated={} | control={} | covariates={}\n",
        sample.n(),
        sample.n_treated(),
        sample.n_control(),
        sample.k()
    )
}

/// Covariate means by group and their normalized differences.
pub fn format_balance(sample: &Sample) -> String {
    let mut out = String::new();
    out.push_str("Covariate balance:\n");
    out.push_str(&format!("{:<10} {:>12} {:>12} {:>10}\n", "covariate", "mean_t", "mean_c", "ndiff"));
    out.push_str(&format!("{:-<10} {:-<12} {:-<12} {:-<10}\n", "", "", "", ""));

    let mt = sample.group_covariate_means(Group::Treated);
    let mc = sample.group_covariate_means(Group::Control);
    for (j, nd) in sample.normalized_difference().iter().enumerate() {
        out.push_str(&format!(
            "{:<10} {:>12} {:>12} {:>10}\n",
            covariate_label(j),
            fmt_num(mt[j], 4),
            fmt_num(mc[j], 4),
            fmt_opt(*nd, 4)
        ));
    }
    out
}

pub fn format_propensity(pscore: Option<&PropensityScore>) -> String {
    let Some(ps) = pscore else {
        return format!("Propensity score: {NOT_AVAILABLE}\n");
    };

    let mut out = String::new();
    out.push_str("Propensity score (logit):\n");
    out.push_str(&format!("{:<14} {:>12}\n", "term", "coef"));
    out.push_str(&format!("{:-<14} {:-<12}\n", "", ""));
    for (label, coef) in term_labels(&ps.terms).iter().zip(ps.coefficients.iter()) {
        out.push_str(&format!("{label:<14} {coef:>12.6}\n"));
    }
    out.push_str(&format!("Log-likelihood: {:.6} ({} iterations)\n", ps.loglike, ps.n_iter));
    if !ps.fitted.is_empty() {
        out.push_str(&format!("Fitted range: [{:.4}, {:.4}]\n", ps.min(), ps.max()));
    }
    out
}

pub fn format_strata(stratification: Option<&Stratification>) -> String {
    let Some(strat) = stratification else {
        return format!("Strata: {NOT_AVAILABLE}\n");
    };

    let mut out = String::new();
    out.push_str(&format!("Strata ({}):\n", strat.len()));
    out.push_str(&format!(
        "{:>6} {:>9} {:>9} {:>7} {:>7} {:>7}\n",
        "block", "lo", "hi", "N", "N_t", "N_c"
    ));
    for (s, w) in strat.strata.iter().zip(strat.boundaries.windows(2)) {
        out.push_str(&format!(
            "{:>6} {:>9.4} {:>9.4} {:>7} {:>7} {:>7}\n",
            s.index(),
            w[0],
            w[1],
            s.n(),
            s.n_treated(),
            s.n_control()
        ));
    }
    out
}

pub fn format_estimates(estimates: Option<&Estimates>) -> String {
    let Some(est) = estimates else {
        return format!("Treatment effect estimates: {NOT_AVAILABLE}\n");
    };

    let mut out = String::new();
    out.push_str(&format!("Treatment effect estimates ({}):\n", est.method.display_name()));
    out.push_str(&format!("{:<4} {:>12} {:>12}\n", "", "estimate", "std. err."));
    for (name, effect) in [("ATE", Some(est.ate)), ("ATT", est.att), ("ATC", est.atc)] {
        out.push_str(&format_effect(name, effect));
    }
    out
}

fn format_effect(name: &str, effect: Option<Effect>) -> String {
    match effect {
        Some(e) => format!(
            "{name:<4} {:>12} {:>12}\n",
            fmt_num(e.estimate, 6),
            fmt_opt(e.std_err, 6)
        ),
        None => format!("{name:<4} {NOT_AVAILABLE:>12}\n"),
    }
}

fn term_labels(terms: &TermSpec) -> Vec<String> {
    let mut labels = Vec::with_capacity(terms.width());
    labels.push("Intercept".to_string());
    labels.extend(terms.linear.iter().map(|&j| covariate_label(j)));
    labels.extend(
        terms
            .quadratic
            .iter()
            .map(|&(a, b)| format!("{}*{}", covariate_label(a), covariate_label(b))),
    );
    labels
}

fn covariate_label(j: usize) -> String {
    format!("X{j}")
}

fn fmt_num(v: f64, digits: usize) -> String {
    if v.is_finite() {
        format!("{v:.digits$}")
    } else {
        "n/a".to_string()
    }
}

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    v.map_or_else(|| "n/a".to_string(), |x| fmt_num(x, digits))
}
