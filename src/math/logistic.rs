//! Stable logistic-link primitives.
//!
//! The logit likelihood needs `log(1 + exp(x))` and `1 / (1 + exp(-x))` for
//! linear predictors that can be large in magnitude once a model starts to
//! separate the groups.
//!
//! Numerical notes:
//! - `exp(x)` overflows for `x > ~709`; both functions branch on the sign so
//!   the exponent is always non-positive.
//! - `log1p(exp(-|x|))` keeps precision when `exp(-|x|)` is tiny.

/// `1 / (1 + exp(-x))`.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + exp(x))`.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// `log(p / (1 - p))`.
pub fn log_odds(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_symmetric_and_bounded() {
        for &x in &[-800.0, -30.0, -1.0, 0.0, 0.5, 30.0, 800.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({x}) = {s}");
            assert!((s + sigmoid(-x) - 1.0).abs() < 1e-12);
        }
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn softplus_matches_naive_form_in_safe_range() {
        for &x in &[-20.0, -2.0, 0.0, 1.5, 20.0] {
            let naive = (1.0 + f64::exp(x)).ln();
            assert!((softplus(x) - naive).abs() < 1e-12);
        }
        // No overflow far out in the tails.
        assert!((softplus(1000.0) - 1000.0).abs() < 1e-12);
        assert!(softplus(-1000.0) >= 0.0);
    }

    #[test]
    fn log_odds_inverts_sigmoid() {
        for &x in &[-4.0, -0.3, 0.0, 2.2] {
            assert!((log_odds(sigmoid(x)) - x).abs() < 1e-10);
        }
    }
}
