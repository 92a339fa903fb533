//! Maximum-likelihood logit via argmin's L-BFGS.
//!
//! The solver minimizes the mean negative log-likelihood
//!
//! ```text
//! (1/N) [ Σ_treated log(1 + exp(-x_i·β)) + Σ_control log(1 + exp(x_i·β)) ]
//! ```
//!
//! with the closed-form gradient `Xᵀ(σ(Xβ) - d) / N`, starting from `β = 0`.
//! Averaging keeps the gradient tolerance meaningful across sample sizes; the
//! reported log-likelihood is rescaled to the sum.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::{DMatrix, DVector};

use crate::domain::OptimizerConfig;
use crate::error::{CausalError, Result};
use crate::math::{sigmoid, softplus};

/// Result of a converged logit fit.
#[derive(Debug, Clone)]
pub struct LogitFit {
    pub coefficients: DVector<f64>,
    /// Maximized log-likelihood (sum over units).
    pub loglike: f64,
    pub n_iter: u64,
}

struct LogitProblem<'a> {
    design: &'a DMatrix<f64>,
    treatment: &'a [bool],
}

impl LogitProblem<'_> {
    fn linear_predictor(&self, beta: &[f64]) -> DVector<f64> {
        self.design * DVector::from_column_slice(beta)
    }

    fn mean_neg_loglike(&self, beta: &[f64]) -> f64 {
        let z = self.linear_predictor(beta);
        let total: f64 = z
            .iter()
            .zip(self.treatment)
            .map(|(&zi, &d)| if d { softplus(-zi) } else { softplus(zi) })
            .sum();
        total / self.treatment.len() as f64
    }

    fn mean_neg_gradient(&self, beta: &[f64]) -> Vec<f64> {
        let z = self.linear_predictor(beta);
        let n = self.treatment.len() as f64;
        let resid = DVector::from_iterator(
            z.len(),
            z.iter()
                .zip(self.treatment)
                .map(|(&zi, &d)| (sigmoid(zi) - if d { 1.0 } else { 0.0 }) / n),
        );
        let g = self.design.tr_mul(&resid);
        g.iter().copied().collect()
    }
}

impl CostFunction for LogitProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.mean_neg_loglike(param))
    }
}

impl Gradient for LogitProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        Ok(self.mean_neg_gradient(param))
    }
}

/// Fit the logit of `treatment` on the columns of `design`.
///
/// Non-convergence is reported as `FitFailure`; restarting from another point
/// is left to the caller.
pub fn maximize_loglike(
    design: &DMatrix<f64>,
    treatment: &[bool],
    config: &OptimizerConfig,
) -> Result<LogitFit> {
    let (n, p) = design.shape();
    if n == 0 || treatment.len() != n {
        return Err(CausalError::ShapeMismatch {
            what: "logit design rows",
            expected: treatment.len(),
            found: n,
        });
    }

    let problem = LogitProblem { design, treatment };
    let init = vec![0.0; p];

    // A stationary starting point has no descent direction for the line search.
    let g0 = problem.mean_neg_gradient(&init);
    if g0.iter().map(|g| g * g).sum::<f64>().sqrt() <= config.tol_grad {
        let loglike = -problem.mean_neg_loglike(&init) * n as f64;
        log::debug!("logit: zero vector is stationary, loglike={loglike:.6}");
        return Ok(LogitFit {
            coefficients: DVector::zeros(p),
            loglike,
            n_iter: 0,
        });
    }

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, config.memory)
        .with_tolerance_grad(config.tol_grad)
        .map_err(|e| CausalError::InvalidArgument(format!("optimizer tolerance (grad): {e}")))?
        .with_tolerance_cost(config.tol_cost)
        .map_err(|e| CausalError::InvalidArgument(format!("optimizer tolerance (cost): {e}")))?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(config.max_iter))
        .run()
        .map_err(|e| CausalError::FitFailure(e.to_string()))?;

    let state = res.state();
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    if !converged {
        log::warn!("logit: optimizer stopped without converging ({termination})");
        return Err(CausalError::FitFailure(format!(
            "optimizer stopped after {} iterations: {termination}",
            state.get_iter()
        )));
    }

    let beta = state
        .get_best_param()
        .ok_or_else(|| CausalError::FitFailure("optimizer returned no parameters".to_string()))?;
    let loglike = -state.get_best_cost() * n as f64;
    let n_iter = state.get_iter();
    log::debug!("logit: converged in {n_iter} iterations, loglike={loglike:.6}");

    Ok(LogitFit {
        coefficients: DVector::from_column_slice(beta),
        loglike,
        n_iter,
    })
}
