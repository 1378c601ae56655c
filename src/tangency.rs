//! # Tangency Optimizer
//!
//! $$
//! \max_{\mathbf w}\ \boldsymbol\mu^\top\mathbf w + (1-\mathbf 1^\top\mathbf w)\,r_f
//! - \tau\,\big(100\,\sigma(\mathbf w)\big)^2
//! $$
//!
//! The unspent fraction earns the risk-free rate, so there is no sum-to-one
//! constraint. Only the per-asset bounds apply.

use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::optimizer::bounds_for;
use crate::optimizer::finish;
use crate::optimizer::RISKLESS_VOL;
use crate::solver::ConstrainedSolver;
use crate::solver::Problem;
use crate::types::CovarianceMatrix;
use crate::types::OptimizationResult;
use crate::types::Portfolio;
use crate::types::UtilityMode;

/// Net exposure below this cannot be renormalized.
const MIN_EXPOSURE: f64 = 1e-12;

fn utility_return(mu: &[f64], w: &[f64], risk_free: f64) -> f64 {
  crate::data::dot(mu, w) + (1.0 - w.iter().sum::<f64>()) * risk_free
}

/// Maximize the mean-variance utility with risk aversion `risk_aversion`.
///
/// [`UtilityMode::RiskAdjusted`] reports the optimum as found with `ratio` set to
/// `return - τσ²`. [`UtilityMode::SharpeDerived`] rescales the optimum to a fully
/// invested portfolio and reports `(return - r_f) / σ` of the unscaled optimum.
pub fn optimize_utility(
  portfolio: &Portfolio,
  cov: &CovarianceMatrix,
  risk_aversion: f64,
  risk_free: f64,
  mode: UtilityMode,
  weight_change: Option<f64>,
  solver: &dyn ConstrainedSolver,
) -> Result<OptimizationResult> {
  cov.ensure_aligned(&portfolio.tickers())?;
  if !(risk_aversion.is_finite() && risk_aversion >= 0.0) {
    return Err(PortfolioError::invalid_input(format!(
      "risk aversion must be a non-negative finite number, got {risk_aversion}"
    )));
  }
  if !risk_free.is_finite() {
    return Err(PortfolioError::invalid_input(format!(
      "risk-free rate must be finite, got {risk_free}"
    )));
  }

  let mu = portfolio.expected_returns();
  let x0 = portfolio.weights();
  let problem = Problem::new(
    |w: &[f64]| {
      let scaled_vol = 100.0 * cov.volatility(w);
      -(utility_return(&mu, w, risk_free) - risk_aversion * scaled_vol * scaled_vol)
    },
    bounds_for(&x0, weight_change)?,
  );

  let outcome = solver.minimize(&problem, &x0)?;
  debug!(
    ?mode,
    iterations = outcome.iterations,
    converged = outcome.converged,
    "utility optimization finished"
  );

  let result = finish(outcome, |w| {
    let ret = utility_return(&mu, w, risk_free);
    let vol = cov.volatility(w);
    let score = match mode {
      UtilityMode::RiskAdjusted => ret - risk_aversion * vol * vol,
      UtilityMode::SharpeDerived if vol > RISKLESS_VOL => (ret - risk_free) / vol,
      UtilityMode::SharpeDerived => 0.0,
    };
    (ret, vol, score)
  })?;

  match mode {
    UtilityMode::RiskAdjusted => Ok(result),
    UtilityMode::SharpeDerived => {
      let exposure = result.weight_sum();
      if exposure.abs() < MIN_EXPOSURE {
        return Err(PortfolioError::invalid_input(
          "utility optimum has no net exposure; weights cannot be normalized",
        ));
      }
      let weights = result.weights.iter().map(|w| w / exposure).collect();
      Ok(OptimizationResult { weights, ..result })
    }
  }
}
