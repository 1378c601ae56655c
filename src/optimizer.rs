//! # Portfolio Optimizer
//!
//! $$
//! \max_{\mathbf w}\ \boldsymbol\mu^\top\mathbf w\ \text{s.t.}\ \sigma(\mathbf w)\le\bar\sigma,
//! \qquad
//! \min_{\mathbf w}\ \sigma(\mathbf w) \ \text{s.t.}\ \boldsymbol\mu^\top\mathbf w\ge\bar r,\qquad
//! \max_{\mathbf w}\ \frac{\boldsymbol\mu^\top\mathbf w}{100\,\sigma(\mathbf w)}
//! $$
//!
//! All modes carry $\mathbf 1^\top\mathbf w = 1$ and per-asset box bounds centred on
//! the initial weights. Weights may be negative (short positions).

use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::risk;
use crate::solver::Bounds;
use crate::solver::ConstrainedSolver;
use crate::solver::Constraint;
use crate::solver::Problem;
use crate::solver::SolverOutcome;
use crate::types::CovarianceMatrix;
use crate::types::OptimizationMode;
use crate::types::OptimizationResult;
use crate::types::Portfolio;
use crate::types::ReturnSeries;
use crate::types::VarModel;

/// Volatility below this is treated as riskless when forming ratios.
pub(crate) const RISKLESS_VOL: f64 = 1e-15;

/// How a return target enters a constrained solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetPolicy {
  /// Portfolio return must reach at least the target.
  #[default]
  AtLeast,
  /// Portfolio return must equal the target.
  Exact,
}

/// Per-asset bounds `[w - δ, w + δ] ∩ [-1, 1]`, or `[-1, 1]` without `δ`.
pub fn bounds_for(initial_weights: &[f64], weight_change: Option<f64>) -> Result<Bounds> {
  let pairs = match weight_change {
    None => vec![(-1.0, 1.0); initial_weights.len()],
    Some(delta) => {
      if !(delta.is_finite() && delta >= 0.0) {
        return Err(PortfolioError::invalid_input(format!(
          "weight change must be a non-negative finite number, got {delta}"
        )));
      }
      initial_weights
        .iter()
        .map(|&w| ((w - delta).max(-1.0), (w + delta).min(1.0)))
        .collect()
    }
  };

  if pairs.iter().any(|(lo, hi)| lo > hi) {
    return Err(PortfolioError::invalid_input(
      "initial weight outside [-1, 1] leaves an empty bound range",
    ));
  }

  Bounds::new(pairs)
}

/// [`bounds_for`] plus a check that some weight vector inside them sums to one.
pub(crate) fn invested_bounds(
  initial_weights: &[f64],
  weight_change: Option<f64>,
) -> Result<Bounds> {
  let bounds = bounds_for(initial_weights, weight_change)?;
  let lower: f64 = bounds.lower().iter().sum();
  let upper: f64 = bounds.upper().iter().sum();
  if lower > 1.0 + 1e-12 || upper < 1.0 - 1e-12 {
    return Err(PortfolioError::invalid_input(format!(
      "bounds admit no fully invested portfolio (weight sum range [{lower}, {upper}])"
    )));
  }
  Ok(bounds)
}

pub(crate) fn sum_to_one<'a>() -> Constraint<'a> {
  Constraint::equality("sum_to_one", |w: &[f64]| 1.0 - w.iter().sum::<f64>())
}

pub(crate) fn return_target<'a>(
  mu: &'a [f64],
  target: f64,
  policy: TargetPolicy,
) -> Constraint<'a> {
  let gap = move |w: &[f64]| crate::data::dot(mu, w) - target;
  match policy {
    TargetPolicy::AtLeast => Constraint::inequality("return_floor", gap),
    TargetPolicy::Exact => Constraint::equality("return_target", gap),
  }
}

pub(crate) fn ratio(ret: f64, risk: f64) -> f64 {
  if risk > RISKLESS_VOL {
    ret / risk
  } else {
    0.0
  }
}

/// Turn a solver outcome into a result, or a [`PortfolioError::ConvergenceFailure`]
/// carrying it.
pub(crate) fn finish(
  outcome: SolverOutcome,
  measure: impl FnOnce(&[f64]) -> (f64, f64, f64),
) -> Result<OptimizationResult> {
  let (expected_return, risk, ratio) = measure(&outcome.x);
  let result = OptimizationResult {
    weights: outcome.x,
    expected_return,
    risk,
    ratio,
    converged: outcome.converged,
    iterations: outcome.iterations,
    constraint_violation: outcome.max_violation,
  };

  if result.converged {
    Ok(result)
  } else {
    Err(PortfolioError::ConvergenceFailure {
      iterations: result.iterations,
      constraint_violation: result.constraint_violation,
      best: Box::new(result),
    })
  }
}

fn validate_target(mode: OptimizationMode, target: Option<f64>) -> Result<Option<f64>> {
  if !mode.requires_target() {
    if target.is_some() {
      debug!(%mode, "target ignored");
    }
    return Ok(None);
  }

  let target = target.ok_or_else(|| {
    PortfolioError::invalid_input(format!("{mode} requires a target"))
  })?;
  if !target.is_finite() {
    return Err(PortfolioError::invalid_input(format!(
      "target must be finite, got {target}"
    )));
  }
  if mode == OptimizationMode::MaxReturn && target < 0.0 {
    return Err(PortfolioError::invalid_input(format!(
      "volatility ceiling must be non-negative, got {target}"
    )));
  }
  Ok(Some(target))
}

/// Solve one of the three mean-variance modes starting from the portfolio's weights.
///
/// `target` is a volatility ceiling for [`OptimizationMode::MaxReturn`], a return floor
/// for [`OptimizationMode::MinRisk`] and ignored for [`OptimizationMode::MaxSharpe`].
/// `ratio` on the result is `return / volatility`.
pub fn optimize(
  portfolio: &Portfolio,
  cov: &CovarianceMatrix,
  mode: OptimizationMode,
  target: Option<f64>,
  weight_change: Option<f64>,
  solver: &dyn ConstrainedSolver,
) -> Result<OptimizationResult> {
  cov.ensure_aligned(&portfolio.tickers())?;
  let target = validate_target(mode, target)?;
  let mu = portfolio.expected_returns();
  let x0 = portfolio.weights();
  let bounds = invested_bounds(&x0, weight_change)?;

  let problem = match (mode, target) {
    (OptimizationMode::MaxReturn, Some(ceiling)) => {
      Problem::new(|w: &[f64]| -crate::data::dot(&mu, w), bounds)
        .with_constraint(sum_to_one())
        .with_constraint(Constraint::inequality("volatility_ceiling", move |w: &[f64]| {
          ceiling - cov.volatility(w)
        }))
    }
    (OptimizationMode::MinRisk, Some(floor)) => {
      Problem::new(|w: &[f64]| cov.volatility(w), bounds)
        .with_constraint(sum_to_one())
        .with_constraint(return_target(&mu, floor, TargetPolicy::AtLeast))
    }
    _ => Problem::new(
      |w: &[f64]| {
        let vol = cov.volatility(w).max(RISKLESS_VOL);
        -crate::data::dot(&mu, w) / (100.0 * vol)
      },
      bounds,
    )
    .with_constraint(sum_to_one()),
  };

  let outcome = solver.minimize(&problem, &x0)?;
  debug!(
    %mode,
    iterations = outcome.iterations,
    converged = outcome.converged,
    "optimization finished"
  );

  finish(outcome, |w| {
    let ret = crate::data::dot(&mu, w);
    let vol = cov.volatility(w);
    (ret, vol, ratio(ret, vol))
  })
}

/// Minimum-volatility weights for a return target under `policy`.
pub fn optimize_min_risk(
  portfolio: &Portfolio,
  cov: &CovarianceMatrix,
  target: f64,
  policy: TargetPolicy,
  weight_change: Option<f64>,
  solver: &dyn ConstrainedSolver,
) -> Result<OptimizationResult> {
  if policy == TargetPolicy::AtLeast {
    return optimize(
      portfolio,
      cov,
      OptimizationMode::MinRisk,
      Some(target),
      weight_change,
      solver,
    );
  }

  cov.ensure_aligned(&portfolio.tickers())?;
  validate_target(OptimizationMode::MinRisk, Some(target))?;
  let mu = portfolio.expected_returns();
  let x0 = portfolio.weights();
  let problem = Problem::new(|w: &[f64]| cov.volatility(w), invested_bounds(&x0, weight_change)?)
    .with_constraint(sum_to_one())
    .with_constraint(return_target(&mu, target, policy));

  let outcome = solver.minimize(&problem, &x0)?;
  finish(outcome, |w| {
    let ret = crate::data::dot(&mu, w);
    let vol = cov.volatility(w);
    (ret, vol, ratio(ret, vol))
  })
}

/// Lowest and highest portfolio return reachable under the sum-to-one constraint and
/// the bounds implied by `weight_change`.
pub fn bracket_returns(
  portfolio: &Portfolio,
  weight_change: Option<f64>,
  solver: &dyn ConstrainedSolver,
) -> Result<(f64, f64)> {
  let mu = portfolio.expected_returns();
  let x0 = portfolio.weights();

  let mut ends = [0.0; 2];
  for (slot, sign) in ends.iter_mut().zip([1.0, -1.0]) {
    let problem = Problem::new(
      |w: &[f64]| sign * crate::data::dot(&mu, w),
      invested_bounds(&x0, weight_change)?,
    )
    .with_constraint(sum_to_one());

    let outcome = solver.minimize(&problem, &x0)?;
    let result = finish(outcome, |w| (crate::data::dot(&mu, w), 0.0, 0.0))?;
    *slot = result.expected_return;
  }

  let (min_ret, max_ret) = (ends[0].min(ends[1]), ends[0].max(ends[1]));
  debug!(min_ret, max_ret, "return bracket");
  Ok((min_ret, max_ret))
}

/// CVaR of a portfolio return path, evaluated inside the solver loop.
struct TailObjective<'a> {
  asset_returns: &'a [ReturnSeries],
  periods: usize,
  alpha: f64,
  model: VarModel,
  z: f64,
}

impl TailObjective<'_> {
  fn cvar(&self, w: &[f64]) -> f64 {
    let path = risk::weighted_sum(w, self.asset_returns, self.periods);
    let threshold = match self.model {
      VarModel::Empirical => {
        let mut sorted = path.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        risk::quantile_sorted(&sorted, self.alpha)
      }
      VarModel::Parametric => {
        let mean = crate::data::sample_mean(&path);
        let sd = (path.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
          / (self.periods - 1) as f64)
          .sqrt();
        mean - self.z * sd
      }
    };
    // empty parametric tail: the threshold itself is the tail estimate
    risk::tail_mean(&path, threshold).unwrap_or(threshold)
  }
}

/// Maximize CVaR (minimize tail loss) of the historical portfolio path subject to
/// full investment and a return target.
///
/// `risk` on the result is the tail loss `-CVaR`, `ratio` is `return / risk`.
#[allow(clippy::too_many_arguments)]
pub fn optimize_min_cvar(
  portfolio: &Portfolio,
  asset_returns: &[ReturnSeries],
  alpha: f64,
  model: VarModel,
  target: f64,
  policy: TargetPolicy,
  weight_change: Option<f64>,
  solver: &dyn ConstrainedSolver,
) -> Result<OptimizationResult> {
  let tickers = portfolio.tickers();
  if asset_returns.len() != tickers.len()
    || asset_returns.iter().zip(&tickers).any(|(s, t)| s.label() != *t)
  {
    return Err(PortfolioError::invalid_input(
      "return series must match the portfolio's tickers in order",
    ));
  }
  let periods = asset_returns[0].len();
  if asset_returns.iter().any(|s| s.len() != periods) {
    return Err(PortfolioError::invalid_input(
      "asset return series are not aligned",
    ));
  }
  risk::validate(asset_returns[0].values(), alpha)?;
  if model == VarModel::Parametric && periods < 2 {
    return Err(PortfolioError::invalid_input(
      "parametric CVaR needs at least two observations",
    ));
  }
  if !target.is_finite() {
    return Err(PortfolioError::invalid_input(format!(
      "target must be finite, got {target}"
    )));
  }

  let tail = TailObjective {
    asset_returns,
    periods,
    alpha,
    model,
    z: risk::standard_normal_quantile(1.0 - alpha)?,
  };
  let mu = portfolio.expected_returns();
  let x0 = portfolio.weights();
  let problem = Problem::new(|w: &[f64]| -tail.cvar(w), invested_bounds(&x0, weight_change)?)
    .with_constraint(sum_to_one())
    .with_constraint(return_target(&mu, target, policy));

  let outcome = solver.minimize(&problem, &x0)?;
  debug!(
    target,
    iterations = outcome.iterations,
    converged = outcome.converged,
    "min-CVaR finished"
  );

  finish(outcome, |w| {
    let ret = crate::data::dot(&mu, w);
    let loss = -tail.cvar(w);
    (ret, loss, ratio(ret, loss))
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::solver::AugmentedLagrangian;

  fn two_assets() -> (Portfolio, CovarianceMatrix) {
    let p = Portfolio::from_parts(&["A", "B"], &[0.05, 0.10], &[0.5, 0.5]).unwrap();
    let cov =
      CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.0], vec![0.0, 0.09]]).unwrap();
    (p, cov)
  }

  #[test]
  fn bounds_follow_weight_change() {
    let b = bounds_for(&[0.5, 0.9], Some(0.3)).unwrap();
    for (got, want) in b.lower().iter().zip([0.2, 0.6]) {
      assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
    }
    for (got, want) in b.upper().iter().zip([0.8, 1.0]) {
      assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
    }

    let b = bounds_for(&[0.5, 0.5], None).unwrap();
    assert_eq!(b.lower(), &[-1.0, -1.0]);
    assert_eq!(b.upper(), &[1.0, 1.0]);
  }

  #[test]
  fn negative_weight_change_is_rejected() {
    assert!(bounds_for(&[0.5, 0.5], Some(-0.1)).is_err());
  }

  #[test]
  fn max_sharpe_matches_tangency_weights() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let res = optimize(&p, &cov, OptimizationMode::MaxSharpe, None, None, &solver).unwrap();

    // normalized Σ⁻¹μ = [1.25, 1.111] / 2.3611
    assert_abs_diff_eq!(res.weights[0], 0.529412, epsilon = 1e-3);
    assert_abs_diff_eq!(res.weights[1], 0.470588, epsilon = 1e-3);
    assert_abs_diff_eq!(res.weight_sum(), 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(res.ratio, res.expected_return / res.risk, epsilon = 1e-12);
  }

  #[test]
  fn min_risk_meets_return_floor() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let res = optimize(&p, &cov, OptimizationMode::MinRisk, Some(0.08), None, &solver).unwrap();

    assert_abs_diff_eq!(res.weight_sum(), 1.0, epsilon = 1e-6);
    assert!(res.expected_return >= 0.08 - 1e-6);
    assert_abs_diff_eq!(res.weights[0], 0.4, epsilon = 1e-3);
  }

  #[test]
  fn max_return_respects_volatility_ceiling() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let res = optimize(&p, &cov, OptimizationMode::MaxReturn, Some(0.2), None, &solver).unwrap();

    assert_abs_diff_eq!(res.weight_sum(), 1.0, epsilon = 1e-6);
    assert!(res.risk <= 0.2 + 1e-6);
    assert_abs_diff_eq!(res.weights[1], 0.615385, epsilon = 1e-3);
  }

  #[test]
  fn missing_target_is_invalid_input() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    for mode in [OptimizationMode::MinRisk, OptimizationMode::MaxReturn] {
      assert!(matches!(
        optimize(&p, &cov, mode, None, None, &solver),
        Err(PortfolioError::InvalidInput(_))
      ));
    }
  }

  #[test]
  fn misaligned_covariance_is_rejected() {
    let (p, _) = two_assets();
    let cov =
      CovarianceMatrix::from_tickers(&["B", "A"], vec![vec![0.09, 0.0], vec![0.0, 0.04]]).unwrap();
    let solver = AugmentedLagrangian::default();
    assert!(optimize(&p, &cov, OptimizationMode::MaxSharpe, None, None, &solver).is_err());
  }

  #[test]
  fn single_asset_stays_fully_invested() {
    let p = Portfolio::from_parts(&["A"], &[0.05], &[1.0]).unwrap();
    let cov = CovarianceMatrix::from_tickers(&["A"], vec![vec![0.04]]).unwrap();
    let solver = AugmentedLagrangian::default();

    for (mode, target) in [
      (OptimizationMode::MaxSharpe, None),
      (OptimizationMode::MinRisk, Some(0.05)),
      (OptimizationMode::MaxReturn, Some(0.2)),
    ] {
      let res = optimize(&p, &cov, mode, target, Some(0.0), &solver).unwrap();
      assert_abs_diff_eq!(res.weights[0], 1.0, epsilon = 1e-12);
      assert_abs_diff_eq!(res.expected_return, 0.05, epsilon = 1e-12);
      assert_abs_diff_eq!(res.risk, 0.2, epsilon = 1e-12);
    }
  }

  #[test]
  fn infeasible_floor_reports_convergence_failure() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::new(crate::solver::SolverConfig {
      max_outer_iterations: 10,
      ..Default::default()
    });
    // best reachable return with weights in [0.2, 0.8] is 0.09
    let err = optimize(&p, &cov, OptimizationMode::MinRisk, Some(0.2), Some(0.3), &solver)
      .unwrap_err();
    assert!(err.is_convergence_failure());
    let best = err.best_iterate().unwrap();
    assert_eq!(best.weights.len(), 2);
    assert!(best.constraint_violation > 1e-3);
  }

  #[test]
  fn exact_target_pins_return_below_minimum_variance() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();

    // minimum-variance return is 0.0654, so a 0.06 floor is slack but an exact 0.06 is not
    let floor = optimize_min_risk(&p, &cov, 0.06, TargetPolicy::AtLeast, None, &solver).unwrap();
    assert_abs_diff_eq!(floor.weights[0], 9.0 / 13.0, epsilon = 1e-3);

    let exact = optimize_min_risk(&p, &cov, 0.06, TargetPolicy::Exact, None, &solver).unwrap();
    assert_abs_diff_eq!(exact.expected_return, 0.06, epsilon = 1e-6);
    assert_abs_diff_eq!(exact.weights[0], 0.8, epsilon = 1e-4);
    assert_abs_diff_eq!(exact.weights[1], 0.2, epsilon = 1e-4);
    assert!(exact.risk > floor.risk);
  }

  #[test]
  fn wall_clock_cap_surfaces_as_convergence_failure() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::new(crate::solver::SolverConfig {
      max_duration: Some(std::time::Duration::ZERO),
      ..Default::default()
    });
    let err = optimize(&p, &cov, OptimizationMode::MaxSharpe, None, None, &solver).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::ConvergenceFailure { iterations: 0, .. }
    ));
    assert_eq!(err.best_iterate().unwrap().weights, p.weights());
  }

  #[test]
  fn bracket_spans_extreme_allocations() {
    let (p, _) = two_assets();
    let solver = AugmentedLagrangian::default();
    let (lo, hi) = bracket_returns(&p, None, &solver).unwrap();
    assert_abs_diff_eq!(lo, 0.05, epsilon = 1e-6);
    assert_abs_diff_eq!(hi, 0.10, epsilon = 1e-6);

    let (lo, hi) = bracket_returns(&p, Some(0.3), &solver).unwrap();
    assert_abs_diff_eq!(lo, 0.8 * 0.05 + 0.2 * 0.10, epsilon = 1e-6);
    assert_abs_diff_eq!(hi, 0.2 * 0.05 + 0.8 * 0.10, epsilon = 1e-6);
  }

  #[test]
  fn min_cvar_hits_exact_target() {
    let a = ReturnSeries::new("A", vec![0.010, -0.020, 0.015, -0.005, 0.020, -0.030, 0.005, 0.0])
      .unwrap();
    let b = ReturnSeries::new("B", vec![-0.010, 0.030, -0.020, 0.010, 0.000, 0.025, -0.015, 0.02])
      .unwrap();
    let mu = vec![a.mean(), b.mean()];
    let p = Portfolio::from_parts(&["A", "B"], &mu, &[0.5, 0.5]).unwrap();
    let target = 0.5 * (mu[0] + mu[1]);
    let solver = AugmentedLagrangian::default();

    let res = optimize_min_cvar(
      &p,
      &[a, b],
      0.25,
      VarModel::Empirical,
      target,
      TargetPolicy::Exact,
      None,
      &solver,
    );
    // CVaR is piecewise linear; accept a result or a reported non-convergence
    let res = match res {
      Ok(r) => r,
      Err(e) => e.best_iterate().cloned().unwrap(),
    };
    assert_abs_diff_eq!(res.weight_sum(), 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(res.expected_return, target, epsilon = 1e-4);
  }

  #[test]
  fn min_cvar_rejects_mismatched_series() {
    let (p, _) = two_assets();
    let a = ReturnSeries::new("A", vec![0.01, 0.02]).unwrap();
    let solver = AugmentedLagrangian::default();
    assert!(matches!(
      optimize_min_cvar(
        &p,
        &[a],
        0.05,
        VarModel::Empirical,
        0.05,
        TargetPolicy::AtLeast,
        None,
        &solver
      ),
      Err(PortfolioError::InvalidInput(_))
    ));
  }
}
