//! # Efficient Frontier
//!
//! $$
//! r_k = r_{\min} + \frac{k}{N-1}\,(r_{\max}-r_{\min}),\qquad
//! \mathbf w_k = \arg\min_{\mathbf w}\ \rho(\mathbf w)\ \text{s.t.}\ \mathbf 1^\top\mathbf w=1,\
//! \boldsymbol\mu^\top\mathbf w \ge r_k
//! $$
//!
//! The return range is bracketed first, then every target is solved independently.
//! Per-target solves run on the rayon pool and come back in target order.

use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::data::annualize;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::optimizer::bracket_returns;
use crate::optimizer::optimize_min_cvar;
use crate::optimizer::optimize_min_risk;
use crate::optimizer::ratio;
use crate::optimizer::TargetPolicy;
use crate::solver::ConstrainedSolver;
use crate::types::CovarianceMatrix;
use crate::types::FrontierPoint;
use crate::types::OptimizationResult;
use crate::types::Portfolio;
use crate::types::ReturnSeries;
use crate::types::VarModel;

/// Bracket widths at or below this are a single point.
const DEGENERATE_WIDTH: f64 = 1e-12;

/// Risk minimized at each frontier target.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RiskMeasure {
  /// Portfolio volatility from the covariance matrix.
  #[default]
  Variance,
  /// Tail loss `-CVaR` of the historical portfolio return path.
  CVaR { alpha: f64, model: VarModel },
}

/// What to do when the return bracket collapses to a point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DegeneratePolicy {
  #[default]
  SinglePoint,
  Reject,
}

/// Settings for [`build_frontier`].
#[derive(Clone, Debug)]
pub struct FrontierConfig {
  /// Number of equally spaced return targets.
  pub point_count: usize,
  /// Per-asset move allowed around the initial weights; `None` means `[-1, 1]`.
  pub weight_change: Option<f64>,
  pub risk_measure: RiskMeasure,
  pub target_policy: TargetPolicy,
  /// Return scale for reporting, e.g. 252 for daily inputs. Volatility scales by its root.
  pub periods_per_year: f64,
  pub degenerate: DegeneratePolicy,
  /// Solve targets on the rayon pool.
  pub parallel: bool,
}

impl Default for FrontierConfig {
  fn default() -> Self {
    Self {
      point_count: 50,
      weight_change: None,
      risk_measure: RiskMeasure::Variance,
      target_policy: TargetPolicy::AtLeast,
      periods_per_year: 1.0,
      degenerate: DegeneratePolicy::SinglePoint,
      parallel: true,
    }
  }
}

impl FrontierConfig {
  fn validate(&self) -> Result<()> {
    if self.point_count == 0 {
      return Err(PortfolioError::invalid_input(
        "frontier needs at least one point",
      ));
    }
    if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
      return Err(PortfolioError::invalid_input(format!(
        "periods per year must be positive, got {}",
        self.periods_per_year
      )));
    }
    if let RiskMeasure::CVaR { alpha, .. } = self.risk_measure {
      if !(alpha > 0.0 && alpha < 1.0) {
        return Err(PortfolioError::invalid_input(format!(
          "alpha must lie in (0, 1), got {alpha}"
        )));
      }
    }
    Ok(())
  }
}

/// `(volatility, return, sharpe)` for a plotting collaborator.
pub type RenderPoint = (f64, f64, f64);

/// Plot-ready view of a [`Frontier`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedFrontier {
  /// Valid points in target order.
  pub points: Vec<RenderPoint>,
  pub max_sharpe: Option<RenderPoint>,
  pub min_risk: Option<RenderPoint>,
  pub max_return: Option<RenderPoint>,
}

/// Frontier points in increasing target order with the highlighted optima.
#[derive(Clone, Debug, Default)]
pub struct Frontier {
  pub points: Vec<FrontierPoint>,
  /// Index of the valid point with the highest Sharpe ratio.
  pub max_sharpe: Option<usize>,
  /// Index of the valid point with the lowest risk.
  pub min_risk: Option<usize>,
  /// Index of the valid point with the highest realized return.
  pub max_return: Option<usize>,
}

impl Frontier {
  fn new(points: Vec<FrontierPoint>) -> Self {
    let valid = || points.iter().enumerate().filter(|(_, p)| p.valid);
    let max_sharpe = valid()
      .max_by(|a, b| a.1.sharpe.total_cmp(&b.1.sharpe))
      .map(|(i, _)| i);
    let min_risk = valid()
      .min_by(|a, b| a.1.annualized_risk.total_cmp(&b.1.annualized_risk))
      .map(|(i, _)| i);
    let max_return = valid()
      .max_by(|a, b| a.1.annualized_return.total_cmp(&b.1.annualized_return))
      .map(|(i, _)| i);

    Self {
      points,
      max_sharpe,
      min_risk,
      max_return,
    }
  }

  /// Valid point with the highest Sharpe ratio.
  pub fn max_sharpe_point(&self) -> Option<&FrontierPoint> {
    self.max_sharpe.map(|i| &self.points[i])
  }

  /// Valid point with the lowest risk; the minimum-CVaR point on a CVaR frontier.
  pub fn min_risk_point(&self) -> Option<&FrontierPoint> {
    self.min_risk.map(|i| &self.points[i])
  }

  /// Valid point with the highest realized return.
  pub fn max_return_point(&self) -> Option<&FrontierPoint> {
    self.max_return.map(|i| &self.points[i])
  }

  /// Points whose solve converged.
  pub fn valid_points(&self) -> impl Iterator<Item = &FrontierPoint> {
    self.points.iter().filter(|p| p.valid)
  }

  /// Number of points kept as invalid best iterates.
  pub fn failed_count(&self) -> usize {
    self.points.iter().filter(|p| !p.valid).count()
  }

  /// `(volatility, return, sharpe)` tuples of the valid points and the highlighted optima.
  pub fn render_points(&self) -> RenderedFrontier {
    let tuple = |p: &FrontierPoint| (p.annualized_risk, p.annualized_return, p.sharpe);
    RenderedFrontier {
      points: self.valid_points().map(tuple).collect(),
      max_sharpe: self.max_sharpe_point().map(tuple),
      min_risk: self.min_risk_point().map(tuple),
      max_return: self.max_return_point().map(tuple),
    }
  }
}

/// `count` equally spaced values over `[lo, hi]`, both ends included.
fn linspace(lo: f64, hi: f64, count: usize) -> Vec<f64> {
  if count == 1 {
    return vec![lo];
  }
  let step = (hi - lo) / (count - 1) as f64;
  (0..count)
    .map(|k| if k == count - 1 { hi } else { lo + step * k as f64 })
    .collect()
}

/// Trace the frontier of `portfolio`.
///
/// `asset_returns` is the aligned historical return path of each asset and is only
/// read by [`RiskMeasure::CVaR`]. A target whose solve does not converge becomes an
/// invalid point holding the best iterate; any other error aborts the sweep.
pub fn build_frontier(
  portfolio: &Portfolio,
  cov: &CovarianceMatrix,
  asset_returns: Option<&[ReturnSeries]>,
  config: &FrontierConfig,
  solver: &dyn ConstrainedSolver,
) -> Result<Frontier> {
  config.validate()?;
  cov.ensure_aligned(&portfolio.tickers())?;
  let history = match (config.risk_measure, asset_returns) {
    (RiskMeasure::CVaR { .. }, None) => {
      return Err(PortfolioError::invalid_input(
        "CVaR frontier needs per-asset return series",
      ))
    }
    (_, history) => history.unwrap_or(&[]),
  };

  let (min_ret, max_ret) = bracket_returns(portfolio, config.weight_change, solver)?;
  let targets = if max_ret - min_ret <= DEGENERATE_WIDTH {
    match config.degenerate {
      DegeneratePolicy::Reject => {
        return Err(PortfolioError::invalid_input(format!(
          "return range collapses to {min_ret}"
        )))
      }
      DegeneratePolicy::SinglePoint => {
        warn!(min_ret, max_ret, "degenerate return range, single-point frontier");
        vec![min_ret]
      }
    }
  } else {
    linspace(min_ret, max_ret, config.point_count)
  };

  let solve_point = |&target: &f64| -> Result<FrontierPoint> {
    let solved = match config.risk_measure {
      RiskMeasure::Variance => optimize_min_risk(
        portfolio,
        cov,
        target,
        config.target_policy,
        config.weight_change,
        solver,
      ),
      RiskMeasure::CVaR { alpha, model } => optimize_min_cvar(
        portfolio,
        history,
        alpha,
        model,
        target,
        config.target_policy,
        config.weight_change,
        solver,
      ),
    };

    let (result, valid) = match solved {
      Ok(result) => (result, true),
      Err(PortfolioError::ConvergenceFailure {
        constraint_violation,
        best,
        ..
      }) => {
        warn!(target, constraint_violation, "frontier point failed");
        (*best, false)
      }
      Err(e) => return Err(e),
    };
    Ok(frontier_point(target, result, valid, config))
  };

  let points = if config.parallel {
    targets.par_iter().map(solve_point).collect::<Result<Vec<_>>>()?
  } else {
    targets.iter().map(solve_point).collect::<Result<Vec<_>>>()?
  };

  let frontier = Frontier::new(points);
  info!(
    points = frontier.points.len(),
    failed = frontier.failed_count(),
    min_ret,
    max_ret,
    "frontier built"
  );
  Ok(frontier)
}

fn frontier_point(
  target: f64,
  result: OptimizationResult,
  valid: bool,
  config: &FrontierConfig,
) -> FrontierPoint {
  let (annualized_return, annualized_risk) = match config.risk_measure {
    RiskMeasure::Variance => {
      annualize(result.expected_return, result.risk, config.periods_per_year)
    }
    // tail loss stays a per-period quantity
    RiskMeasure::CVaR { .. } => (result.expected_return * config.periods_per_year, result.risk),
  };
  let sharpe = ratio(annualized_return, annualized_risk);
  debug!(target, annualized_return, annualized_risk, valid, "frontier point");

  FrontierPoint {
    target_return: target,
    result,
    annualized_return,
    annualized_risk,
    sharpe,
    valid,
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;
  use tracing_test::traced_test;

  use super::*;
  use crate::solver::AugmentedLagrangian;
  use crate::solver::Problem;
  use crate::solver::SolverOutcome;

  fn two_assets() -> (Portfolio, CovarianceMatrix) {
    let p = Portfolio::from_parts(&["A", "B"], &[0.05, 0.10], &[0.5, 0.5]).unwrap();
    let cov =
      CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.0], vec![0.0, 0.09]]).unwrap();
    (p, cov)
  }

  fn config(points: usize) -> FrontierConfig {
    FrontierConfig {
      point_count: points,
      ..Default::default()
    }
  }

  #[test]
  fn linspace_includes_both_ends() {
    let xs = linspace(0.05, 0.10, 5);
    assert_eq!(xs.len(), 5);
    assert_eq!(xs[0], 0.05);
    assert_eq!(xs[4], 0.10);
    assert_abs_diff_eq!(xs[2], 0.075, epsilon = 1e-15);
  }

  #[test]
  fn five_targets_span_the_bracket() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let frontier = build_frontier(&p, &cov, None, &config(5), &solver).unwrap();

    assert_eq!(frontier.points.len(), 5);
    for pair in frontier.points.windows(2) {
      assert!(pair[1].target_return > pair[0].target_return);
    }
    assert_abs_diff_eq!(frontier.points[0].target_return, 0.05, epsilon = 1e-6);
    assert_abs_diff_eq!(frontier.points[4].target_return, 0.10, epsilon = 1e-6);
  }

  #[test]
  fn risk_is_monotone_along_the_frontier() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let frontier = build_frontier(&p, &cov, None, &config(5), &solver).unwrap();

    assert_eq!(frontier.failed_count(), 0);
    for pair in frontier.points.windows(2) {
      assert!(pair[1].annualized_risk >= pair[0].annualized_risk - 1e-6);
    }
    for point in &frontier.points {
      assert_abs_diff_eq!(point.result.weight_sum(), 1.0, epsilon = 1e-6);
      assert!(point.result.expected_return >= point.target_return - 1e-6);
    }

    let min_risk = frontier.min_risk_point().unwrap();
    // global minimum-variance portfolio: w = [9/13, 4/13]
    assert_abs_diff_eq!(min_risk.annualized_risk, (0.36f64 / 13.0).sqrt(), epsilon = 1e-5);
  }

  #[test]
  fn exact_policy_tracks_every_target() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let cfg = FrontierConfig {
      target_policy: TargetPolicy::Exact,
      ..config(5)
    };
    let frontier = build_frontier(&p, &cov, None, &cfg, &solver).unwrap();

    assert_eq!(frontier.failed_count(), 0);
    for point in &frontier.points {
      assert_abs_diff_eq!(point.result.expected_return, point.target_return, epsilon = 1e-6);
    }
    // the lowest target is only reachable fully in asset A
    assert_abs_diff_eq!(frontier.points[0].annualized_risk, 0.2, epsilon = 1e-5);

    let floor = build_frontier(&p, &cov, None, &config(5), &solver).unwrap();
    assert!(frontier.points[0].annualized_risk > floor.points[0].annualized_risk + 1e-3);
  }

  #[test]
  fn annualization_scales_return_and_root_scales_risk() {
    let (p, cov) = two_assets();
    let solver = AugmentedLagrangian::default();
    let cfg = FrontierConfig {
      point_count: 3,
      periods_per_year: 252.0,
      parallel: false,
      ..Default::default()
    };
    let frontier = build_frontier(&p, &cov, None, &cfg, &solver).unwrap();
    for point in frontier.valid_points() {
      assert_abs_diff_eq!(
        point.annualized_return,
        point.result.expected_return * 252.0,
        epsilon = 1e-12
      );
      assert_abs_diff_eq!(
        point.annualized_risk,
        point.result.risk * 252f64.sqrt(),
        epsilon = 1e-12
      );
    }
  }

  #[test]
  fn degenerate_bracket_follows_policy() {
    let p = Portfolio::from_parts(&["A"], &[0.05], &[1.0]).unwrap();
    let cov = CovarianceMatrix::from_tickers(&["A"], vec![vec![0.04]]).unwrap();
    let solver = AugmentedLagrangian::default();

    let pinned = FrontierConfig {
      weight_change: Some(0.0),
      ..config(5)
    };
    let frontier = build_frontier(&p, &cov, None, &pinned, &solver).unwrap();
    assert_eq!(frontier.points.len(), 1);
    assert_eq!(frontier.max_sharpe, Some(0));

    let cfg = FrontierConfig {
      degenerate: DegeneratePolicy::Reject,
      ..pinned
    };
    assert!(matches!(
      build_frontier(&p, &cov, None, &cfg, &solver),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn cvar_frontier_without_history_is_rejected() {
    let (p, cov) = two_assets();
    let cfg = FrontierConfig {
      risk_measure: RiskMeasure::CVaR {
        alpha: 0.05,
        model: VarModel::Empirical,
      },
      ..config(3)
    };
    assert!(build_frontier(&p, &cov, None, &cfg, &AugmentedLagrangian::default()).is_err());
  }

  #[test]
  fn cvar_frontier_keeps_structure() {
    let mut rng = StdRng::seed_from_u64(1);
    let a = Normal::new(0.0005, 0.01).unwrap();
    let b = Normal::new(0.0008, 0.02).unwrap();
    let ra: Vec<f64> = (0..250).map(|_| a.sample(&mut rng)).collect();
    let rb: Vec<f64> = (0..250).map(|_| b.sample(&mut rng)).collect();
    let series = vec![
      ReturnSeries::new("A", ra).unwrap(),
      ReturnSeries::new("B", rb).unwrap(),
    ];
    let (p, cov) = crate::data::estimate_inputs(&series, &[0.5, 0.5]).unwrap();

    let cfg = FrontierConfig {
      point_count: 4,
      risk_measure: RiskMeasure::CVaR {
        alpha: 0.05,
        model: VarModel::Empirical,
      },
      ..Default::default()
    };
    let frontier =
      build_frontier(&p, &cov, Some(&series), &cfg, &AugmentedLagrangian::default()).unwrap();

    assert_eq!(frontier.points.len(), 4);
    for pair in frontier.points.windows(2) {
      assert!(pair[1].target_return > pair[0].target_return);
    }
    for point in frontier.valid_points() {
      assert_abs_diff_eq!(point.result.weight_sum(), 1.0, epsilon = 1e-6);
      assert!(point.result.expected_return >= point.target_return - 1e-6);
      assert!(point.annualized_risk.is_finite());
    }

    // the two points a mean-CVaR chart highlights
    let safest = frontier.min_risk_point().unwrap();
    let richest = frontier.max_return_point().unwrap();
    assert!(frontier.valid_points().all(|pt| pt.annualized_risk >= safest.annualized_risk));
    assert!(frontier.valid_points().all(|pt| pt.annualized_return <= richest.annualized_return));
  }

  /// Delegates to the real solver but reports heavy allocations to B as failures.
  struct FailingHighReturn(AugmentedLagrangian);

  impl ConstrainedSolver for FailingHighReturn {
    fn minimize(&self, problem: &Problem<'_>, x0: &[f64]) -> Result<SolverOutcome> {
      let mut outcome = self.0.minimize(problem, x0)?;
      if problem.constraints().len() == 2 && outcome.x[1] > 0.7 {
        outcome.converged = false;
      }
      Ok(outcome)
    }
  }

  #[test]
  #[traced_test]
  fn failed_points_are_flagged_and_never_highlighted() {
    let (p, cov) = two_assets();
    let solver = FailingHighReturn(AugmentedLagrangian::default());
    let cfg = FrontierConfig {
      parallel: false,
      ..config(5)
    };
    let frontier = build_frontier(&p, &cov, None, &cfg, &solver).unwrap();

    assert_eq!(frontier.points.len(), 5);
    assert!(!frontier.points[3].valid);
    assert!(!frontier.points[4].valid);
    assert_eq!(frontier.failed_count(), 2);
    assert!(frontier.max_sharpe.is_some_and(|i| i < 3));
    assert!(frontier.min_risk.is_some_and(|i| i < 3));
    assert_eq!(frontier.max_return, Some(2));
    assert_eq!(frontier.render_points().points.len(), 3);
    assert!(logs_contain("frontier point failed"));
  }

  #[test]
  fn render_points_carry_highlighted_optima() {
    let (p, cov) = two_assets();
    let frontier =
      build_frontier(&p, &cov, None, &config(5), &AugmentedLagrangian::default()).unwrap();
    let rendered = frontier.render_points();

    assert_eq!(rendered.points.len(), 5);
    let best = rendered.max_sharpe.unwrap();
    assert!(rendered.points.iter().all(|pt| pt.2 <= best.2));
    let safest = rendered.min_risk.unwrap();
    assert!(rendered.points.iter().all(|pt| pt.0 >= safest.0));
    let richest = rendered.max_return.unwrap();
    assert!(rendered.points.iter().all(|pt| pt.1 <= richest.1));
  }
}
