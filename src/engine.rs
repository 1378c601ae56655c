//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\mu, \Sigma, \text{mode})
//! $$
//!
//! High-level entry point bundling solver, frontier and risk settings.

use crate::error::Result;
use crate::frontier::build_frontier;
use crate::frontier::Frontier;
use crate::frontier::FrontierConfig;
use crate::optimizer;
use crate::risk;
use crate::solver::AugmentedLagrangian;
use crate::solver::SolverConfig;
use crate::tangency;
use crate::types::CovarianceMatrix;
use crate::types::OptimizationMode;
use crate::types::OptimizationResult;
use crate::types::Portfolio;
use crate::types::ReturnSeries;
use crate::types::UtilityMode;
use crate::types::VarModel;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct PortfolioEngineConfig {
  /// Tolerances and caps for every solve the engine runs.
  pub solver: SolverConfig,
  /// Settings for [`PortfolioEngine::frontier`] and [`PortfolioEngine::min_cvar`].
  pub frontier: FrontierConfig,
  /// Risk-free rate used by the utility optimizer.
  pub risk_free: f64,
  /// Tail probability for VaR and CVaR.
  pub var_alpha: f64,
  /// Empirical or parametric tail estimates.
  pub var_model: VarModel,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      solver: SolverConfig::default(),
      frontier: FrontierConfig::default(),
      risk_free: 0.0,
      var_alpha: 0.05,
      var_model: VarModel::Empirical,
    }
  }
}

/// VaR and CVaR of one return path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TailRisk {
  pub var: f64,
  pub cvar: f64,
}

/// Single entry point for optimization, frontier and risk workflows.
#[derive(Clone, Debug)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
  solver: AugmentedLagrangian,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    let solver = AugmentedLagrangian::new(config.solver.clone());
    Self { config, solver }
  }

  /// Active configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Mean-variance optimum for `mode`; see [`optimizer::optimize`].
  pub fn optimize(
    &self,
    portfolio: &Portfolio,
    cov: &CovarianceMatrix,
    mode: OptimizationMode,
    target: Option<f64>,
    weight_change: Option<f64>,
  ) -> Result<OptimizationResult> {
    optimizer::optimize(portfolio, cov, mode, target, weight_change, &self.solver)
  }

  /// Utility optimum at the configured risk-free rate.
  pub fn optimize_utility(
    &self,
    portfolio: &Portfolio,
    cov: &CovarianceMatrix,
    risk_aversion: f64,
    mode: UtilityMode,
    weight_change: Option<f64>,
  ) -> Result<OptimizationResult> {
    tangency::optimize_utility(
      portfolio,
      cov,
      risk_aversion,
      self.config.risk_free,
      mode,
      weight_change,
      &self.solver,
    )
  }

  /// Reachable return range under the configured weight change.
  pub fn return_bracket(&self, portfolio: &Portfolio) -> Result<(f64, f64)> {
    optimizer::bracket_returns(portfolio, self.config.frontier.weight_change, &self.solver)
  }

  /// Efficient frontier under the configured [`FrontierConfig`].
  pub fn frontier(
    &self,
    portfolio: &Portfolio,
    cov: &CovarianceMatrix,
    asset_returns: Option<&[ReturnSeries]>,
  ) -> Result<Frontier> {
    build_frontier(portfolio, cov, asset_returns, &self.config.frontier, &self.solver)
  }

  /// Min-CVaR weights at `target` using the configured alpha, model and target policy.
  pub fn min_cvar(
    &self,
    portfolio: &Portfolio,
    asset_returns: &[ReturnSeries],
    target: f64,
  ) -> Result<OptimizationResult> {
    optimizer::optimize_min_cvar(
      portfolio,
      asset_returns,
      self.config.var_alpha,
      self.config.var_model,
      target,
      self.config.frontier.target_policy,
      self.config.frontier.weight_change,
      &self.solver,
    )
  }

  /// VaR and CVaR of one return path at the configured alpha and model.
  pub fn tail_risk(&self, returns: &[f64]) -> Result<TailRisk> {
    Ok(TailRisk {
      var: risk::var(returns, self.config.var_alpha, self.config.var_model)?,
      cvar: risk::cvar(returns, self.config.var_alpha, self.config.var_model)?,
    })
  }

  /// Tail risk of the weighted portfolio path.
  pub fn portfolio_tail_risk(
    &self,
    weights: &[f64],
    asset_returns: &[ReturnSeries],
  ) -> Result<TailRisk> {
    let path = risk::portfolio_returns(weights, asset_returns)?;
    self.tail_risk(&path)
  }
}
