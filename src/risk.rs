//! # Value-at-Risk
//!
//! $$
//! \mathrm{VaR}_\alpha = Q_\alpha(r)\ \text{or}\ \mu - z_{1-\alpha}\,\sigma,\qquad
//! \mathrm{CVaR}_\alpha = \mathbb E\left[r \mid r \le \mathrm{VaR}_\alpha\right]
//! $$
//!
//! Both figures are return quantities: losses are negative, more negative is worse.
//! The tail mean is always estimated from the sample, whichever model produced VaR.

use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use statrs::statistics::Statistics;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::ReturnSeries;
use crate::types::VarModel;

/// Value-at-Risk of `returns` at tail probability `alpha`.
pub fn var(returns: &[f64], alpha: f64, model: VarModel) -> Result<f64> {
  validate(returns, alpha)?;

  match model {
    VarModel::Empirical => {
      let mut sorted = returns.to_vec();
      sorted.sort_by(|a, b| a.total_cmp(b));
      Ok(quantile_sorted(&sorted, alpha))
    }
    VarModel::Parametric => {
      if returns.len() < 2 {
        return Err(PortfolioError::invalid_input(
          "parametric VaR needs at least two observations",
        ));
      }
      let mean = returns.mean();
      let std_dev = returns.std_dev();
      let z = standard_normal_quantile(1.0 - alpha)?;
      Ok(mean - z * std_dev)
    }
  }
}

/// Conditional VaR: mean of the observations at or below [`var`].
pub fn cvar(returns: &[f64], alpha: f64, model: VarModel) -> Result<f64> {
  let threshold = var(returns, alpha, model)?;
  tail_mean(returns, threshold).ok_or_else(|| {
    PortfolioError::invalid_input(format!(
      "no observation at or below VaR {threshold:.6}; CVaR is undefined"
    ))
  })
}

/// Per-period weighted sum of aligned asset returns.
pub fn portfolio_returns(weights: &[f64], asset_returns: &[ReturnSeries]) -> Result<Vec<f64>> {
  if weights.len() != asset_returns.len() {
    return Err(PortfolioError::invalid_input(format!(
      "{} weights for {} return series",
      weights.len(),
      asset_returns.len()
    )));
  }
  let periods = asset_returns.first().map(|s| s.len()).unwrap_or(0);
  if asset_returns.iter().any(|s| s.len() != periods) {
    return Err(PortfolioError::invalid_input(
      "asset return series are not aligned",
    ));
  }

  Ok(weighted_sum(weights, asset_returns, periods))
}

pub(crate) fn weighted_sum(
  weights: &[f64],
  asset_returns: &[ReturnSeries],
  periods: usize,
) -> Vec<f64> {
  (0..periods)
    .map(|t| {
      weights
        .iter()
        .zip(asset_returns)
        .map(|(w, s)| w * s.values()[t])
        .sum()
    })
    .collect()
}

pub(crate) fn validate(returns: &[f64], alpha: f64) -> Result<()> {
  if !(alpha > 0.0 && alpha < 1.0) {
    return Err(PortfolioError::invalid_input(format!(
      "alpha must lie in (0, 1), got {alpha}"
    )));
  }
  if returns.is_empty() {
    return Err(PortfolioError::invalid_input("return series is empty"));
  }
  if returns.iter().any(|r| !r.is_finite()) {
    return Err(PortfolioError::invalid_input(
      "return series contains non-finite values",
    ));
  }
  Ok(())
}

pub(crate) fn standard_normal_quantile(p: f64) -> Result<f64> {
  let normal = Normal::new(0.0, 1.0).map_err(|e| PortfolioError::Distribution(e.to_string()))?;
  Ok(normal.inverse_cdf(p))
}

/// Linear interpolation between order statistics at position `p * (n - 1)`.
pub(crate) fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
  let n = sorted.len();
  if n == 1 {
    return sorted[0];
  }
  let pos = p * (n - 1) as f64;
  let lo = pos.floor() as usize;
  let hi = (lo + 1).min(n - 1);
  let frac = pos - lo as f64;
  sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub(crate) fn tail_mean(returns: &[f64], threshold: f64) -> Option<f64> {
  let (sum, count) = returns
    .iter()
    .filter(|&&r| r <= threshold)
    .fold((0.0, 0usize), |(s, c), &r| (s + r, c + 1));
  if count == 0 {
    None
  } else {
    Some(sum / count as f64)
  }
}
