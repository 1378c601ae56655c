//! # Portfolio Types
//!
//! $$
//! \sigma_p=\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}},\qquad \mathbf{w}^\top\mathbf{1}=1
//! $$
//!
//! Assets, aligned covariance inputs, return series and immutable optimizer snapshots.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;

use crate::data::dot;
use crate::data::mat_vec_mul;
use crate::error::PortfolioError;
use crate::error::Result;

/// Objective family handled by [`crate::optimizer::optimize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizationMode {
  /// Maximize expected return under a volatility ceiling.
  MaxReturn,
  /// Minimize volatility under a return floor.
  MinRisk,
  /// Maximize `return / (100 * volatility)`.
  MaxSharpe,
}

impl OptimizationMode {
  /// MinRisk needs a return floor, MaxReturn a volatility ceiling.
  pub fn requires_target(&self) -> bool {
    !matches!(self, Self::MaxSharpe)
  }
}

impl FromStr for OptimizationMode {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match normalize_name(s).as_str() {
      "maxreturn" => Ok(Self::MaxReturn),
      "minrisk" => Ok(Self::MinRisk),
      "maxsharpe" => Ok(Self::MaxSharpe),
      _ => Err(PortfolioError::InvalidMode {
        value: s.to_string(),
        expected: "MaxReturn, MinRisk, MaxSharpe",
      }),
    }
  }
}

impl Display for OptimizationMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::MaxReturn => write!(f, "MaxReturn"),
      Self::MinRisk => write!(f, "MinRisk"),
      Self::MaxSharpe => write!(f, "MaxSharpe"),
    }
  }
}

/// Reporting mode of the utility (tangency) optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtilityMode {
  /// Report the raw utility optimum and its risk-adjusted score.
  RiskAdjusted,
  /// Renormalize the utility optimum to a fully invested Sharpe portfolio.
  SharpeDerived,
}

impl FromStr for UtilityMode {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match normalize_name(s).as_str() {
      "riskadjusted" | "riskadjustedmaximization" => Ok(Self::RiskAdjusted),
      "sharpe" | "sharpederived" | "sharpeportfoliocalculation" => Ok(Self::SharpeDerived),
      _ => Err(PortfolioError::InvalidMode {
        value: s.to_string(),
        expected: "RiskAdjusted, SharpeDerived",
      }),
    }
  }
}

/// Distributional assumption behind VaR.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VarModel {
  /// Interpolated sample quantile.
  #[default]
  Empirical,
  /// Normal quantile from sample mean and standard deviation.
  Parametric,
}

impl FromStr for VarModel {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match normalize_name(s).as_str() {
      "empirical" | "historical" => Ok(Self::Empirical),
      "parametric" | "gaussian" => Ok(Self::Parametric),
      _ => Err(PortfolioError::InvalidMode {
        value: s.to_string(),
        expected: "empirical, parametric",
      }),
    }
  }
}

fn normalize_name(s: &str) -> String {
  s.chars()
    .filter(|c| c.is_ascii_alphanumeric())
    .map(|c| c.to_ascii_lowercase())
    .collect()
}

/// A single holding.
#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct Asset {
  /// Ticker or symbol, unique within a [`Portfolio`].
  pub ticker: String,
  /// Expected periodic return.
  pub expected_return: f64,
  /// Initial weight; also the solver start and the bound center.
  pub weight: f64,
}

/// Ordered basket of assets with unique tickers.
#[derive(Clone, Debug)]
pub struct Portfolio {
  assets: Vec<Asset>,
}

impl Portfolio {
  /// Rejects empty baskets, duplicate tickers and non-finite inputs.
  pub fn new(assets: Vec<Asset>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::invalid_input("portfolio has no assets"));
    }

    let mut seen = HashSet::with_capacity(assets.len());
    for asset in &assets {
      if !seen.insert(asset.ticker.as_str()) {
        return Err(PortfolioError::invalid_input(format!(
          "duplicate ticker `{}`",
          asset.ticker
        )));
      }
      if !asset.expected_return.is_finite() || !asset.weight.is_finite() {
        return Err(PortfolioError::invalid_input(format!(
          "non-finite return or weight for `{}`",
          asset.ticker
        )));
      }
    }

    Ok(Self { assets })
  }

  /// Build from parallel slices of tickers, expected returns and initial weights.
  pub fn from_parts(tickers: &[&str], expected_returns: &[f64], weights: &[f64]) -> Result<Self> {
    if tickers.len() != expected_returns.len() || tickers.len() != weights.len() {
      return Err(PortfolioError::invalid_input(format!(
        "length mismatch: {} tickers, {} returns, {} weights",
        tickers.len(),
        expected_returns.len(),
        weights.len()
      )));
    }

    Self::new(
      tickers
        .iter()
        .zip(expected_returns)
        .zip(weights)
        .map(|((t, &r), &w)| Asset::new(t.to_string(), r, w))
        .collect(),
    )
  }

  /// Tickers in portfolio order.
  pub fn tickers(&self) -> Vec<&str> {
    self.assets.iter().map(|a| a.ticker.as_str()).collect()
  }

  pub fn expected_returns(&self) -> Vec<f64> {
    self.assets.iter().map(|a| a.expected_return).collect()
  }

  /// Initial weights, the solver's starting point.
  pub fn weights(&self) -> Vec<f64> {
    self.assets.iter().map(|a| a.weight).collect()
  }

  /// `sum(expected_returns * weights)`.
  pub fn expected_return_of(&self, weights: &[f64]) -> f64 {
    self
      .assets
      .iter()
      .zip(weights)
      .map(|(a, w)| a.expected_return * w)
      .sum()
  }
}

/// Square, symmetric, positive-semidefinite covariance indexed by ticker.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  tickers: Vec<String>,
  values: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
  /// Validates shape, unique tickers, symmetry and positive semidefiniteness.
  pub fn new(tickers: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
    let n = tickers.len();
    if n == 0 {
      return Err(PortfolioError::invalid_input("covariance matrix is empty"));
    }
    if values.len() != n || values.iter().any(|row| row.len() != n) {
      return Err(PortfolioError::invalid_input(format!(
        "covariance matrix must be {n}x{n} to match its tickers"
      )));
    }
    let unique: HashSet<&str> = tickers.iter().map(String::as_str).collect();
    if unique.len() != n {
      return Err(PortfolioError::invalid_input(
        "covariance matrix has duplicate tickers",
      ));
    }

    for i in 0..n {
      for j in 0..n {
        let (a, b) = (values[i][j], values[j][i]);
        if !a.is_finite() {
          return Err(PortfolioError::invalid_input(format!(
            "non-finite covariance at ({i}, {j})"
          )));
        }
        let scale = a.abs().max(b.abs()).max(1.0);
        if (a - b).abs() > 1e-10 * scale {
          return Err(PortfolioError::invalid_input(format!(
            "covariance matrix is not symmetric at ({i}, {j})"
          )));
        }
      }
    }

    if !is_positive_semidefinite(&values) {
      return Err(PortfolioError::invalid_input(
        "covariance matrix is not positive semidefinite",
      ));
    }

    Ok(Self { tickers, values })
  }

  pub fn from_tickers(tickers: &[&str], values: Vec<Vec<f64>>) -> Result<Self> {
    Self::new(tickers.iter().map(|t| t.to_string()).collect(), values)
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  pub fn values(&self) -> &[Vec<f64>] {
    &self.values
  }

  /// Fails unless `tickers` lists exactly this matrix's tickers in the same order.
  pub fn ensure_aligned(&self, tickers: &[&str]) -> Result<()> {
    if tickers.len() != self.tickers.len() {
      return Err(PortfolioError::invalid_input(format!(
        "covariance has {} assets but {} were supplied",
        self.tickers.len(),
        tickers.len()
      )));
    }

    for (i, (a, b)) in self.tickers.iter().zip(tickers).enumerate() {
      if a != b {
        return Err(PortfolioError::invalid_input(format!(
          "covariance order mismatch at position {i}: `{a}` vs `{b}`"
        )));
      }
    }

    Ok(())
  }

  /// Covariance multiplied by `factor`, e.g. 252 for daily to annual.
  pub fn scaled(&self, factor: f64) -> Self {
    Self {
      tickers: self.tickers.clone(),
      values: self
        .values
        .iter()
        .map(|row| row.iter().map(|v| v * factor).collect())
        .collect(),
    }
  }

  /// $\mathbf{w}^\top\Sigma\mathbf{w}$
  pub fn variance(&self, weights: &[f64]) -> f64 {
    dot(weights, &mat_vec_mul(&self.values, weights))
  }

  /// Square root of [`CovarianceMatrix::variance`], clamped at zero.
  pub fn volatility(&self, weights: &[f64]) -> f64 {
    self.variance(weights).max(0.0).sqrt()
  }
}

/// Smallest eigenvalue of the symmetric matrix must not fall below `-tol`.
fn is_positive_semidefinite(values: &[Vec<f64>]) -> bool {
  let n = values.len();
  let m = DMatrix::from_fn(n, n, |i, j| values[i][j]);
  let eigen = SymmetricEigen::new(m);
  let scale = eigen.eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
  let tol = 1e-12 * scale.max(1e-300);
  eigen.eigenvalues.iter().all(|&l| l >= -tol)
}

/// Ordered periodic returns for one asset or a weighted combination.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnSeries {
  label: String,
  values: Vec<f64>,
}

impl ReturnSeries {
  pub fn new(label: impl Into<String>, values: Vec<f64>) -> Result<Self> {
    let label = label.into();
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid_input(format!(
        "non-finite return at index {idx} in `{label}`"
      )));
    }
    Ok(Self { label, values })
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn mean(&self) -> f64 {
    if self.values.is_empty() {
      0.0
    } else {
      self.values.iter().sum::<f64>() / self.values.len() as f64
    }
  }
}

/// Immutable snapshot of one solver run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimizationResult {
  /// Unrounded optimal weights, in portfolio order.
  pub weights: Vec<f64>,
  /// Realized expected return of `weights`.
  pub expected_return: f64,
  /// Realized volatility, or CVaR loss for CVaR objectives.
  pub risk: f64,
  /// Sharpe ratio or risk-adjusted score, depending on the producer.
  pub ratio: f64,
  /// Whether the solver met its constraint tolerance.
  pub converged: bool,
  /// Outer solver iterations spent.
  pub iterations: usize,
  /// Largest constraint violation at `weights`.
  pub constraint_violation: f64,
}

impl OptimizationResult {
  /// Weights rounded to 3 decimals. Reporting only.
  pub fn rounded_weights(&self) -> Vec<f64> {
    self
      .weights
      .iter()
      .map(|w| (w * 1000.0).round() / 1000.0)
      .collect()
  }

  pub fn weight_sum(&self) -> f64 {
    self.weights.iter().sum()
  }
}

/// One target on an efficient frontier.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  /// Periodic target return handed to the optimizer.
  pub target_return: f64,
  /// Solver output; holds the best iterate when `valid` is false.
  pub result: OptimizationResult,
  /// Realized return scaled by the annualization factor.
  pub annualized_return: f64,
  /// Realized risk scaled by the square root of the annualization factor.
  pub annualized_risk: f64,
  /// `annualized_return / annualized_risk`, zero for a riskless point.
  pub sharpe: f64,
  /// False when the per-point solve failed; such points are never highlighted.
  pub valid: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_asset_cov() -> CovarianceMatrix {
    CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.0], vec![0.0, 0.09]]).unwrap()
  }

  #[test]
  fn modes_parse_case_insensitively() {
    assert_eq!(
      "max-sharpe".parse::<OptimizationMode>().unwrap(),
      OptimizationMode::MaxSharpe
    );
    assert_eq!(
      "MinRisk".parse::<OptimizationMode>().unwrap(),
      OptimizationMode::MinRisk
    );
    assert_eq!(
      "Sharpe Portfolio Calculation".parse::<UtilityMode>().unwrap(),
      UtilityMode::SharpeDerived
    );
    assert_eq!("parametric".parse::<VarModel>().unwrap(), VarModel::Parametric);
  }

  #[test]
  fn unknown_mode_is_rejected() {
    let err = "MaxAlpha".parse::<OptimizationMode>().unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidMode { .. }));
    assert!("lognormal".parse::<VarModel>().is_err());
  }

  #[test]
  fn portfolio_rejects_duplicate_tickers() {
    let res = Portfolio::from_parts(&["A", "A"], &[0.1, 0.2], &[0.5, 0.5]);
    assert!(matches!(res, Err(PortfolioError::InvalidInput(_))));
  }

  #[test]
  fn portfolio_rejects_length_mismatch() {
    let res = Portfolio::from_parts(&["A", "B"], &[0.1], &[0.5, 0.5]);
    assert!(res.is_err());
  }

  #[test]
  fn covariance_rejects_non_square() {
    let res = CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.0], vec![0.0]]);
    assert!(res.is_err());
  }

  #[test]
  fn covariance_rejects_asymmetric() {
    let res =
      CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.01], vec![0.02, 0.09]]);
    assert!(res.is_err());
  }

  #[test]
  fn covariance_rejects_indefinite() {
    let res = CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.1], vec![0.1, 0.09]]);
    assert!(res.is_err());
  }

  #[test]
  fn covariance_accepts_singular_psd() {
    let res =
      CovarianceMatrix::from_tickers(&["A", "B"], vec![vec![0.04, 0.06], vec![0.06, 0.09]]);
    assert!(res.is_ok());
  }

  #[test]
  fn rank_one_covariance_is_semidefinite() {
    let v = [0.1, 0.2, 0.3];
    let values = (0..3)
      .map(|i| (0..3).map(|j| v[i] * v[j]).collect())
      .collect();
    let cov = CovarianceMatrix::from_tickers(&["A", "B", "C"], values).unwrap();

    let annual = cov.scaled(252.0);
    assert_eq!(annual.tickers(), cov.tickers());
    let w = [0.2, 0.3, 0.5];
    assert!((annual.variance(&w) - 252.0 * cov.variance(&w)).abs() < 1e-12);
    assert!(CovarianceMatrix::new(annual.tickers().to_vec(), annual.values().to_vec()).is_ok());
  }

  #[test]
  fn covariance_rejects_slightly_negative_eigenvalue() {
    // eigenvalues near 0.13 and -9e-7
    let res = CovarianceMatrix::from_tickers(
      &["A", "B"],
      vec![vec![0.04, 0.060_001], vec![0.060_001, 0.09]],
    );
    assert!(res.is_err());
  }

  #[test]
  fn covariance_alignment_is_checked() {
    let cov = two_asset_cov();
    assert!(cov.ensure_aligned(&["A", "B"]).is_ok());
    assert!(cov.ensure_aligned(&["B", "A"]).is_err());
    assert!(cov.ensure_aligned(&["A"]).is_err());
  }

  #[test]
  fn volatility_matches_quadratic_form() {
    let cov = two_asset_cov();
    let vol = cov.volatility(&[0.5, 0.5]);
    assert!((vol - (0.25f64 * 0.04 + 0.25 * 0.09).sqrt()).abs() < 1e-12);
  }

  #[test]
  fn rounded_weights_are_for_reporting_only() {
    let res = OptimizationResult {
      weights: vec![0.123456, 0.876544],
      ..Default::default()
    };
    assert_eq!(res.rounded_weights(), vec![0.123, 0.877]);
    assert_eq!(res.weights[0], 0.123456);
  }
}
