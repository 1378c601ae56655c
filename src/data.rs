//! # Market Data Utilities
//!
//! $$
//! r_t = \frac{P_t}{P_{t-1}} - 1,\qquad
//! \hat\Sigma_{ij} = \frac{1}{T-1}\sum_t (r_{i,t}-\bar r_i)(r_{j,t}-\bar r_j)
//! $$
//!
//! Turns an aligned price table into the return series, expected returns and
//! covariance consumed by the optimizers.

use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::Asset;
use crate::types::CovarianceMatrix;
use crate::types::Portfolio;
use crate::types::ReturnSeries;

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
  mat
    .iter()
    .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
    .collect()
}

/// Adjusted closes, one column per asset on a common date index.
#[derive(Clone, Debug)]
pub struct PriceTable {
  tickers: Vec<String>,
  closes: Vec<Vec<f64>>,
}

impl PriceTable {
  /// `closes[i]` is the close history of `tickers[i]`, oldest first.
  pub fn new(tickers: Vec<String>, closes: Vec<Vec<f64>>) -> Result<Self> {
    if tickers.is_empty() || tickers.len() != closes.len() {
      return Err(PortfolioError::invalid_input(format!(
        "price table needs one column per ticker ({} tickers, {} columns)",
        tickers.len(),
        closes.len()
      )));
    }
    let rows = closes[0].len();
    if closes.iter().any(|c| c.len() != rows) {
      return Err(PortfolioError::invalid_input(
        "price columns must share a common date index",
      ));
    }
    Ok(Self { tickers, closes })
  }

  /// Simple returns per column; the undefined first row is dropped.
  pub fn simple_returns(&self) -> Result<Vec<ReturnSeries>> {
    self
      .tickers
      .iter()
      .zip(&self.closes)
      .map(|(ticker, closes)| {
        let values = simple_returns_series(closes).map_err(|e| match e {
          PortfolioError::InvalidInput(msg) => {
            PortfolioError::InvalidInput(format!("{ticker}: {msg}"))
          }
          other => other,
        })?;
        ReturnSeries::new(ticker.clone(), values)
      })
      .collect()
  }
}

/// Convert close prices to simple-return series.
pub fn simple_returns_series(closes: &[f64]) -> Result<Vec<f64>> {
  let mut out = Vec::with_capacity(closes.len().saturating_sub(1));
  for i in 1..closes.len() {
    let (prev, cur) = (closes[i - 1], closes[i]);
    if !prev.is_finite() || prev <= 0.0 {
      return Err(PortfolioError::invalid_input(format!(
        "price at row {} is not a positive finite number",
        i - 1
      )));
    }
    if !cur.is_finite() {
      return Err(PortfolioError::invalid_input(format!(
        "price at row {i} is not finite"
      )));
    }
    out.push(cur / prev - 1.0);
  }
  Ok(out)
}

/// Align multiple return series to common tail length.
pub fn align_return_series(all_returns: &[ReturnSeries]) -> Result<Vec<ReturnSeries>> {
  let min_len = all_returns.iter().map(|r| r.len()).min().unwrap_or(0);
  all_returns
    .iter()
    .map(|r| {
      let v = r.values();
      ReturnSeries::new(r.label(), v[v.len() - min_len..].to_vec())
    })
    .collect()
}

/// Per-asset sample means, in series order.
pub fn mean_returns(series: &[ReturnSeries]) -> Vec<f64> {
  series.iter().map(|s| sample_mean(s.values())).collect()
}

/// Sample covariance (`T - 1` denominator) of equal-length series.
pub fn sample_covariance(series: &[ReturnSeries]) -> Result<CovarianceMatrix> {
  let n = series.len();
  if n == 0 {
    return Err(PortfolioError::invalid_input("no return series supplied"));
  }
  let t = series[0].len();
  if series.iter().any(|s| s.len() != t) {
    return Err(PortfolioError::invalid_input(
      "return series must be aligned to the same length",
    ));
  }
  if t < 2 {
    return Err(PortfolioError::invalid_input(
      "covariance needs at least two observations",
    ));
  }

  let means = mean_returns(series);
  let mut cov = vec![vec![0.0; n]; n];
  for i in 0..n {
    for j in i..n {
      let xi = series[i].values();
      let xj = series[j].values();
      let acc: f64 = (0..t)
        .map(|k| (xi[k] - means[i]) * (xj[k] - means[j]))
        .sum();
      let c = acc / (t - 1) as f64;
      cov[i][j] = c;
      cov[j][i] = c;
    }
  }

  CovarianceMatrix::new(series.iter().map(|s| s.label().to_string()).collect(), cov)
}

/// Estimate expected returns and covariance from history and attach initial weights.
pub fn estimate_inputs(
  series: &[ReturnSeries],
  initial_weights: &[f64],
) -> Result<(Portfolio, CovarianceMatrix)> {
  if series.len() != initial_weights.len() {
    return Err(PortfolioError::invalid_input(format!(
      "{} return series but {} initial weights",
      series.len(),
      initial_weights.len()
    )));
  }

  let cov = sample_covariance(series)?;
  let assets = series
    .iter()
    .zip(mean_returns(series))
    .zip(initial_weights)
    .map(|((s, mu), &w)| Asset::new(s.label().to_string(), mu, w))
    .collect();

  Ok((Portfolio::new(assets)?, cov))
}

/// Scale a periodic `(return, volatility)` pair by `periods` per year.
pub fn annualize(ret: f64, vol: f64, periods: f64) -> (f64, f64) {
  (ret * periods, vol * periods.sqrt())
}
