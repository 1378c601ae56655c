//! # Errors
//!
//! Error taxonomy shared by the optimizer, the frontier sweep and the risk measures.

use thiserror::Error;

use crate::types::OptimizationResult;

/// Crate-wide result alias.
pub type Result<T, E = PortfolioError> = std::result::Result<T, E>;

/// Everything the optimizers, the frontier sweep and the risk measures can fail with.
#[derive(Debug, Error)]
pub enum PortfolioError {
  /// Unrecognized optimization mode or distribution model name.
  #[error("invalid mode `{value}`: expected one of {expected}")]
  InvalidMode { value: String, expected: &'static str },

  /// Malformed alpha, empty or misaligned series, bad covariance shape.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// The solver stopped without meeting the constraint tolerance.
  /// `best` holds the last iterate so callers can inspect it.
  #[error(
    "solver did not converge after {iterations} iterations (violation {constraint_violation:.3e})"
  )]
  ConvergenceFailure {
    iterations: usize,
    constraint_violation: f64,
    best: Box<OptimizationResult>,
  },

  /// Error raised inside an argmin solver run.
  #[error("solver error: {0}")]
  Solver(#[from] argmin::core::Error),

  /// A statrs distribution rejected its parameters.
  #[error("distribution error: {0}")]
  Distribution(String),
}

impl PortfolioError {
  pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  /// Best iterate carried by a [`PortfolioError::ConvergenceFailure`].
  pub fn best_iterate(&self) -> Option<&OptimizationResult> {
    match self {
      Self::ConvergenceFailure { best, .. } => Some(best),
      _ => None,
    }
  }

  /// Whether the error carries a best iterate rather than a hard failure.
  pub fn is_convergence_failure(&self) -> bool {
    matches!(self, Self::ConvergenceFailure { .. })
  }
}
