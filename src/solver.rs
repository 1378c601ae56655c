//! # Constrained Solver
//!
//! $$
//! \min_{x}\ f(x)\quad\text{s.t.}\quad h_i(x)=0,\ g_j(x)\ge 0,\ l\le x\le u
//! $$
//!
//! Formulation handed to a general nonlinear local optimizer. Optimizers build a
//! [`Problem`] from closures and hand it to any [`ConstrainedSolver`].

use std::time::Duration;

use crate::error::PortfolioError;
use crate::error::Result;

pub mod augmented_lagrangian;

pub use augmented_lagrangian::AugmentedLagrangian;

/// Scalar function of the decision vector.
pub type ScalarFn<'a> = Box<dyn Fn(&[f64]) -> f64 + Send + Sync + 'a>;

/// Sense of a [`Constraint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
  /// `h(x) = 0`
  Equality,
  /// `g(x) >= 0`
  Inequality,
}

/// Named scalar constraint on the decision vector.
pub struct Constraint<'a> {
  pub name: &'static str,
  pub kind: ConstraintKind,
  fun: ScalarFn<'a>,
}

impl<'a> Constraint<'a> {
  /// `fun(x) = 0`.
  pub fn equality(name: &'static str, fun: impl Fn(&[f64]) -> f64 + Send + Sync + 'a) -> Self {
    Self {
      name,
      kind: ConstraintKind::Equality,
      fun: Box::new(fun),
    }
  }

  /// `fun(x) >= 0`.
  pub fn inequality(name: &'static str, fun: impl Fn(&[f64]) -> f64 + Send + Sync + 'a) -> Self {
    Self {
      name,
      kind: ConstraintKind::Inequality,
      fun: Box::new(fun),
    }
  }

  /// Raw constraint value at `x`.
  pub fn eval(&self, x: &[f64]) -> f64 {
    (self.fun)(x)
  }

  /// Non-negative distance from feasibility at `x`.
  pub fn violation(&self, x: &[f64]) -> f64 {
    let v = self.eval(x);
    match self.kind {
      ConstraintKind::Equality => v.abs(),
      ConstraintKind::Inequality => (-v).max(0.0),
    }
  }
}

impl std::fmt::Debug for Constraint<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Constraint")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .finish()
  }
}

/// Per-variable box bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
  lower: Vec<f64>,
  upper: Vec<f64>,
}

impl Bounds {
  /// One `(lower, upper)` pair per variable. Rejects non-finite or inverted intervals.
  pub fn new(pairs: Vec<(f64, f64)>) -> Result<Self> {
    for (i, &(lo, hi)) in pairs.iter().enumerate() {
      if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return Err(PortfolioError::invalid_input(format!(
          "bound {i} is not a finite interval: [{lo}, {hi}]"
        )));
      }
    }
    let (lower, upper) = pairs.into_iter().unzip();
    Ok(Self { lower, upper })
  }

  /// Same interval for every variable.
  pub fn uniform(dim: usize, lo: f64, hi: f64) -> Result<Self> {
    Self::new(vec![(lo, hi); dim])
  }

  /// Number of bounded variables.
  pub fn dim(&self) -> usize {
    self.lower.len()
  }

  /// Lower bound per variable.
  pub fn lower(&self) -> &[f64] {
    &self.lower
  }

  /// Upper bound per variable.
  pub fn upper(&self) -> &[f64] {
    &self.upper
  }

  /// Projection of `x` onto the box.
  pub fn clip(&self, x: &[f64]) -> Vec<f64> {
    x.iter()
      .zip(self.lower.iter().zip(&self.upper))
      .map(|(&v, (&lo, &hi))| v.clamp(lo, hi))
      .collect()
  }

  /// Whether `x` has the right length and lies inside the box.
  pub fn contains(&self, x: &[f64]) -> bool {
    x.len() == self.dim()
      && x
        .iter()
        .zip(self.lower.iter().zip(&self.upper))
        .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
  }
}

/// Objective, constraints and bounds of one solve.
pub struct Problem<'a> {
  objective: ScalarFn<'a>,
  constraints: Vec<Constraint<'a>>,
  bounds: Bounds,
}

impl<'a> Problem<'a> {
  /// Objective to minimize over `bounds`, with no constraints yet.
  pub fn new(objective: impl Fn(&[f64]) -> f64 + Send + Sync + 'a, bounds: Bounds) -> Self {
    Self {
      objective: Box::new(objective),
      constraints: Vec::new(),
      bounds,
    }
  }

  /// Append a constraint.
  pub fn with_constraint(mut self, constraint: Constraint<'a>) -> Self {
    self.constraints.push(constraint);
    self
  }

  /// Objective value at `x`.
  pub fn objective(&self, x: &[f64]) -> f64 {
    (self.objective)(x)
  }

  /// Constraints in insertion order.
  pub fn constraints(&self) -> &[Constraint<'a>] {
    &self.constraints
  }

  /// Box bounds of the decision vector.
  pub fn bounds(&self) -> &Bounds {
    &self.bounds
  }

  /// Length of the decision vector.
  pub fn dim(&self) -> usize {
    self.bounds.dim()
  }

  /// Number of constraints of the given kind.
  pub fn count(&self, kind: ConstraintKind) -> usize {
    self.constraints.iter().filter(|c| c.kind == kind).count()
  }

  /// Largest constraint violation at `x`; zero when feasible or unconstrained.
  pub fn max_violation(&self, x: &[f64]) -> f64 {
    self
      .constraints
      .iter()
      .map(|c| c.violation(x))
      .fold(0.0, f64::max)
  }
}

/// What a solver reports back.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOutcome {
  /// Final iterate, always inside the bounds.
  pub x: Vec<f64>,
  /// Objective value at `x`.
  pub objective: f64,
  /// Largest constraint violation at `x`.
  pub max_violation: f64,
  /// Outer iterations spent.
  pub iterations: usize,
  /// Violation and step both within tolerance.
  pub converged: bool,
}

impl SolverOutcome {
  /// Converged beats not converged, then lower violation, then lower objective.
  pub fn is_better_than(&self, other: &Self) -> bool {
    match (self.converged, other.converged) {
      (true, false) => true,
      (false, true) => false,
      (true, true) => self.objective < other.objective,
      (false, false) => {
        if (self.max_violation - other.max_violation).abs() > f64::EPSILON {
          self.max_violation < other.max_violation
        } else {
          self.objective < other.objective
        }
      }
    }
  }
}

/// Local constrained minimizer.
pub trait ConstrainedSolver: Send + Sync {
  /// Minimize `problem` from `x0`. A non-converged run is an `Ok` outcome with
  /// `converged == false`; errors are reserved for malformed input.
  fn minimize(&self, problem: &Problem<'_>, x0: &[f64]) -> Result<SolverOutcome>;
}

/// Tolerances and caps for [`AugmentedLagrangian`].
#[derive(Clone, Debug)]
pub struct SolverConfig {
  /// Max constraint violation accepted as feasible.
  pub constraint_tolerance: f64,
  /// Max change of the iterate between outer iterations at convergence.
  pub step_tolerance: f64,
  pub initial_penalty: f64,
  pub penalty_growth: f64,
  pub max_penalty: f64,
  pub max_outer_iterations: usize,
  pub max_inner_iterations: u64,
  pub gradient_tolerance: f64,
  /// Central-difference step for the gradient.
  pub fd_step: f64,
  pub lbfgs_memory: usize,
  /// Extra attempts from perturbed starts after a failed solve.
  pub restarts: usize,
  /// Seed for the restart perturbations.
  pub seed: u64,
  /// Wall-clock cap across all attempts of one solve.
  pub max_duration: Option<Duration>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      constraint_tolerance: 1e-8,
      step_tolerance: 1e-8,
      initial_penalty: 10.0,
      penalty_growth: 10.0,
      max_penalty: 1e10,
      max_outer_iterations: 60,
      max_inner_iterations: 500,
      gradient_tolerance: 1e-9,
      fd_step: 1e-6,
      lbfgs_memory: 7,
      restarts: 0,
      seed: 42,
      max_duration: None,
    }
  }
}

impl SolverConfig {
  /// Rejects non-positive tolerances, penalty growth at or below 1 and zero caps.
  pub fn validate(&self) -> Result<()> {
    let positive = [
      ("constraint_tolerance", self.constraint_tolerance),
      ("step_tolerance", self.step_tolerance),
      ("initial_penalty", self.initial_penalty),
      ("max_penalty", self.max_penalty),
      ("gradient_tolerance", self.gradient_tolerance),
      ("fd_step", self.fd_step),
    ];
    for (name, v) in positive {
      if !(v.is_finite() && v > 0.0) {
        return Err(PortfolioError::invalid_input(format!(
          "{name} must be positive, got {v}"
        )));
      }
    }
    if !(self.penalty_growth > 1.0) {
      return Err(PortfolioError::invalid_input(
        "penalty_growth must exceed 1",
      ));
    }
    if self.max_outer_iterations == 0 || self.max_inner_iterations == 0 || self.lbfgs_memory == 0 {
      return Err(PortfolioError::invalid_input(
        "iteration caps and L-BFGS memory must be non-zero",
      ));
    }
    Ok(())
  }
}
