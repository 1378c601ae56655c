//! # Augmented Lagrangian
//!
//! $$
//! \mathcal L_\rho(x)=f(\bar x)+\sum_i\Big(\lambda_i h_i(\bar x)+\tfrac\rho2 h_i(\bar x)^2\Big)
//! +\tfrac\rho2\sum_j\Big(\max\big(0,\tfrac{\mu_j}{\rho}-g_j(\bar x)\big)^2
//! -\big(\tfrac{\mu_j}{\rho}\big)^2\Big)
//! +\tfrac\rho2\lVert x-\bar x\rVert^2,\qquad \bar x=\Pi_{[l,u]}(x)
//! $$
//!
//! Outer loop updates the multipliers `λ ← λ + ρh`, `μ ← max(0, μ − ρg)` and grows
//! `ρ` when the violation stalls. Each inner problem is unconstrained and solved
//! with L-BFGS over central-difference gradients; Nelder-Mead takes over when the
//! line search fails.

use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tracing::debug;
use tracing::warn;

use super::ConstrainedSolver;
use super::ConstraintKind;
use super::Problem;
use super::SolverConfig;
use super::SolverOutcome;
use crate::error::PortfolioError;
use crate::error::Result;

/// Stand-in for non-finite merit values so the line search sees a wall.
const MERIT_WALL: f64 = 1e30;

/// Relative size of the Nelder-Mead starting simplex and of restart perturbations.
const SIMPLEX_SCALE: f64 = 0.05;
const RESTART_SCALE: f64 = 0.25;

#[derive(Clone, Debug, Default)]
pub struct AugmentedLagrangian {
  pub config: SolverConfig,
}

impl AugmentedLagrangian {
  pub fn new(config: SolverConfig) -> Self {
    Self { config }
  }

  fn deadline_passed(&self, started: Instant) -> bool {
    self
      .config
      .max_duration
      .is_some_and(|cap| started.elapsed() >= cap)
  }

  fn solve_from(
    &self,
    problem: &Problem<'_>,
    x0: &[f64],
    started: Instant,
  ) -> Result<SolverOutcome> {
    let cfg = &self.config;
    let bounds = problem.bounds();
    let mut lambda = vec![0.0; problem.count(ConstraintKind::Equality)];
    let mut mu = vec![0.0; problem.count(ConstraintKind::Inequality)];
    let mut rho = cfg.initial_penalty;

    let mut x = x0.to_vec();
    let mut x_bar = bounds.clip(&x);
    let mut violation = problem.max_violation(&x_bar);
    let mut prev_violation = f64::INFINITY;

    for outer in 1..=cfg.max_outer_iterations {
      if self.deadline_passed(started) {
        warn!(outer, violation, "solver wall-clock cap reached");
        return Ok(outcome(problem, x_bar, outer - 1, false));
      }

      let merit = Merit {
        problem,
        lambda: &lambda,
        mu: &mu,
        rho,
        fd_step: cfg.fd_step,
      };
      x = self.inner_minimize(merit, x)?;

      let next = bounds.clip(&x);
      let (mut eq, mut ineq) = (0, 0);
      violation = 0.0;
      for c in problem.constraints() {
        let v = c.eval(&next);
        match c.kind {
          ConstraintKind::Equality => {
            lambda[eq] += rho * v;
            eq += 1;
            violation = f64::max(violation, v.abs());
          }
          ConstraintKind::Inequality => {
            mu[ineq] = (mu[ineq] - rho * v).max(0.0);
            ineq += 1;
            violation = f64::max(violation, (-v).max(0.0));
          }
        }
      }

      let step = next
        .iter()
        .zip(&x_bar)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
      x_bar = next;

      debug!(outer, rho, violation, step, "augmented lagrangian iteration");

      if violation <= cfg.constraint_tolerance && step <= cfg.step_tolerance {
        return Ok(outcome(problem, x_bar, outer, true));
      }
      if violation > 0.25 * prev_violation {
        rho = (rho * cfg.penalty_growth).min(cfg.max_penalty);
      }
      prev_violation = violation;
    }

    let converged = violation <= cfg.constraint_tolerance;
    Ok(outcome(problem, x_bar, cfg.max_outer_iterations, converged))
  }

  fn inner_minimize(&self, merit: Merit<'_, '_>, x: Vec<f64>) -> Result<Vec<f64>> {
    let cfg = &self.config;
    let grad = merit.gradient(&x)?;
    if grad.iter().map(|g| g * g).sum::<f64>().sqrt() <= cfg.gradient_tolerance {
      return Ok(x);
    }

    let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9)?;
    let solver =
      LBFGS::new(linesearch, cfg.lbfgs_memory).with_tolerance_grad(cfg.gradient_tolerance)?;

    let start = x.clone();
    let res = Executor::new(merit, solver)
      .configure(|state| state.param(start).max_iters(cfg.max_inner_iterations))
      .run();

    match res {
      Ok(res) => Ok(res.state.best_param.unwrap_or(x)),
      Err(err) => {
        debug!(%err, "L-BFGS failed, falling back to Nelder-Mead");
        self.nelder_mead(merit, x)
      }
    }
  }

  fn nelder_mead(&self, merit: Merit<'_, '_>, x: Vec<f64>) -> Result<Vec<f64>> {
    let bounds = merit.problem.bounds();
    let mut simplex = Vec::with_capacity(x.len() + 1);
    simplex.push(x.clone());
    for i in 0..x.len() {
      let width = bounds.upper()[i] - bounds.lower()[i];
      let mut vertex = x.clone();
      vertex[i] += SIMPLEX_SCALE * width.max(1e-3);
      simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex).with_sd_tolerance(1e-14)?;
    let res = Executor::new(merit, solver)
      .configure(|state| state.max_iters(4 * self.config.max_inner_iterations))
      .run()?;

    Ok(res.state.best_param.unwrap_or(x))
  }

  fn perturbed_start(&self, x0: &[f64], rng: &mut StdRng, problem: &Problem<'_>) -> Vec<f64> {
    let bounds = problem.bounds();
    let moved: Vec<f64> = x0
      .iter()
      .zip(bounds.lower().iter().zip(bounds.upper()))
      .map(|(&v, (&lo, &hi))| v + RESTART_SCALE * (hi - lo) * rng.random_range(-1.0..1.0))
      .collect();
    bounds.clip(&moved)
  }
}

impl ConstrainedSolver for AugmentedLagrangian {
  fn minimize(&self, problem: &Problem<'_>, x0: &[f64]) -> Result<SolverOutcome> {
    self.config.validate()?;
    if x0.len() != problem.dim() {
      return Err(PortfolioError::invalid_input(format!(
        "start point has {} coordinates, problem has {}",
        x0.len(),
        problem.dim()
      )));
    }
    if x0.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid_input(
        "start point contains non-finite values",
      ));
    }

    let started = Instant::now();
    let mut best = self.solve_from(problem, x0, started)?;
    if best.converged || self.config.restarts == 0 {
      return Ok(best);
    }

    let mut rng = StdRng::seed_from_u64(self.config.seed);
    for attempt in 1..=self.config.restarts {
      if self.deadline_passed(started) {
        break;
      }
      let start = self.perturbed_start(x0, &mut rng, problem);
      debug!(attempt, ?start, "restarting from perturbed start");

      let candidate = self.solve_from(problem, &start, started)?;
      if candidate.is_better_than(&best) {
        best = candidate;
      }
      if best.converged {
        break;
      }
    }

    if !best.converged {
      warn!(
        restarts = self.config.restarts,
        violation = best.max_violation,
        "all solver attempts failed"
      );
    }
    Ok(best)
  }
}

fn outcome(
  problem: &Problem<'_>,
  x: Vec<f64>,
  iterations: usize,
  converged: bool,
) -> SolverOutcome {
  SolverOutcome {
    objective: problem.objective(&x),
    max_violation: problem.max_violation(&x),
    x,
    iterations,
    converged,
  }
}

/// Unconstrained merit function of one outer iteration.
#[derive(Clone, Copy)]
struct Merit<'p, 'a> {
  problem: &'p Problem<'a>,
  lambda: &'p [f64],
  mu: &'p [f64],
  rho: f64,
  fd_step: f64,
}

impl Merit<'_, '_> {
  fn value(&self, z: &[f64]) -> f64 {
    let bounds = self.problem.bounds();
    let z_bar = bounds.clip(z);
    let rho = self.rho;

    let mut value = self.problem.objective(&z_bar);
    let (mut eq, mut ineq) = (0, 0);
    for c in self.problem.constraints() {
      let v = c.eval(&z_bar);
      match c.kind {
        ConstraintKind::Equality => {
          value += self.lambda[eq] * v + 0.5 * rho * v * v;
          eq += 1;
        }
        ConstraintKind::Inequality => {
          let shift = self.mu[ineq] / rho;
          let t = (shift - v).max(0.0);
          value += 0.5 * rho * (t * t - shift * shift);
          ineq += 1;
        }
      }
    }

    let outside: f64 = z.iter().zip(&z_bar).map(|(a, b)| (a - b).powi(2)).sum();
    value += 0.5 * rho * outside;

    if value.is_finite() {
      value
    } else {
      MERIT_WALL
    }
  }
}

impl CostFunction for Merit<'_, '_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    Ok(self.value(x))
  }
}

impl Gradient for Merit<'_, '_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    let mut grad = vec![0.0; x.len()];
    let mut probe = x.clone();
    let eps = self.fd_step;

    for i in 0..x.len() {
      probe[i] = x[i] + eps;
      let f_plus = self.value(&probe);
      probe[i] = x[i] - eps;
      let f_minus = self.value(&probe);
      probe[i] = x[i];
      grad[i] = (f_plus - f_minus) / (2.0 * eps);
    }

    Ok(grad)
  }
}
