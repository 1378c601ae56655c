//! # frontier-rs
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Constrained mean-variance and mean-CVaR portfolio optimization, efficient
//! frontiers and Value-at-Risk.

pub mod data;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod optimizer;
pub mod risk;
pub mod solver;
pub mod tangency;
pub mod types;

pub use data::align_return_series;
pub use data::annualize;
pub use data::estimate_inputs;
pub use data::mean_returns;
pub use data::sample_covariance;
pub use data::simple_returns_series;
pub use data::PriceTable;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use engine::TailRisk;
pub use error::PortfolioError;
pub use error::Result;
pub use frontier::build_frontier;
pub use frontier::DegeneratePolicy;
pub use frontier::Frontier;
pub use frontier::FrontierConfig;
pub use frontier::RenderedFrontier;
pub use frontier::RiskMeasure;
pub use optimizer::bounds_for;
pub use optimizer::bracket_returns;
pub use optimizer::optimize;
pub use optimizer::optimize_min_cvar;
pub use optimizer::optimize_min_risk;
pub use optimizer::TargetPolicy;
pub use risk::cvar;
pub use risk::portfolio_returns;
pub use risk::var;
pub use solver::AugmentedLagrangian;
pub use solver::Bounds;
pub use solver::ConstrainedSolver;
pub use solver::Constraint;
pub use solver::Problem;
pub use solver::SolverConfig;
pub use solver::SolverOutcome;
pub use tangency::optimize_utility;
pub use types::Asset;
pub use types::CovarianceMatrix;
pub use types::FrontierPoint;
pub use types::OptimizationMode;
pub use types::OptimizationResult;
pub use types::Portfolio;
pub use types::ReturnSeries;
pub use types::UtilityMode;
pub use types::VarModel;
