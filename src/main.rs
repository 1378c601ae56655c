use anyhow::Result;
use frontier_rs::estimate_inputs;
use frontier_rs::CovarianceMatrix;
use frontier_rs::Frontier;
use frontier_rs::FrontierConfig;
use frontier_rs::OptimizationMode;
use frontier_rs::OptimizationResult;
use frontier_rs::Portfolio;
use frontier_rs::PortfolioEngine;
use frontier_rs::PortfolioEngineConfig;
use frontier_rs::PriceTable;
use frontier_rs::RiskMeasure;
use frontier_rs::UtilityMode;
use frontier_rs::VarModel;
use prettytable::row;
use prettytable::Table;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TICKERS: [&str; 8] = ["XLF", "SPY", "XLE", "XLK", "XTN", "XLY", "EWG", "TLT"];
const RETURNS: [f64; 8] = [0.0315, 0.0250, 0.045, 0.0132, 0.0023, 0.0056, 0.045, 0.003];
const COVARIANCE: [[f64; 8]; 8] = [
  [0.0010, 0.0013, -0.0006, -0.0007, 0.0001, 0.0001, -0.0004, -0.0004],
  [0.0013, 0.0073, -0.0013, -0.0006, -0.0022, -0.0010, 0.0014, -0.0015],
  [-0.0006, -0.0013, 0.0599, 0.0276, 0.0635, 0.0230, 0.0330, 0.0480],
  [-0.0007, -0.0006, 0.0276, 0.0296, 0.0266, 0.0215, 0.0207, 0.0299],
  [0.0001, -0.0022, 0.0635, 0.0266, 0.1025, 0.0427, 0.0399, 0.0660],
  [0.0001, -0.0010, 0.0230, 0.0215, 0.0427, 0.0321, 0.0199, 0.0322],
  [-0.0004, 0.0014, 0.0330, 0.0207, 0.0399, 0.0199, 0.0284, 0.0351],
  [-0.0004, -0.0015, 0.0480, 0.0299, 0.0660, 0.0322, 0.0351, 0.0800],
];
const WEIGHT_CHANGE: f64 = 20.0;
const TRADING_DAYS: usize = 252;

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let portfolio = Portfolio::from_parts(&TICKERS, &RETURNS, &[0.125; 8])?;
  let cov =
    CovarianceMatrix::from_tickers(&TICKERS, COVARIANCE.iter().map(|r| r.to_vec()).collect())?;

  let engine = PortfolioEngine::new(PortfolioEngineConfig {
    frontier: FrontierConfig {
      point_count: 20,
      weight_change: Some(WEIGHT_CHANGE),
      ..Default::default()
    },
    risk_free: 0.015,
    ..Default::default()
  });

  let runs = [
    ("MinRisk @ 5%", OptimizationMode::MinRisk, Some(0.05)),
    ("MaxReturn @ 20% vol", OptimizationMode::MaxReturn, Some(0.2)),
    ("MaxSharpe", OptimizationMode::MaxSharpe, None),
  ];
  for (label, mode, target) in runs {
    match engine.optimize(&portfolio, &cov, mode, target, Some(WEIGHT_CHANGE)) {
      Ok(res) => print_result(label, &res, "Sharpe"),
      Err(e) => eprintln!("{label}: {e}"),
    }
  }

  for (label, mode, score) in [
    ("Risk-adjusted utility", UtilityMode::RiskAdjusted, "Risk-adjusted"),
    ("Sharpe from utility", UtilityMode::SharpeDerived, "Sharpe"),
  ] {
    match engine.optimize_utility(&portfolio, &cov, 0.01, mode, Some(WEIGHT_CHANGE)) {
      Ok(res) => print_result(label, &res, score),
      Err(e) => eprintln!("{label}: {e}"),
    }
  }

  let frontier = engine.frontier(&portfolio, &cov, None)?;
  print_frontier("Mean-variance frontier", &frontier);

  // simulated daily history for the historical-risk workflows
  let prices = simulate_prices(TRADING_DAYS * 2, 7)?;
  let series = prices.simple_returns()?;
  let (daily, daily_cov) = estimate_inputs(&series, &[0.125; 8])?;

  let mut var_table = Table::new();
  var_table.set_titles(row!["Ticker", "VaR 5% (emp)", "CVaR 5% (emp)", "VaR 5% (norm)"]);
  for s in &series {
    let empirical = engine.tail_risk(s.values())?;
    let normal = frontier_rs::var(s.values(), 0.05, VarModel::Parametric)?;
    var_table.add_row(row![
      s.label(),
      format!("{:.4}", empirical.var),
      format!("{:.4}", empirical.cvar),
      format!("{normal:.4}")
    ]);
  }
  println!("\nDaily tail risk");
  var_table.printstd();

  let tail = engine.portfolio_tail_risk(&daily.weights(), &series)?;
  let annual_vol = daily_cov.scaled(TRADING_DAYS as f64).volatility(&daily.weights());
  info!(
    var = tail.var,
    cvar = tail.cvar,
    annual_vol,
    "equal-weight portfolio tail risk"
  );

  let cvar_engine = PortfolioEngine::new(PortfolioEngineConfig {
    frontier: FrontierConfig {
      point_count: 10,
      weight_change: Some(1.0),
      risk_measure: RiskMeasure::CVaR {
        alpha: 0.05,
        model: VarModel::Empirical,
      },
      periods_per_year: TRADING_DAYS as f64,
      ..Default::default()
    },
    ..Default::default()
  });
  let cvar_frontier = cvar_engine.frontier(&daily, &daily_cov, Some(&series))?;
  print_frontier("Mean-CVaR frontier (simulated history)", &cvar_frontier);

  Ok(())
}

fn print_result(label: &str, res: &OptimizationResult, score: &str) {
  let mut table = Table::new();
  table.set_titles(row!["Ticker", "Weight"]);
  for (ticker, w) in TICKERS.iter().zip(res.rounded_weights()) {
    table.add_row(row![ticker, format!("{w:.3}")]);
  }
  table.add_row(row!["Return", format!("{:.4}", res.expected_return)]);
  table.add_row(row!["Volatility", format!("{:.4}", res.risk)]);
  table.add_row(row![score, format!("{:.4}", res.ratio)]);

  println!("\n{label}");
  table.printstd();
}

fn print_frontier(label: &str, frontier: &Frontier) {
  let mut table = Table::new();
  table.set_titles(row!["Target", "Return", "Risk", "Sharpe", ""]);
  for (i, p) in frontier.points.iter().enumerate() {
    let mark = if Some(i) == frontier.max_sharpe {
      "max sharpe"
    } else if Some(i) == frontier.min_risk {
      "min risk"
    } else if Some(i) == frontier.max_return {
      "max return"
    } else if !p.valid {
      "failed"
    } else {
      ""
    };
    table.add_row(row![
      format!("{:.5}", p.target_return),
      format!("{:.4}", p.annualized_return),
      format!("{:.4}", p.annualized_risk),
      format!("{:.3}", p.sharpe),
      mark
    ]);
  }

  println!("\n{label}");
  table.printstd();
}

/// Independent normal daily returns per asset, scaled from the annual inputs.
fn simulate_prices(days: usize, seed: u64) -> Result<PriceTable> {
  let mut rng = StdRng::seed_from_u64(seed);
  let periods = TRADING_DAYS as f64;
  let mut closes = Vec::with_capacity(TICKERS.len());

  for (i, mu) in RETURNS.iter().enumerate() {
    let daily = Normal::new(mu / periods, (COVARIANCE[i][i] / periods).sqrt())?;
    let mut path = Vec::with_capacity(days + 1);
    let mut price = 100.0;
    path.push(price);
    for _ in 0..days {
      price *= 1.0 + daily.sample(&mut rng);
      path.push(price);
    }
    closes.push(path);
  }

  Ok(PriceTable::new(
    TICKERS.iter().map(|t| t.to_string()).collect(),
    closes,
  )?)
}
