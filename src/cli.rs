//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_bar_adapter::CsvBarAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_strategy_adapter::JsonStrategyAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_resolver::EffectiveConfig;
use crate::domain::defaults::DefaultsTable;
use crate::domain::error::QuantlabError;
use crate::ports::bar_port::BarPort;
use crate::ports::strategy_port::StrategyPort;

#[derive(Parser, Debug)]
#[command(name = "quantlab", about = "Regime-aware strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over a bar file
    Backtest {
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        bars: PathBuf,
        #[arg(short, long)]
        defaults: Option<PathBuf>,
        /// Overrides `[engine] initial_capital`
        #[arg(long)]
        capital: Option<f64>,
        /// Print the full result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Validate a strategy against every regime
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        defaults: Option<PathBuf>,
        /// Print the effective configs as JSON on stdout
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match execute(&cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn execute(command: &Command) -> Result<(), QuantlabError> {
    match command {
        Command::Backtest {
            strategy,
            bars,
            defaults,
            capital,
            json,
        } => {
            let result = run_backtest(strategy, bars, defaults.as_deref(), *capital)?;
            print_summary(&result);
            if *json {
                println!("{}", to_json(&result)?);
            }
            Ok(())
        }
        Command::Validate {
            strategy,
            defaults,
            json,
        } => {
            let configs = run_validate(strategy, defaults.as_deref())?;
            if *json {
                println!("{}", to_json(&configs)?);
            }
            Ok(())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, QuantlabError> {
    serde_json::to_string_pretty(value).map_err(|e| QuantlabError::Io(std::io::Error::other(e)))
}

/// Reads the engine defaults file, or the built-in table when none is given.
pub fn load_engine_config(
    path: Option<&Path>,
) -> Result<(DefaultsTable, BacktestConfig), QuantlabError> {
    let adapter = match path {
        Some(path) => {
            eprintln!("Loading defaults from {}", path.display());
            FileConfigAdapter::from_file(path)?
        }
        None => FileConfigAdapter::empty(),
    };
    let defaults = DefaultsTable::from_config(&adapter)?;
    let config = BacktestConfig::from_config(&adapter)?;
    Ok((defaults, config))
}

pub fn run_backtest(
    strategy_path: &Path,
    bars_path: &Path,
    defaults_path: Option<&Path>,
    capital: Option<f64>,
) -> Result<BacktestResult, QuantlabError> {
    let (defaults, mut config) = load_engine_config(defaults_path)?;
    if let Some(capital) = capital {
        config.initial_capital = capital;
    }

    eprintln!("Loading strategy from {}", strategy_path.display());
    let strategy = JsonStrategyAdapter::from_file(strategy_path)?.load_strategy()?;

    eprintln!("Loading bars from {}", bars_path.display());
    let bars = CsvBarAdapter::new(bars_path.to_path_buf()).load_bars()?;

    eprintln!(
        "Running {} on {} {} ({} bars, mode {})",
        strategy.name,
        strategy.symbol,
        strategy.timeframe,
        bars.len(),
        defaults.mode
    );
    backtest_engine::run_backtest(&strategy, &bars, &defaults, &config)
}

pub fn run_validate(
    strategy_path: &Path,
    defaults_path: Option<&Path>,
) -> Result<Vec<EffectiveConfig>, QuantlabError> {
    let (defaults, config) = load_engine_config(defaults_path)?;
    eprintln!("Validating strategy: {}", strategy_path.display());
    let strategy = JsonStrategyAdapter::from_file(strategy_path)?.load_strategy()?;
    let configs = backtest_engine::validate_strategy(&strategy, &defaults, &config)?;

    for cfg in &configs {
        eprintln!("\n[{}]", cfg.regime);
        eprintln!("  Direction:    {:?}", cfg.direction);
        eprintln!("  Sizing:       {}", cfg.sizing.mode);
        eprintln!("  Risk:         {:.2}% (rr {:.2})", cfg.risk_pct, cfg.rr);
        if let Some(trail) = cfg.trailing_pct() {
            eprintln!("  Trailing:     {:.2}%", trail);
        }
        if let Some(partial) = cfg.partial_exit {
            eprintln!("  Partial exit: {:.0}%", partial * 100.0);
        }
        eprintln!(
            "  Rules:        {} entry, {} exit, {} filters",
            cfg.entry_rules.len(),
            cfg.exit_rules.len(),
            cfg.filters.len()
        );
    }
    eprintln!("\nStrategy '{}' is valid", strategy.name);
    Ok(configs)
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Results: {} ({}) ===", result.strategy, result.symbol);
    eprintln!("Initial Capital:  {:.2}", result.initial_capital);
    eprintln!("Final Equity:     {:.2}", result.final_equity);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Exit Events:      {}", result.trades.len());
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    match m.profit_factor {
        Some(pf) => eprintln!("Profit Factor:    {pf:.2}"),
        None => eprintln!("Profit Factor:    n/a (no losing trades)"),
    }
    eprintln!("Average R:        {:.2}", m.avg_r);
    eprintln!("Fees Paid:        {:.4}", m.total_fees);

    let stats = &result.regime_stats;
    eprintln!("\nRegimes ({} changes):", stats.changes);
    for (regime, bars) in &stats.bars {
        let pnl = stats.pnl.get(regime).copied().unwrap_or(0.0);
        eprintln!("  {:<14} {:>6} bars  pnl {:>10.4}", regime.as_str(), bars, pnl);
    }
    if stats.vetoed_entries > 0 || stats.skipped_entries > 0 {
        eprintln!(
            "Entries vetoed by filters: {}, skipped: {}",
            stats.vetoed_entries, stats.skipped_entries
        );
    }
    if result.position_open_at_end {
        eprintln!("warning: position still open at end of data");
    }
}
