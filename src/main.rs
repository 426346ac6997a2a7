use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use slope_lab::{
    commands::{analyze, optimize, scan},
    config::LabSettings,
    context::{AppContext, StopSignal},
    models::TradeMode,
    optimizer::GridExecution,
    param_utils::{ParameterRange, FALLBACK_SIGNAL_PARAMETER},
    scanner::DEFAULT_LOOKBACK_DAYS,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slope-lab")]
#[command(about = "Backtest and optimize threshold-triggered slope signals across a universe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Clone)]
struct UniverseArgs {
    /// Comma or space separated ticker symbols
    #[arg(required = true, value_delimiter = ',', num_args = 1..)]
    tickers: Vec<String>,
    /// Trade direction
    #[arg(long, value_enum, default_value_t = TradeMode::Long)]
    mode: TradeMode,
    /// First date of the fetched series (YYYY-MM-DD), overrides LAB_START_DATE
    #[arg(long = "start-date", value_name = "DATE")]
    start_date: Option<NaiveDate>,
    /// Offline JSON price file used instead of the analysis API
    #[arg(long = "prices", value_name = "FILE")]
    prices: Option<PathBuf>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one entry/exit pair over the universe
    Analyze {
        #[command(flatten)]
        universe: UniverseArgs,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        entry: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        exit: f64,
        /// Signal smoothing parameter
        #[arg(long, default_value_t = FALLBACK_SIGNAL_PARAMETER)]
        alpha: f64,
        /// Only list trades of this symbol
        #[arg(long = "trades-for", value_name = "SYMBOL")]
        trades_for: Option<String>,
        /// Maximum number of trades to list
        #[arg(long = "trades", default_value_t = 50)]
        trade_limit: usize,
    },
    /// Grid-search entry/exit thresholds, optionally sweeping the signal parameter
    Optimize {
        #[command(flatten)]
        universe: UniverseArgs,
        /// Entry threshold range as min:max:step
        #[arg(long, default_value_t = ParameterRange::default_threshold(), allow_hyphen_values = true)]
        entry: ParameterRange,
        /// Exit threshold range as min:max:step
        #[arg(long, default_value_t = ParameterRange::default_threshold(), allow_hyphen_values = true)]
        exit: ParameterRange,
        /// Signal parameter used when no sweep is requested
        #[arg(long, default_value_t = FALLBACK_SIGNAL_PARAMETER)]
        alpha: f64,
        /// Signal parameter sweep as min:max:step (e.g. 100:400:50)
        #[arg(long = "alpha-range", value_name = "RANGE")]
        alpha_range: Option<ParameterRange>,
        /// Evaluate the cells of each grid row on all cores
        #[arg(long)]
        parallel: bool,
        /// Number of ranked cells to print
        #[arg(long, default_value_t = 20)]
        top: usize,
        /// Print the avg return matrix of every slice
        #[arg(long)]
        heatmap: bool,
    },
    /// Report recent entries and open positions for one entry/exit pair
    Scan {
        #[command(flatten)]
        universe: UniverseArgs,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        entry: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        exit: f64,
        #[arg(long, default_value_t = FALLBACK_SIGNAL_PARAMETER)]
        alpha: f64,
        /// Reference date for the scan (defaults to today)
        #[arg(long = "as-of", value_name = "DATE")]
        as_of: Option<NaiveDate>,
        /// Calendar days that count as a recent entry
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
        lookback: i64,
    },
}

impl Commands {
    fn universe(&self) -> &UniverseArgs {
        match self {
            Commands::Analyze { universe, .. }
            | Commands::Optimize { universe, .. }
            | Commands::Scan { universe, .. } => universe,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let mut settings = LabSettings::from_env()?;
    let universe = command.universe().clone();
    if let Some(start_date) = universe.start_date {
        settings.start_date = start_date;
    }
    let app_context = AppContext::initialize(settings, universe.prices.as_deref())?;

    let stop = StopSignal::new();
    spawn_stop_listener(stop.clone());

    match command {
        Commands::Analyze {
            universe,
            entry,
            exit,
            alpha,
            trades_for,
            trade_limit,
        } => {
            let options = analyze::AnalyzeOptions {
                tickers: universe.tickers,
                entry,
                exit,
                signal_parameter: alpha,
                mode: universe.mode,
                trades_for,
                trade_limit,
                json: universe.json,
            };
            analyze::run(&app_context, stop, options).await?;
        }
        Commands::Optimize {
            universe,
            entry,
            exit,
            alpha,
            alpha_range,
            parallel,
            top,
            heatmap,
        } => {
            let options = optimize::OptimizeOptions {
                tickers: universe.tickers,
                entry,
                exit,
                signal_parameter: alpha,
                outer: alpha_range,
                mode: universe.mode,
                execution: if parallel {
                    GridExecution::Parallel
                } else {
                    GridExecution::Cooperative
                },
                top,
                heatmap,
                json: universe.json,
            };
            optimize::run(&app_context, stop, options).await?;
        }
        Commands::Scan {
            universe,
            entry,
            exit,
            alpha,
            as_of,
            lookback,
        } => {
            let options = scan::ScanOptions {
                tickers: universe.tickers,
                entry,
                exit,
                signal_parameter: alpha,
                mode: universe.mode,
                as_of,
                lookback_days: lookback,
                json: universe.json,
            };
            scan::run(&app_context, stop, options).await?;
        }
    }

    Ok(())
}

/// First Ctrl-C stops the run after in-flight work settles.
fn spawn_stop_listener(stop: StopSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stop requested; finishing in-flight batches");
                stop.request_stop();
            }
            Err(err) => warn!("Failed to listen for Ctrl-C: {err}"),
        }
    });
}
