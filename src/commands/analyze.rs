use super::{print_failures, print_json, signed_percent};
use crate::backtester::{analyze, AnalysisReport, AnalysisRequest};
use crate::context::{AppContext, StopSignal};
use crate::data_context::normalize_universe;
use crate::engine::Thresholds;
use crate::models::TradeMode;
use crate::optimizer::RunOutcome;
use crate::optimizer_status::ConsoleProgress;
use anyhow::Result;
use log::{info, warn};

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub tickers: Vec<String>,
    pub entry: f64,
    pub exit: f64,
    pub signal_parameter: f64,
    pub mode: TradeMode,
    pub trades_for: Option<String>,
    pub trade_limit: usize,
    pub json: bool,
}

pub async fn run(app: &AppContext, stop: StopSignal, options: AnalyzeOptions) -> Result<()> {
    let universe = normalize_universe(&options.tickers);
    info!(
        "Analyzing {} instruments (entry {}, exit {}, mode {}, signal parameter {})",
        universe.len(),
        options.entry,
        options.exit,
        options.mode,
        options.signal_parameter
    );

    let mut ctx = app.run_context(stop);
    let progress = ConsoleProgress::new(ctx.status.clone());
    let request = AnalysisRequest {
        thresholds: Thresholds::new(options.entry, options.exit),
        mode: options.mode,
        signal_parameter: options.signal_parameter,
    };
    let report = analyze(&mut ctx, &universe, &request, &progress).await;
    progress.finish();
    let report = report?;

    if options.json {
        print_json(&report);
    } else {
        print_report(&report, options.trades_for.as_deref(), options.trade_limit);
    }
    if report.outcome == RunOutcome::NoResults {
        warn!("No instrument produced a usable series");
    }
    Ok(())
}

fn print_report(report: &AnalysisReport, trades_for: Option<&str>, trade_limit: usize) {
    let summary = &report.summary;
    println!(
        "Analysis {} | signal parameter {} | entry {} | exit {} | mode {}",
        report.outcome.label(),
        report.signal_parameter,
        report.entry,
        report.exit,
        report.mode
    );
    if summary.instrument_count == 0 {
        println!("No results: no instrument could be backtested.");
        print_failures(&report.failures);
        return;
    }
    println!(
        "Avg return {} | Avg win rate {:.1}% | Trades {} | Avg max DD -{:.1}% | Positive {}/{}",
        signed_percent(summary.avg_return),
        summary.avg_win_rate,
        summary.total_trades,
        summary.avg_max_drawdown,
        summary.positive_instruments,
        summary.instrument_count
    );

    println!();
    println!(
        "{:>4}  {:<10} {:>10} {:>7} {:>7} {:>9} {:>8} {:>8}",
        "#", "SYMBOL", "RETURN", "TRADES", "WIN%", "AVG", "MAX DD", "PF"
    );
    for (rank, (symbol, stats)) in report.ranked().into_iter().enumerate() {
        println!(
            "{:>4}  {:<10} {:>10} {:>7} {:>6.1}% {:>9} {:>7.1}% {:>8.2}",
            rank + 1,
            symbol,
            signed_percent(stats.total_return),
            stats.total_trades,
            stats.win_rate,
            signed_percent(stats.avg_trade),
            stats.max_drawdown,
            stats.profit_factor
        );
    }

    let trades = report.trade_log(trades_for);
    println!();
    println!(
        "Trades, newest first ({} of {}):",
        trades.len().min(trade_limit),
        trades.len()
    );
    for entry in trades.iter().take(trade_limit) {
        let trade = &entry.trade;
        println!(
            "  {:<10} {:<5} {} -> {:<10} {:>10.2} {:>10.2} {:>9} {:>10.2}",
            entry.symbol,
            trade.direction,
            trade.entry_date,
            trade.exit_date,
            trade.entry_price,
            trade.exit_price,
            signed_percent(trade.pnl_percent),
            trade.capital_after
        );
    }
    if trades.is_empty() {
        println!("  No trades");
    }

    print_failures(&report.failures);
}
