use super::{print_json, signed_percent};
use crate::backtester::{analyze, AnalysisRequest};
use crate::context::{AppContext, StopSignal};
use crate::data_context::normalize_universe;
use crate::engine::Thresholds;
use crate::models::TradeMode;
use crate::optimizer_status::ConsoleProgress;
use crate::scanner::{scan, SignalScan};
use anyhow::Result;
use chrono::{Local, NaiveDate};
use log::info;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub tickers: Vec<String>,
    pub entry: f64,
    pub exit: f64,
    pub signal_parameter: f64,
    pub mode: TradeMode,
    pub as_of: Option<NaiveDate>,
    pub lookback_days: i64,
    pub json: bool,
}

pub async fn run(app: &AppContext, stop: StopSignal, options: ScanOptions) -> Result<()> {
    let universe = normalize_universe(&options.tickers);
    let as_of = options.as_of.unwrap_or_else(|| Local::now().date_naive());
    info!(
        "Scanning {} instruments for signals as of {} (last {} days)",
        universe.len(),
        as_of.format("%Y-%m-%d"),
        options.lookback_days
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

    let result = scan(&report, &ctx.store, as_of, options.lookback_days);
    info!(
        "Scan: {} entries today, {} recent, {} active ({} instruments loaded)",
        result.entries_today.len(),
        result.entries_recent.len(),
        result.active.len(),
        report.runs.len()
    );

    if options.json {
        print_json(&result);
    } else {
        print_scan(&result);
    }
    Ok(())
}

fn print_scan(result: &SignalScan) {
    println!(
        "Signal scan as of {} (recent = last {} days)",
        result.as_of, result.lookback_days
    );
    if result.is_empty() {
        println!("No entries and no active positions.");
        return;
    }

    println!();
    println!("Entries today ({}):", result.entries_today.len());
    for entry in &result.entries_today {
        println!(
            "  {:<10} {:<5} @ {:>10.2} signal {:>8.4} now {:>10.2} ({})",
            entry.symbol,
            entry.direction,
            entry.price,
            entry.signal,
            entry.current_price,
            signed_percent(entry.price_change_since)
        );
    }

    println!();
    println!("Recent entries ({}):", result.entries_recent.len());
    for entry in &result.entries_recent {
        println!(
            "  {:<10} {:<5} {} ({}d ago) @ {:>10.2} now {:>10.2} ({})",
            entry.symbol,
            entry.direction,
            entry.date,
            entry.days_ago,
            entry.price,
            entry.current_price,
            signed_percent(entry.price_change_since)
        );
    }

    println!();
    match result.average_active_pnl() {
        Some(average) => println!(
            "Active positions ({}), average P/L {}:",
            result.active.len(),
            signed_percent(average)
        ),
        None => println!("Active positions (0):"),
    }
    for position in &result.active {
        println!(
            "  {:<10} {:<5} since {} @ {:>10.2} now {:>10.2} {:>9} signal {}",
            position.symbol,
            position.direction,
            position.entry_date,
            position.entry_price,
            position.current_price,
            signed_percent(position.pnl_percent),
            position
                .signal
                .map(|value| format!("{:.4}", value))
                .unwrap_or_else(|| "-".to_string())
        );
    }
}
