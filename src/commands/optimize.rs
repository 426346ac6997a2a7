use super::{print_failures, print_json, signed_percent};
use crate::context::{AppContext, StopSignal};
use crate::data_context::normalize_universe;
use crate::models::TradeMode;
use crate::optimizer::{optimize, GridExecution, GridSlice, GridSpec, OptimizationReport};
use crate::optimizer_status::ConsoleProgress;
use crate::param_utils::ParameterRange;
use anyhow::Result;
use log::info;

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub tickers: Vec<String>,
    pub entry: ParameterRange,
    pub exit: ParameterRange,
    pub signal_parameter: f64,
    pub outer: Option<ParameterRange>,
    pub mode: TradeMode,
    pub execution: GridExecution,
    pub top: usize,
    pub heatmap: bool,
    pub json: bool,
}

pub async fn run(app: &AppContext, stop: StopSignal, options: OptimizeOptions) -> Result<()> {
    let universe = normalize_universe(&options.tickers);
    info!(
        "Received optimize command for {} instruments (entry {}, exit {}, outer {})",
        universe.len(),
        options.entry,
        options.exit,
        options
            .outer
            .map(|range| range.to_string())
            .unwrap_or_else(|| options.signal_parameter.to_string())
    );

    let spec = GridSpec {
        entry: options.entry,
        exit: options.exit,
        mode: options.mode,
        signal_parameter: options.signal_parameter,
        outer: options.outer,
        execution: options.execution,
    };
    let mut ctx = app.run_context(stop);
    let progress = ConsoleProgress::new(ctx.status.clone());
    let report = optimize(&mut ctx, &universe, &spec, &progress).await;
    progress.finish();
    let report = report?;

    if options.json {
        print_json(&report);
        return Ok(());
    }
    print_report(&report, options.top);
    if options.heatmap {
        for slice in &report.slices {
            print_heatmap(slice);
        }
    }
    print_failures(ctx.store.failures());
    Ok(())
}

fn print_report(report: &OptimizationReport, top: usize) {
    println!(
        "Optimization {} | {} slice(s) | {} cells",
        report.outcome.label(),
        report.slices.len(),
        report.ranked.len()
    );
    if !report.skipped_outer_values.is_empty() {
        let skipped: Vec<String> = report
            .skipped_outer_values
            .iter()
            .map(|value| value.to_string())
            .collect();
        println!("Skipped signal parameters (no usable instruments): {}", skipped.join(", "));
    }

    let Some(best) = &report.best else {
        println!("No results: no grid cell could be evaluated.");
        return;
    };
    println!(
        "Best: entry {} exit {}{} | avg return {} | win rate {:.1}% | trades {:.1} | positive {}/{}",
        best.entry,
        best.exit,
        best.outer_parameter
            .map(|value| format!(" signal parameter {}", value))
            .unwrap_or_default(),
        signed_percent(best.avg_return),
        best.avg_win_rate,
        best.avg_trade_count,
        best.positive_instrument_count,
        best.total_instrument_count
    );

    println!();
    println!(
        "{:>4}  {:>8} {:>7} {:>7} {:>10} {:>7} {:>8} {:>9}",
        "#", "OUTER", "ENTRY", "EXIT", "AVG RET", "WIN%", "TRADES", "POSITIVE"
    );
    for (rank, cell) in report.top(top).iter().enumerate() {
        println!(
            "{:>4}  {:>8} {:>7.2} {:>7.2} {:>10} {:>6.1}% {:>8.1} {:>5}/{:<3}",
            rank + 1,
            cell.outer_parameter
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cell.entry,
            cell.exit,
            signed_percent(cell.avg_return),
            cell.avg_win_rate,
            cell.avg_trade_count,
            cell.positive_instrument_count,
            cell.total_instrument_count
        );
    }
}

fn print_heatmap(slice: &GridSlice) {
    println!();
    println!(
        "Avg return heatmap{} ({} instruments, rows entry, columns exit)",
        slice
            .outer_parameter
            .map(|value| format!(" for signal parameter {}", value))
            .unwrap_or_default(),
        slice.instrument_count
    );
    let header: String = slice
        .exit_values
        .iter()
        .map(|exit| format!("{:>7.2}", exit))
        .collect();
    println!("{:>7} {}", "", header);
    for (entry, row) in slice.entry_values.iter().zip(&slice.matrix) {
        let cells: String = row.iter().map(|value| format!("{:>7.1}", value)).collect();
        println!("{:>7.2} {}", entry, cells);
    }
}
