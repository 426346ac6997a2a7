use crate::context::RunContext;
use crate::engine::{Engine, Thresholds};
use crate::error::LabError;
use crate::loader::BatchLoader;
use crate::models::{RunResult, RunStats, Trade, TradeMode};
use crate::optimizer::RunOutcome;
use crate::optimizer_status::ProgressObserver;
use crate::performance::{rank_by_total_return, UniverseSummary};
use anyhow::Result;
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest {
    pub thresholds: Thresholds,
    pub mode: TradeMode,
    pub signal_parameter: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRun {
    pub symbol: String,
    #[serde(flatten)]
    pub result: RunResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogEntry {
    pub symbol: String,
    #[serde(flatten)]
    pub trade: Trade,
}

/// Outcome of one threshold pair applied to a whole universe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub signal_parameter: f64,
    pub entry: f64,
    pub exit: f64,
    pub mode: TradeMode,
    /// Universe order.
    pub runs: Vec<InstrumentRun>,
    pub summary: UniverseSummary,
    pub failures: BTreeMap<String, String>,
    pub outcome: RunOutcome,
}

impl AnalysisReport {
    pub fn run_for(&self, symbol: &str) -> Option<&InstrumentRun> {
        self.runs.iter().find(|run| run.symbol == symbol)
    }

    /// Instruments by total return, best first.
    pub fn ranked(&self) -> Vec<(&str, &RunStats)> {
        let mut entries: Vec<(&str, &RunStats)> = self
            .runs
            .iter()
            .map(|run| (run.symbol.as_str(), &run.result.stats))
            .collect();
        rank_by_total_return(&mut entries);
        entries
    }

    /// All trades across instruments, newest first, optionally for one symbol only.
    pub fn trade_log(&self, symbol: Option<&str>) -> Vec<TradeLogEntry> {
        let mut log: Vec<TradeLogEntry> = self
            .runs
            .iter()
            .filter(|run| symbol.map_or(true, |wanted| run.symbol.eq_ignore_ascii_case(wanted)))
            .flat_map(|run| {
                run.result.trades.iter().map(move |trade| TradeLogEntry {
                    symbol: run.symbol.clone(),
                    trade: trade.clone(),
                })
            })
            .collect();
        log.reverse();
        log
    }
}

/// Run one threshold pair over every usable instrument of an already loaded store.
pub fn backtest_universe(ctx: &RunContext, universe: &[String], request: &AnalysisRequest) -> Vec<InstrumentRun> {
    let engine = Engine::new(request.thresholds, request.mode);
    let symbols = ctx.store.usable_symbols(universe);
    symbols
        .par_iter()
        .filter_map(|symbol| {
            let series = ctx.store.get(symbol)?;
            Some(InstrumentRun {
                symbol: symbol.to_string(),
                result: engine.backtest(series),
            })
        })
        .collect()
}

/// Load the universe for the request's signal parameter and backtest it.
pub async fn analyze(
    ctx: &mut RunContext,
    universe: &[String],
    request: &AnalysisRequest,
    observer: &dyn ProgressObserver,
) -> Result<AnalysisReport> {
    if universe.is_empty() {
        return Err(LabError::EmptyUniverse.into());
    }

    ctx.reset();
    let loader = BatchLoader::from_settings(&ctx.settings, ctx.fetcher.clone());
    let phase = format!("Fetching (signal parameter {})", request.signal_parameter);
    ctx.status.set_phase(phase.as_str());
    observer.on_phase(&phase);

    let load = loader
        .load(universe, request.signal_parameter, &ctx.stop, observer)
        .await;
    if load.is_unreachable() {
        return Err(LabError::Unreachable {
            batches: load.batch_count,
        }
        .into());
    }
    let stopped = load.stopped;
    ctx.store = load.store;

    ctx.status.set_phase("Backtesting");
    observer.on_phase("Backtesting");
    let runs = backtest_universe(ctx, universe, request);
    let summary = UniverseSummary::from_stats(runs.iter().map(|run| &run.result.stats));

    let outcome = if stopped {
        RunOutcome::Stopped
    } else if runs.is_empty() {
        RunOutcome::NoResults
    } else {
        RunOutcome::Completed
    };
    ctx.status.set_phase(outcome.label());
    info!(
        "Analysis {}: {} instruments, avg return {:.2}%, {} positive, {} failed",
        outcome.label(),
        summary.instrument_count,
        summary.avg_return,
        summary.positive_instruments,
        ctx.store.failed_count()
    );

    Ok(AnalysisReport {
        signal_parameter: request.signal_parameter,
        entry: request.thresholds.entry,
        exit: request.thresholds.exit,
        mode: request.mode,
        runs,
        summary,
        failures: ctx.store.failures().clone(),
        outcome,
    })
}
