use crate::context::RunContext;
use crate::data_context::SeriesStore;
use crate::engine::{Engine, Thresholds};
use crate::error::LabError;
use crate::loader::BatchLoader;
use crate::models::{GridCell, GridProgress, TradeMode};
use crate::optimizer_status::ProgressObserver;
use crate::param_utils::ParameterRange;
use anyhow::Result;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Instant;

/// How the cells of one grid row are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridExecution {
    /// One cell after another on the calling task, yielding after each row.
    #[default]
    Cooperative,
    /// Cells of a row evaluated on the rayon pool; still yields after each row.
    Parallel,
}

#[derive(Debug, Clone)]
pub struct GridSpec {
    pub entry: ParameterRange,
    pub exit: ParameterRange,
    pub mode: TradeMode,
    /// Signal parameter used when no outer range is swept.
    pub signal_parameter: f64,
    pub outer: Option<ParameterRange>,
    pub execution: GridExecution,
}

impl GridSpec {
    fn outer_values(&self) -> Vec<Option<f64>> {
        match &self.outer {
            Some(range) => range.values_or_fallback().into_iter().map(Some).collect(),
            None => vec![None],
        }
    }
}

/// One outer-parameter stage: heatmap axes, the avgReturn matrix and its cells.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSlice {
    pub outer_parameter: Option<f64>,
    pub entry_values: Vec<f64>,
    pub exit_values: Vec<f64>,
    /// Rows follow `entry_values`, columns follow `exit_values`.
    pub matrix: Vec<Vec<f64>>,
    pub cells: Vec<GridCell>,
    pub best: Option<GridCell>,
    pub instrument_count: usize,
    pub loaded: usize,
    pub failed: usize,
}

impl GridSlice {
    pub fn cell(&self, entry_index: usize, exit_index: usize) -> Option<&GridCell> {
        self.cells
            .get(entry_index * self.exit_values.len() + exit_index)
            .filter(|cell| cell.entry_index == entry_index && cell.exit_index == exit_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Completed,
    Stopped,
    NoResults,
}

impl RunOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Stopped => "stopped early",
            RunOutcome::NoResults => "no results",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub slices: Vec<GridSlice>,
    /// Every cell across all slices, best average return first.
    pub ranked: Vec<GridCell>,
    pub best: Option<GridCell>,
    pub skipped_outer_values: Vec<f64>,
    pub outcome: RunOutcome,
}

impl OptimizationReport {
    pub fn top(&self, n: usize) -> &[GridCell] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    pub fn slice_for(&self, outer_parameter: Option<f64>) -> Option<&GridSlice> {
        self.slices.iter().find(|slice| {
            match (slice.outer_parameter, outer_parameter) {
                (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                (None, None) => true,
                _ => false,
            }
        })
    }
}

/// Stable descending sort by average return.
pub fn rank_cells(cells: &mut [GridCell]) {
    cells.sort_by(|a, b| {
        b.avg_return
            .partial_cmp(&a.avg_return)
            .unwrap_or(Ordering::Equal)
    });
}

/// Keep `current` unless `candidate` is strictly better.
fn is_new_best(current: Option<&GridCell>, candidate: &GridCell) -> bool {
    match current {
        None => true,
        Some(best) => candidate.avg_return > best.avg_return,
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_cell(
    store: &SeriesStore,
    symbols: &[&str],
    mode: TradeMode,
    outer_parameter: Option<f64>,
    entry: f64,
    exit: f64,
    entry_index: usize,
    exit_index: usize,
) -> GridCell {
    let engine = Engine::new(Thresholds::new(entry, exit), mode);
    let mut return_sum = 0.0;
    let mut win_rate_sum = 0.0;
    let mut trade_sum = 0.0;
    let mut positive = 0;
    let mut count = 0;

    for symbol in symbols {
        let Some(series) = store.get(symbol) else {
            continue;
        };
        let stats = engine.backtest(series).stats;
        return_sum += stats.total_return;
        win_rate_sum += stats.win_rate;
        trade_sum += stats.total_trades as f64;
        if stats.total_return > 0.0 {
            positive += 1;
        }
        count += 1;
    }

    let mean = |sum: f64| if count > 0 { sum / count as f64 } else { 0.0 };
    GridCell {
        outer_parameter,
        entry,
        exit,
        entry_index,
        exit_index,
        avg_return: mean(return_sum),
        avg_win_rate: mean(win_rate_sum),
        avg_trade_count: mean(trade_sum),
        positive_instrument_count: positive,
        total_instrument_count: count,
    }
}

/// Sweep the entry x exit grid over the usable instruments of `store`.
/// Returns `None` when no instrument of `universe` has a usable series.
#[allow(clippy::too_many_arguments)]
pub async fn run_grid_search(
    store: &SeriesStore,
    universe: &[String],
    entry_values: &[f64],
    exit_values: &[f64],
    mode: TradeMode,
    outer_parameter: Option<f64>,
    execution: GridExecution,
    observer: &dyn ProgressObserver,
) -> Option<GridSlice> {
    let symbols = store.usable_symbols(universe);
    if symbols.is_empty() {
        return None;
    }

    let mut matrix = Vec::with_capacity(entry_values.len());
    let mut cells = Vec::with_capacity(entry_values.len() * exit_values.len());
    let mut best: Option<GridCell> = None;

    for (entry_index, &entry) in entry_values.iter().enumerate() {
        let row: Vec<GridCell> = match execution {
            GridExecution::Cooperative => exit_values
                .iter()
                .enumerate()
                .map(|(exit_index, &exit)| {
                    evaluate_cell(store, &symbols, mode, outer_parameter, entry, exit, entry_index, exit_index)
                })
                .collect(),
            GridExecution::Parallel => exit_values
                .par_iter()
                .enumerate()
                .map(|(exit_index, &exit)| {
                    evaluate_cell(store, &symbols, mode, outer_parameter, entry, exit, entry_index, exit_index)
                })
                .collect(),
        };

        matrix.push(row.iter().map(|cell| cell.avg_return).collect());
        for cell in &row {
            if is_new_best(best.as_ref(), cell) {
                best = Some(cell.clone());
            }
        }
        cells.extend(row);

        observer.on_grid_row(&GridProgress {
            outer_parameter,
            rows_done: entry_index + 1,
            rows_total: entry_values.len(),
            entry,
            instrument_count: symbols.len(),
        });
        tokio::task::yield_now().await;
    }

    Some(GridSlice {
        outer_parameter,
        entry_values: entry_values.to_vec(),
        exit_values: exit_values.to_vec(),
        matrix,
        cells,
        best,
        instrument_count: symbols.len(),
        loaded: store.loaded_count(),
        failed: store.failed_count(),
    })
}

/// Full optimization run: for each outer value, load the universe and sweep the grid.
pub async fn optimize(
    ctx: &mut RunContext,
    universe: &[String],
    spec: &GridSpec,
    observer: &dyn ProgressObserver,
) -> Result<OptimizationReport> {
    if universe.is_empty() {
        return Err(LabError::EmptyUniverse.into());
    }
    spec.entry.validate("entry")?;
    spec.exit.validate("exit")?;
    let entry_values = spec.entry.values();
    let exit_values = spec.exit.values();
    let outer_values = spec.outer_values();

    ctx.reset();
    let loader = BatchLoader::from_settings(&ctx.settings, ctx.fetcher.clone());
    let started = Instant::now();
    info!(
        "Optimizing {} instruments: {} entry x {} exit values, {} outer value(s), mode {}",
        universe.len(),
        entry_values.len(),
        exit_values.len(),
        outer_values.len(),
        spec.mode
    );

    let mut slices = Vec::new();
    let mut skipped_outer_values = Vec::new();
    let mut stopped = false;
    let mut loads = 0;
    let mut unreachable_loads = 0;
    let mut unreachable_batches = 0;

    for outer_parameter in outer_values {
        if ctx.stop.is_stopped() {
            stopped = true;
            break;
        }
        let signal_parameter = outer_parameter.unwrap_or(spec.signal_parameter);

        let phase = format!("Fetching (signal parameter {})", signal_parameter);
        ctx.status.set_phase(phase.as_str());
        observer.on_phase(&phase);
        let load = loader
            .load(universe, signal_parameter, &ctx.stop, observer)
            .await;
        if load.stopped {
            stopped = true;
            break;
        }
        loads += 1;
        if load.is_unreachable() {
            warn!(
                "Analysis API unreachable for signal parameter {} ({} batches failed), skipping",
                signal_parameter, load.batch_count
            );
            unreachable_loads += 1;
            unreachable_batches = load.batch_count;
            skipped_outer_values.push(signal_parameter);
            continue;
        }
        ctx.store = load.store;

        let phase = format!("Grid search (signal parameter {})", signal_parameter);
        ctx.status.set_phase(phase.as_str());
        observer.on_phase(&phase);
        let slice = run_grid_search(
            &ctx.store,
            universe,
            &entry_values,
            &exit_values,
            spec.mode,
            outer_parameter,
            spec.execution,
            observer,
        )
        .await;

        let Some(slice) = slice else {
            warn!(
                "No usable instruments for signal parameter {} ({} failed), skipping",
                signal_parameter,
                ctx.store.failed_count()
            );
            skipped_outer_values.push(signal_parameter);
            continue;
        };

        if let Some(candidate) = &slice.best {
            info!(
                "Signal parameter {}: best entry {} exit {} avg return {:.2}% over {} instruments",
                signal_parameter,
                candidate.entry,
                candidate.exit,
                candidate.avg_return,
                slice.instrument_count
            );
            if is_new_best(ctx.best.as_ref(), candidate) {
                ctx.best = Some(candidate.clone());
                ctx.status
                    .set_best_avg_return(Some(candidate.avg_return));
            }
        }
        slices.push(slice);
    }

    if !stopped && slices.is_empty() && loads > 0 && unreachable_loads == loads {
        return Err(LabError::Unreachable {
            batches: unreachable_batches,
        }
        .into());
    }

    let mut ranked: Vec<GridCell> = slices
        .iter()
        .flat_map(|slice| slice.cells.iter().cloned())
        .collect();
    rank_cells(&mut ranked);

    let outcome = if stopped {
        RunOutcome::Stopped
    } else if slices.is_empty() {
        RunOutcome::NoResults
    } else {
        RunOutcome::Completed
    };
    ctx.status.set_phase(outcome.label());
    info!(
        "Optimization {} in {:.1}s: {} cells, {} skipped outer value(s)",
        outcome.label(),
        started.elapsed().as_secs_f64(),
        ranked.len(),
        skipped_outer_values.len()
    );

    Ok(OptimizationReport {
        slices,
        ranked,
        best: ctx.best.clone(),
        skipped_outer_values,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabSettings;
    use crate::context::{RunContext, StopSignal};
    use crate::error::FetchError;
    use crate::fetcher::{fetch_each, BatchRequest, SeriesFetcher};
    use crate::models::{BatchOutcome, FetchOutcome, InstrumentSeries};
    use crate::optimizer_status::NoProgress;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn series(prices: &[f64], signal: &[f64]) -> InstrumentSeries {
        InstrumentSeries::new(
            (0..prices.len()).map(|i| format!("2024-01-{:02}", i + 1)).collect(),
            prices.iter().copied().map(Some).collect(),
            signal.iter().copied().map(Some).collect(),
        )
    }

    fn store() -> (SeriesStore, Vec<String>) {
        let mut store = SeriesStore::new();
        store.insert(
            "AAA",
            series(&[10.0, 11.0, 9.0, 12.0, 8.0], &[-1.0, 1.0, 1.0, -1.0, -1.0]),
        );
        store.insert(
            "BBB",
            series(&[20.0, 19.0, 22.0, 25.0, 21.0], &[0.2, 0.6, -0.4, 0.9, -0.8]),
        );
        store.insert("CCC", InstrumentSeries::default());
        let universe = vec!["AAA".into(), "BBB".into(), "CCC".into(), "DDD".into()];
        (store, universe)
    }

    fn cell(avg_return: f64, entry: f64) -> GridCell {
        GridCell {
            outer_parameter: None,
            entry,
            exit: 0.0,
            entry_index: 0,
            exit_index: 0,
            avg_return,
            avg_win_rate: 0.0,
            avg_trade_count: 0.0,
            positive_instrument_count: 0,
            total_instrument_count: 1,
        }
    }

    #[tokio::test]
    async fn best_cell_dominates_every_cell() {
        let (store, universe) = store();
        let entries = ParameterRange::new(-1.0, 1.0, 0.5).values();
        let exits = ParameterRange::new(-1.0, 1.0, 0.5).values();
        let slice = run_grid_search(
            &store,
            &universe,
            &entries,
            &exits,
            TradeMode::Long,
            None,
            GridExecution::Cooperative,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(slice.instrument_count, 2);
        assert_eq!(slice.cells.len(), entries.len() * exits.len());
        assert_eq!(slice.matrix.len(), entries.len());
        assert!(slice.matrix.iter().all(|row| row.len() == exits.len()));

        let best = slice.best.clone().unwrap();
        assert!(slice.cells.iter().all(|c| best.avg_return >= c.avg_return));
        let first_max = slice
            .cells
            .iter()
            .find(|c| c.avg_return == best.avg_return)
            .unwrap();
        assert_eq!(first_max, &best);
        assert_eq!(
            slice.cell(best.entry_index, best.exit_index).map(|c| c.avg_return),
            Some(best.avg_return)
        );
    }

    #[tokio::test]
    async fn cell_averages_match_individual_runs() {
        let (store, universe) = store();
        let slice = run_grid_search(
            &store,
            &universe,
            &[0.0],
            &[0.0],
            TradeMode::Long,
            Some(150.0),
            GridExecution::Cooperative,
            &NoProgress,
        )
        .await
        .unwrap();
        let engine = Engine::new(Thresholds::new(0.0, 0.0), TradeMode::Long);
        let a = engine.backtest(store.get("AAA").unwrap()).stats;
        let b = engine.backtest(store.get("BBB").unwrap()).stats;

        let cell = &slice.cells[0];
        assert_eq!(cell.outer_parameter, Some(150.0));
        assert_eq!(cell.total_instrument_count, 2);
        assert!((cell.avg_return - (a.total_return + b.total_return) / 2.0).abs() < 1e-12);
        assert!((cell.avg_win_rate - (a.win_rate + b.win_rate) / 2.0).abs() < 1e-12);
        assert!(
            (cell.avg_trade_count - (a.total_trades + b.total_trades) as f64 / 2.0).abs() < 1e-12
        );
    }

    #[tokio::test]
    async fn parallel_rows_match_cooperative_rows() {
        let (store, universe) = store();
        let values = ParameterRange::new(-1.0, 1.0, 0.25).values();
        let cooperative = run_grid_search(
            &store, &universe, &values, &values, TradeMode::Both, None,
            GridExecution::Cooperative, &NoProgress,
        )
        .await
        .unwrap();
        let parallel = run_grid_search(
            &store, &universe, &values, &values, TradeMode::Both, None,
            GridExecution::Parallel, &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(cooperative.cells, parallel.cells);
        assert_eq!(cooperative.best, parallel.best);
    }

    #[tokio::test]
    async fn universe_without_usable_series_yields_no_slice() {
        let (store, _) = store();
        let universe = vec!["CCC".to_string(), "DDD".to_string()];
        let slice = run_grid_search(
            &store, &universe, &[0.0], &[0.0], TradeMode::Long, None,
            GridExecution::Cooperative, &NoProgress,
        )
        .await;
        assert!(slice.is_none());
    }

    #[test]
    fn ties_keep_first_seen() {
        let first = cell(5.0, 1.0);
        let tied = cell(5.0, 2.0);
        assert!(is_new_best(None, &first));
        assert!(!is_new_best(Some(&first), &tied));
        assert!(is_new_best(Some(&first), &cell(5.1, 3.0)));

        let mut cells = vec![cell(1.0, 0.0), first.clone(), cell(3.0, 4.0), tied.clone()];
        rank_cells(&mut cells);
        let order: Vec<f64> = cells.iter().map(|c| c.entry).collect();
        assert_eq!(order, vec![1.0, 2.0, 4.0, 0.0]);
    }

    #[test]
    fn report_lookup_and_top_n() {
        let report = OptimizationReport {
            slices: vec![GridSlice {
                outer_parameter: Some(150.0),
                entry_values: vec![0.0],
                exit_values: vec![0.0],
                matrix: vec![vec![2.0]],
                cells: vec![cell(2.0, 0.0)],
                best: Some(cell(2.0, 0.0)),
                instrument_count: 1,
                loaded: 1,
                failed: 0,
            }],
            ranked: vec![cell(2.0, 0.0), cell(1.0, 0.5)],
            best: Some(cell(2.0, 0.0)),
            skipped_outer_values: vec![],
            outcome: RunOutcome::Completed,
        };
        assert!(report.slice_for(Some(150.0)).is_some());
        assert!(report.slice_for(Some(200.0)).is_none());
        assert_eq!(report.top(1).len(), 1);
        assert_eq!(report.top(10).len(), 2);
    }

    /// Answers every signal parameter except those listed as down (transport
    /// failure) or empty (every symbol fails).
    #[derive(Default)]
    struct StagedFetcher {
        down: Vec<f64>,
        empty: Vec<f64>,
    }

    async fn connection_refused() -> FetchError {
        let port = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener.local_addr().map(|addr| addr.port()).unwrap_or(9),
            Err(_) => 9,
        };
        match reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}", port))
            .send()
            .await
        {
            Err(err) => FetchError::Transport(err),
            Ok(_) => FetchError::Payload("closed port answered".into()),
        }
    }

    #[async_trait]
    impl SeriesFetcher for StagedFetcher {
        async fn fetch_single(
            &self,
            symbol: &str,
            _signal_parameter: f64,
            _start_date: &str,
        ) -> Result<InstrumentSeries, FetchError> {
            Ok(match symbol {
                "AAA" => series(&[10.0, 11.0, 9.0, 12.0, 8.0], &[-1.0, 1.0, 1.0, -1.0, -1.0]),
                _ => series(&[20.0, 19.0, 22.0, 25.0, 21.0], &[0.2, 0.6, -0.4, 0.9, -0.8]),
            })
        }

        async fn fetch_batch(&self, request: BatchRequest<'_>) -> Result<BatchOutcome, FetchError> {
            if self.down.contains(&request.signal_parameter) {
                return Err(connection_refused().await);
            }
            if self.empty.contains(&request.signal_parameter) {
                return Ok(request
                    .symbols
                    .iter()
                    .map(|symbol| (symbol.clone(), FetchOutcome::Failure("No data".into())))
                    .collect());
            }
            fetch_each(self, request).await
        }
    }

    fn staged_run(fetcher: StagedFetcher) -> RunContext {
        RunContext::new(LabSettings::default(), Arc::new(fetcher), StopSignal::new())
    }

    fn sweep(outer: ParameterRange) -> GridSpec {
        GridSpec {
            entry: ParameterRange::new(-0.5, 0.5, 0.5),
            exit: ParameterRange::new(-0.5, 0.5, 0.5),
            mode: TradeMode::Both,
            signal_parameter: 200.0,
            outer: Some(outer),
            execution: GridExecution::Cooperative,
        }
    }

    fn two_stages() -> ParameterRange {
        ParameterRange::new(100.0, 200.0, 100.0)
    }

    fn pair() -> Vec<String> {
        vec!["AAA".to_string(), "BBB".to_string()]
    }

    #[tokio::test]
    async fn unreachable_outer_value_keeps_earlier_slices() {
        let mut ctx = staged_run(StagedFetcher {
            down: vec![200.0],
            ..StagedFetcher::default()
        });
        let report = optimize(&mut ctx, &pair(), &sweep(two_stages()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.slices.len(), 1);
        assert_eq!(report.slices[0].outer_parameter, Some(100.0));
        assert_eq!(report.skipped_outer_values, vec![200.0]);
        assert_eq!(report.ranked.len(), 9);
        let best = report.best.clone().unwrap();
        assert_eq!(best.outer_parameter, Some(100.0));
        assert_eq!(ctx.best.map(|cell| cell.avg_return), Some(best.avg_return));
    }

    #[tokio::test]
    async fn outer_value_without_usable_instruments_is_skipped() {
        let mut ctx = staged_run(StagedFetcher {
            empty: vec![100.0],
            ..StagedFetcher::default()
        });
        let report = optimize(&mut ctx, &pair(), &sweep(two_stages()), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.skipped_outer_values, vec![100.0]);
        assert_eq!(report.slices.len(), 1);
        assert!(report.slice_for(Some(100.0)).is_none());
        assert!(report
            .ranked
            .iter()
            .all(|cell| cell.outer_parameter == Some(200.0)));
        assert_eq!(report.ranked.len(), 9);
    }

    #[tokio::test]
    async fn every_stage_skipped_ends_without_results() {
        let mut ctx = staged_run(StagedFetcher {
            empty: vec![150.0],
            ..StagedFetcher::default()
        });
        let report = optimize(&mut ctx, &pair(), &sweep(ParameterRange::single(150.0)), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::NoResults);
        assert_eq!(report.skipped_outer_values, vec![150.0]);
        assert!(report.slices.is_empty());
        assert!(report.ranked.is_empty());
        assert!(report.best.is_none());
        assert!(ctx.best.is_none());
    }

    #[tokio::test]
    async fn every_load_unreachable_is_an_error() {
        let mut ctx = staged_run(StagedFetcher {
            down: vec![100.0, 200.0],
            ..StagedFetcher::default()
        });
        let err = optimize(&mut ctx, &pair(), &sweep(two_stages()), &NoProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"), "{}", err);
    }
}
