use crate::config::LabSettings;
use crate::context::StopSignal;
use crate::data_context::SeriesStore;
use crate::error::FetchError;
use crate::fetcher::{BatchRequest, SeriesFetcher};
use crate::models::{BatchJob, BatchOutcome, FetchOutcome, LoadProgress};
use crate::optimizer_status::ProgressObserver;
use crossbeam_channel::{unbounded, Receiver};
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Result of loading one universe for one signal parameter.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub store: SeriesStore,
    pub ok: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub stopped: bool,
    pub batch_count: usize,
    pub settled_batches: usize,
    pub transport_failed_batches: usize,
}

impl LoadReport {
    fn empty() -> Self {
        Self {
            store: SeriesStore::new(),
            ok: 0,
            errors: 0,
            elapsed: Duration::ZERO,
            stopped: false,
            batch_count: 0,
            settled_batches: 0,
            transport_failed_batches: 0,
        }
    }

    /// Every batch failed before the server could answer.
    pub fn is_unreachable(&self) -> bool {
        self.batch_count > 0 && self.transport_failed_batches == self.batch_count
    }
}

#[derive(Default)]
struct LoadState {
    store: SeriesStore,
    settled_batches: usize,
    settled_symbols: usize,
    transport_failed_batches: usize,
}

/// Splits a universe into batches and fetches them through a fixed number of
/// workers pulling from a shared queue.
pub struct BatchLoader {
    fetcher: Arc<dyn SeriesFetcher>,
    batch_size: usize,
    max_concurrent_batches: usize,
    server_workers: usize,
    start_date: String,
}

impl BatchLoader {
    pub fn new(
        fetcher: Arc<dyn SeriesFetcher>,
        batch_size: usize,
        max_concurrent_batches: usize,
        server_workers: usize,
        start_date: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
            server_workers: server_workers.max(1),
            start_date: start_date.into(),
        }
    }

    pub fn from_settings(settings: &LabSettings, fetcher: Arc<dyn SeriesFetcher>) -> Self {
        Self::new(
            fetcher,
            settings.batch_size,
            settings.max_concurrent_batches,
            settings.server_workers,
            settings.start_date_string(),
        )
    }

    pub fn partition(&self, symbols: &[String]) -> Vec<BatchJob> {
        symbols
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| BatchJob {
                index,
                symbols: chunk.to_vec(),
            })
            .collect()
    }

    pub async fn load(
        &self,
        symbols: &[String],
        signal_parameter: f64,
        stop: &StopSignal,
        observer: &dyn ProgressObserver,
    ) -> LoadReport {
        if symbols.is_empty() {
            return LoadReport::empty();
        }

        let jobs = self.partition(symbols);
        let batch_count = jobs.len();
        let worker_count = self.max_concurrent_batches.min(batch_count);
        info!(
            "Fetching {} symbols in {} batches ({} concurrent, signal parameter {})",
            symbols.len(),
            batch_count,
            worker_count,
            signal_parameter
        );

        let (sender, receiver) = unbounded();
        for job in jobs {
            // The receiver is alive, so sending cannot fail.
            let _ = sender.send(job);
        }
        drop(sender);

        let state = Mutex::new(LoadState::default());
        let started = Instant::now();
        let progress = ProgressTracker {
            batch_count,
            symbol_count: symbols.len(),
            started,
            observer,
        };

        let workers = (0..worker_count).map(|_| {
            self.run_worker(receiver.clone(), signal_parameter, stop, &state, &progress)
        });
        join_all(workers).await;

        let elapsed = started.elapsed();
        let state = state.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stopped = stop.is_stopped() && state.settled_batches < batch_count;
        let report = LoadReport {
            ok: state.store.loaded_count(),
            errors: state.store.failed_count(),
            store: state.store,
            elapsed,
            stopped,
            batch_count,
            settled_batches: state.settled_batches,
            transport_failed_batches: state.transport_failed_batches,
        };
        info!(
            "Fetched {} ok, {} errors in {:.1}s ({}/{} batches{})",
            report.ok,
            report.errors,
            elapsed.as_secs_f64(),
            report.settled_batches,
            batch_count,
            if stopped { ", stopped" } else { "" }
        );
        report
    }

    async fn run_worker(
        &self,
        receiver: Receiver<BatchJob>,
        signal_parameter: f64,
        stop: &StopSignal,
        state: &Mutex<LoadState>,
        progress: &ProgressTracker<'_>,
    ) {
        loop {
            if stop.is_stopped() {
                debug!("Stop requested, worker exiting");
                break;
            }
            let Ok(job) = receiver.try_recv() else {
                break;
            };

            let result = self
                .fetcher
                .fetch_batch(BatchRequest {
                    symbols: &job.symbols,
                    signal_parameter,
                    start_date: &self.start_date,
                    max_workers: self.server_workers,
                })
                .await;
            settle_batch(&job, result, state, progress);
        }
    }
}

struct ProgressTracker<'a> {
    batch_count: usize,
    symbol_count: usize,
    started: Instant,
    observer: &'a dyn ProgressObserver,
}

impl ProgressTracker<'_> {
    fn eta(&self, settled_symbols: usize, elapsed: Duration) -> Option<Duration> {
        if settled_symbols == 0 || settled_symbols >= self.symbol_count {
            return None;
        }
        let per_symbol = elapsed.as_secs_f64() / settled_symbols as f64;
        let remaining = (self.symbol_count - settled_symbols) as f64;
        Some(Duration::from_secs_f64(per_symbol * remaining))
    }
}

/// Merge one batch's outcome into the shared state and report progress.
/// A whole-batch error fails every symbol of the batch and nothing else.
fn settle_batch(
    job: &BatchJob,
    result: Result<BatchOutcome, FetchError>,
    state: &Mutex<LoadState>,
    progress: &ProgressTracker<'_>,
) {
    let label = job.label();
    let snapshot = {
        let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match result {
            Ok(mut outcome) => {
                for symbol in &job.symbols {
                    let entry = outcome.remove(symbol).unwrap_or_else(|| {
                        FetchOutcome::Failure("missing from batch response".to_string())
                    });
                    if let FetchOutcome::Failure(reason) = &entry {
                        debug!("{} failed: {}", symbol, reason);
                    }
                    state.store.merge(symbol.clone(), entry);
                }
            }
            Err(err) => {
                warn!("Batch {} failed: {}", label, err);
                if err.is_transport() {
                    state.transport_failed_batches += 1;
                }
                let reason = format!("batch error: {}", err);
                for symbol in &job.symbols {
                    state
                        .store
                        .merge(symbol.clone(), FetchOutcome::Failure(reason.clone()));
                }
            }
        }
        state.settled_batches += 1;
        state.settled_symbols += job.symbols.len();

        let elapsed = progress.started.elapsed();
        LoadProgress {
            batch_label: label,
            done: state.settled_batches,
            total: progress.batch_count,
            ok: state.store.loaded_count(),
            errors: state.store.failed_count(),
            elapsed,
            eta: progress.eta(state.settled_symbols, elapsed),
        }
    };
    progress.observer.on_batch_settled(&snapshot);
}
