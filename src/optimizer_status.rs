use crate::models::{format_eta, GridProgress, LoadProgress};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives progress events from the loader and the optimizer. Every method
/// defaults to a no-op.
pub trait ProgressObserver: Send + Sync {
    fn on_phase(&self, _phase: &str) {}

    fn on_batch_settled(&self, _progress: &LoadProgress) {}

    fn on_grid_row(&self, _progress: &GridProgress) {}
}

/// Observer that discards every event.
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    batches_done: usize,
    batches_total: usize,
    loaded: usize,
    failed: usize,
    eta: Option<Duration>,
    outer_parameter: Option<f64>,
    rows_done: usize,
    rows_total: usize,
    best_avg_return: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub batches_done: usize,
    pub batches_total: usize,
    pub loaded: usize,
    pub failed: usize,
    pub eta: Option<Duration>,
    pub outer_parameter: Option<f64>,
    pub rows_done: usize,
    pub rows_total: usize,
    pub best_avg_return: Option<f64>,
}

impl OptimizerStatusSnapshot {
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{} | batches {}/{} ok {} errors {}",
            self.phase, self.batches_done, self.batches_total, self.loaded, self.failed
        );
        if let Some(eta) = self.eta {
            text.push_str(&format!(" eta {}", format_eta(eta)));
        }
        if self.rows_total > 0 {
            text.push_str(&format!(" | rows {}/{}", self.rows_done, self.rows_total));
        }
        if let Some(best) = self.best_avg_return {
            text.push_str(&format!(" | best {:.2}%", best));
        }
        text
    }
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_best_avg_return(&self, best: Option<f64>) {
        if let Ok(mut data) = self.inner.lock() {
            data.best_avg_return = best;
        }
    }

    pub fn reset(&self) {
        if let Ok(mut data) = self.inner.lock() {
            *data = OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            };
        }
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                batches_done: data.batches_done,
                batches_total: data.batches_total,
                loaded: data.loaded,
                failed: data.failed,
                eta: data.eta,
                outer_parameter: data.outer_parameter,
                rows_done: data.rows_done,
                rows_total: data.rows_total,
                best_avg_return: data.best_avg_return,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                batches_done: 0,
                batches_total: 0,
                loaded: 0,
                failed: 0,
                eta: None,
                outer_parameter: None,
                rows_done: 0,
                rows_total: 0,
                best_avg_return: None,
            }
        }
    }
}

impl ProgressObserver for OptimizerStatus {
    fn on_phase(&self, phase: &str) {
        self.set_phase(phase);
    }

    fn on_batch_settled(&self, progress: &LoadProgress) {
        if let Ok(mut data) = self.inner.lock() {
            data.batches_done = progress.done;
            data.batches_total = progress.total;
            data.loaded = progress.ok;
            data.failed = progress.errors;
            data.eta = progress.eta;
        }
    }

    fn on_grid_row(&self, progress: &GridProgress) {
        if let Ok(mut data) = self.inner.lock() {
            data.outer_parameter = progress.outer_parameter;
            data.rows_done = progress.rows_done;
            data.rows_total = progress.rows_total;
        }
    }
}

/// Terminal progress bars for interactive runs. Also forwards every event to
/// the shared status.
pub struct ConsoleProgress {
    status: OptimizerStatus,
    fetch_bar: Mutex<Option<ProgressBar>>,
    grid_bar: Mutex<Option<ProgressBar>>,
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ConsoleProgress {
    pub fn new(status: OptimizerStatus) -> Self {
        Self {
            status,
            fetch_bar: Mutex::new(None),
            grid_bar: Mutex::new(None),
        }
    }

    fn with_bar<F>(slot: &Mutex<Option<ProgressBar>>, total: usize, update: F)
    where
        F: FnOnce(&ProgressBar),
    {
        if let Ok(mut guard) = slot.lock() {
            let bar = guard.get_or_insert_with(|| {
                let bar = ProgressBar::new(total as u64);
                bar.set_style(bar_style());
                bar
            });
            if bar.length() != Some(total as u64) {
                bar.set_length(total as u64);
            }
            update(bar);
            if bar.position() >= total as u64 {
                bar.finish();
                *guard = None;
            }
        }
    }

    pub fn finish(&self) {
        for slot in [&self.fetch_bar, &self.grid_bar] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(bar) = guard.take() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_phase(&self, phase: &str) {
        self.status.on_phase(phase);
    }

    fn on_batch_settled(&self, progress: &LoadProgress) {
        self.status.on_batch_settled(progress);
        Self::with_bar(&self.fetch_bar, progress.total, |bar| {
            bar.set_position(progress.done as u64);
            bar.set_message(format!(
                "{} ok {} err {} eta {}",
                progress.batch_label,
                progress.ok,
                progress.errors,
                progress.eta_label()
            ));
        });
    }

    fn on_grid_row(&self, progress: &GridProgress) {
        self.status.on_grid_row(progress);
        Self::with_bar(&self.grid_bar, progress.rows_total, |bar| {
            bar.set_position(progress.rows_done as u64);
            let outer = progress
                .outer_parameter
                .map(|value| format!("alpha {} ", value))
                .unwrap_or_default();
            bar.set_message(format!(
                "{}entry {:.2} over {} instruments",
                outer, progress.entry, progress.instrument_count
            ));
        });
    }
}
