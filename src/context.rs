use crate::api_client::HttpSeriesFetcher;
use crate::config::LabSettings;
use crate::data_context::SeriesStore;
use crate::fetcher::SeriesFetcher;
use crate::models::GridCell;
use crate::optimizer_status::OptimizerStatus;
use crate::price_file::PriceFileFetcher;
use anyhow::Result;
use log::info;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by the loader, the optimizer and the CLI.
#[derive(Clone, Default, Debug)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct AppContext {
    settings: LabSettings,
    fetcher: Arc<dyn SeriesFetcher>,
}

impl AppContext {
    /// Build the context with the HTTP fetcher, or the offline fetcher when a
    /// price file is given.
    pub fn initialize(settings: LabSettings, price_file: Option<&Path>) -> Result<Self> {
        let fetcher: Arc<dyn SeriesFetcher> = match price_file {
            Some(path) => {
                info!("Using offline price file {}", path.display());
                Arc::new(PriceFileFetcher::load(path)?)
            }
            None => {
                let fetcher = HttpSeriesFetcher::from_settings(&settings)?;
                info!("Using analysis API at {}", fetcher.base_url());
                Arc::new(fetcher)
            }
        };
        Ok(Self::with_fetcher(settings, fetcher))
    }

    pub fn with_fetcher(settings: LabSettings, fetcher: Arc<dyn SeriesFetcher>) -> Self {
        Self { settings, fetcher }
    }

    pub fn settings(&self) -> &LabSettings {
        &self.settings
    }

    pub fn fetcher(&self) -> Arc<dyn SeriesFetcher> {
        Arc::clone(&self.fetcher)
    }

    pub fn run_context(&self, stop: StopSignal) -> RunContext {
        RunContext::new(self.settings.clone(), self.fetcher(), stop)
    }
}

/// Mutable state of one run: the loaded store, status and best cell so far.
pub struct RunContext {
    pub settings: LabSettings,
    pub fetcher: Arc<dyn SeriesFetcher>,
    pub store: SeriesStore,
    pub status: OptimizerStatus,
    pub stop: StopSignal,
    pub best: Option<GridCell>,
}

impl RunContext {
    pub fn new(settings: LabSettings, fetcher: Arc<dyn SeriesFetcher>, stop: StopSignal) -> Self {
        Self {
            settings,
            fetcher,
            store: SeriesStore::new(),
            status: OptimizerStatus::new(),
            stop,
            best: None,
        }
    }

    /// Drop everything a previous run produced.
    pub fn reset(&mut self) {
        self.store = SeriesStore::new();
        self.status.reset();
        self.best = None;
    }
}
