use crate::error::FetchError;
use crate::models::{BatchOutcome, FetchOutcome, InstrumentSeries};
use async_trait::async_trait;
use log::warn;

/// Parameters of one grouped request.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub symbols: &'a [String],
    pub signal_parameter: f64,
    pub start_date: &'a str,
    pub max_workers: usize,
}

/// Source of instrument series.
///
/// `fetch_batch` reports per-symbol outcomes; an `Err` means the whole request
/// failed and no symbol of the batch received an answer.
#[async_trait]
pub trait SeriesFetcher: Send + Sync {
    async fn fetch_single(
        &self,
        symbol: &str,
        signal_parameter: f64,
        start_date: &str,
    ) -> Result<InstrumentSeries, FetchError>;

    /// Defaults to one `fetch_single` call per symbol, for backends without batch support.
    async fn fetch_batch(&self, request: BatchRequest<'_>) -> Result<BatchOutcome, FetchError> {
        fetch_each(self, request).await
    }
}

pub async fn fetch_each<F>(fetcher: &F, request: BatchRequest<'_>) -> Result<BatchOutcome, FetchError>
where
    F: SeriesFetcher + ?Sized,
{
    let mut outcome = BatchOutcome::with_capacity(request.symbols.len());
    let mut transport_failures = 0;
    let mut last_transport_error = None;

    for symbol in request.symbols {
        match fetcher
            .fetch_single(symbol, request.signal_parameter, request.start_date)
            .await
        {
            Ok(series) => {
                outcome.insert(symbol.clone(), FetchOutcome::Success(series));
            }
            Err(err) => {
                warn!("Fetch failed for {}: {}", symbol, err);
                outcome.insert(symbol.clone(), FetchOutcome::Failure(err.to_string()));
                if err.is_transport() {
                    transport_failures += 1;
                    last_transport_error = Some(err);
                }
            }
        }
    }

    // Every symbol failing in transport means the backend itself is down.
    if !request.symbols.is_empty() && transport_failures == request.symbols.len() {
        if let Some(err) = last_transport_error {
            return Err(err);
        }
    }

    Ok(outcome)
}
