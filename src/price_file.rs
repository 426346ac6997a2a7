use crate::error::FetchError;
use crate::fetcher::SeriesFetcher;
use crate::indicators::stable_slope;
use crate::models::InstrumentSeries;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct PriceHistory {
    dates: Vec<String>,
    prices: Vec<Option<f64>>,
}

/// Offline fetcher backed by a JSON file of daily prices:
/// `{ "SYM": { "dates": [...], "prices": [...] } }`.
///
/// The signal is computed locally for each requested parameter.
pub struct PriceFileFetcher {
    histories: HashMap<String, PriceHistory>,
}

impl PriceFileFetcher {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read price file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("failed to parse price file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, PriceHistory> = serde_json::from_str(raw)?;
        let histories = parsed
            .into_iter()
            .map(|(symbol, history)| (symbol.trim().to_uppercase(), history))
            .collect();
        Ok(Self { histories })
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.histories.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn build_series(
        &self,
        symbol: &str,
        signal_parameter: f64,
        start_date: &str,
    ) -> Result<InstrumentSeries, FetchError> {
        let history = self
            .histories
            .get(&symbol.to_uppercase())
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string()))?;
        if history.dates.len() != history.prices.len() {
            return Err(FetchError::Payload(format!(
                "{} has {} dates but {} prices",
                symbol,
                history.dates.len(),
                history.prices.len()
            )));
        }

        let (dates, prices): (Vec<String>, Vec<Option<f64>>) = history
            .dates
            .iter()
            .zip(history.prices.iter())
            .filter(|(date, _)| date.as_str() >= start_date)
            .map(|(date, price)| (date.clone(), *price))
            .unzip();
        if dates.is_empty() {
            return Err(FetchError::Payload(format!(
                "no data for {} since {}",
                symbol, start_date
            )));
        }

        let signal = stable_slope(&prices, signal_parameter);
        Ok(InstrumentSeries::new(dates, prices, signal))
    }
}

#[async_trait]
impl SeriesFetcher for PriceFileFetcher {
    async fn fetch_single(
        &self,
        symbol: &str,
        signal_parameter: f64,
        start_date: &str,
    ) -> Result<InstrumentSeries, FetchError> {
        self.build_series(symbol, signal_parameter, start_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::BatchRequest;
    use crate::models::FetchOutcome;

    const PRICES: &str = r#"{
        "aaa": {
            "dates": ["2022-12-30", "2023-01-03", "2023-01-04", "2023-01-05"],
            "prices": [99.0, 100.0, null, 102.0]
        },
        "BAD": { "dates": ["2023-01-03"], "prices": [] }
    }"#;

    #[tokio::test]
    async fn filters_by_start_date_and_computes_signal() {
        let fetcher = PriceFileFetcher::from_json(PRICES).unwrap();
        let series = fetcher.fetch_single("AAA", 200.0, "2023-01-01").await.unwrap();
        assert_eq!(series.dates, vec!["2023-01-03", "2023-01-04", "2023-01-05"]);
        assert_eq!(series.prices, vec![Some(100.0), None, Some(102.0)]);
        assert_eq!(series.signal.len(), 3);
        assert!(series.signal[1].is_none());
        assert!(series.is_well_formed());
    }

    #[tokio::test]
    async fn batch_reports_each_symbol() {
        let fetcher = PriceFileFetcher::from_json(PRICES).unwrap();
        let symbols = vec!["AAA".to_string(), "BAD".to_string(), "ZZZ".to_string()];
        let outcome = fetcher
            .fetch_batch(BatchRequest {
                symbols: &symbols,
                signal_parameter: 100.0,
                start_date: "2023-01-01",
                max_workers: 1,
            })
            .await
            .unwrap();
        assert!(outcome["AAA"].is_success());
        assert!(matches!(&outcome["BAD"], FetchOutcome::Failure(msg) if msg.contains("1 dates but 0 prices")));
        assert_eq!(
            outcome["ZZZ"],
            FetchOutcome::Failure("unknown symbol ZZZ".to_string())
        );
    }
}
