use crate::models::{FetchOutcome, InstrumentSeries};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-run store of fetched series plus the failures recorded while loading.
///
/// A new store is created for every load; nothing is carried across runs.
#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    series: HashMap<String, InstrumentSeries>,
    failures: BTreeMap<String, String>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one symbol's outcome. Last write wins for a repeated symbol.
    pub fn merge(&mut self, symbol: String, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Success(series) => {
                self.failures.remove(&symbol);
                self.series.insert(symbol, series);
            }
            FetchOutcome::Failure(reason) => {
                self.series.remove(&symbol);
                self.failures.insert(symbol, reason);
            }
        }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, series: InstrumentSeries) {
        self.merge(symbol.into(), FetchOutcome::Success(series));
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentSeries> {
        self.series.get(symbol)
    }

    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    pub fn loaded_count(&self) -> usize {
        self.series.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn has_data(&self) -> bool {
        !self.series.is_empty()
    }

    /// Symbols of `universe`, in universe order, whose series can be simulated.
    pub fn usable_symbols<'a>(&self, universe: &'a [String]) -> Vec<&'a str> {
        universe
            .iter()
            .filter(|symbol| {
                self.series
                    .get(symbol.as_str())
                    .map(InstrumentSeries::is_well_formed)
                    .unwrap_or(false)
            })
            .map(String::as_str)
            .collect()
    }
}

/// Upper-case, trim and de-duplicate a ticker list, keeping first occurrences in order.
pub fn normalize_universe<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut universe = Vec::new();
    for entry in raw {
        for part in entry.as_ref().split(',') {
            let symbol = part.trim().to_uppercase();
            if symbol.is_empty() {
                continue;
            }
            if seen.insert(symbol.clone()) {
                universe.push(symbol);
            }
        }
    }
    universe
}
