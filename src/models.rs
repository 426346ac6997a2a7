use crate::error::SeriesError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Sentinel reported as the exit date of a position still open at series end.
pub const OPEN_EXIT_DATE: &str = "OPEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// LONG enters above the entry threshold, SHORT below the same value.
    pub fn should_enter(self, signal: f64, entry_threshold: f64) -> bool {
        match self {
            Direction::Long => signal > entry_threshold,
            Direction::Short => signal < entry_threshold,
        }
    }

    pub fn should_exit(self, signal: f64, exit_threshold: f64) -> bool {
        match self {
            Direction::Long => signal < exit_threshold,
            Direction::Short => signal > exit_threshold,
        }
    }

    /// Fractional move of `price` relative to `entry_price` in this direction's favour.
    pub fn return_ratio(self, entry_price: f64, price: f64) -> f64 {
        match self {
            Direction::Long => (price - entry_price) / entry_price,
            Direction::Short => (entry_price - price) / entry_price,
        }
    }

    pub fn pnl_percent(self, entry_price: f64, exit_price: f64) -> f64 {
        self.return_ratio(entry_price, exit_price) * 100.0
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeMode {
    Long,
    Short,
    Both,
}

impl TradeMode {
    /// Legs simulated for this mode, in evaluation order.
    pub fn legs(self) -> &'static [Direction] {
        match self {
            TradeMode::Long => &[Direction::Long],
            TradeMode::Short => &[Direction::Short],
            TradeMode::Both => &[Direction::Long, Direction::Short],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Long => "LONG",
            TradeMode::Short => "SHORT",
            TradeMode::Both => "BOTH",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExitDate {
    Closed(String),
    Open,
}

impl ExitDate {
    pub fn is_open(&self) -> bool {
        matches!(self, ExitDate::Open)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExitDate::Closed(date) => date,
            ExitDate::Open => OPEN_EXIT_DATE,
        }
    }
}

impl From<String> for ExitDate {
    fn from(value: String) -> Self {
        if value == OPEN_EXIT_DATE {
            ExitDate::Open
        } else {
            ExitDate::Closed(value)
        }
    }
}

impl From<ExitDate> for String {
    fn from(value: ExitDate) -> Self {
        match value {
            ExitDate::Closed(date) => date,
            ExitDate::Open => OPEN_EXIT_DATE.to_string(),
        }
    }
}

impl fmt::Display for ExitDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Index-aligned daily series for one instrument. Absent values mark gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSeries {
    pub dates: Vec<String>,
    pub prices: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
}

impl InstrumentSeries {
    pub fn new(dates: Vec<String>, prices: Vec<Option<f64>>, signal: Vec<Option<f64>>) -> Self {
        Self {
            dates,
            prices,
            signal,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn validate(&self) -> Result<(), SeriesError> {
        if self.dates.is_empty() || self.prices.is_empty() || self.signal.is_empty() {
            return Err(SeriesError::Empty);
        }
        if self.dates.len() != self.prices.len() || self.dates.len() != self.signal.len() {
            return Err(SeriesError::LengthMismatch {
                dates: self.dates.len(),
                prices: self.prices.len(),
                signal: self.signal.len(),
            });
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    /// Price and signal at `index`, or `None` when the day is a gap.
    pub fn observation(&self, index: usize) -> Option<(f64, f64)> {
        let price = usable_value(self.prices.get(index).copied().flatten())?;
        if price <= 0.0 {
            return None;
        }
        let signal = usable_value(self.signal.get(index).copied().flatten())?;
        Some((price, signal))
    }

    pub fn last_known_price(&self) -> Option<f64> {
        self.prices
            .iter()
            .rev()
            .filter_map(|price| usable_value(*price))
            .find(|price| *price > 0.0)
    }

    pub fn last_known_signal(&self) -> Option<f64> {
        self.signal.iter().rev().find_map(|value| usable_value(*value))
    }

    pub fn index_of_date(&self, date: &str) -> Option<usize> {
        self.dates.iter().position(|candidate| candidate == date)
    }
}

fn usable_value(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub entry_date: String,
    pub exit_date: ExitDate,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl_percent: f64,
    pub capital_after: f64,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.exit_date.is_open()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_return: f64,
    pub final_capital: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_trade: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<f64>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub outer_parameter: Option<f64>,
    pub entry: f64,
    pub exit: f64,
    pub entry_index: usize,
    pub exit_index: usize,
    pub avg_return: f64,
    pub avg_win_rate: f64,
    pub avg_trade_count: f64,
    pub positive_instrument_count: usize,
    pub total_instrument_count: usize,
}

/// Contiguous group of symbols dispatched as one fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub index: usize,
    pub symbols: Vec<String>,
}

impl BatchJob {
    pub fn label(&self) -> String {
        match self.symbols.as_slice() {
            [] => format!("batch {}", self.index),
            symbols if symbols.len() <= 3 => symbols.join(","),
            symbols => format!("{}..{}", symbols[0], symbols[symbols.len() - 1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(InstrumentSeries),
    Failure(String),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

pub type BatchOutcome = HashMap<String, FetchOutcome>;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    pub batch_label: String,
    pub done: usize,
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
}

impl LoadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }

    pub fn eta_label(&self) -> String {
        match self.eta {
            Some(eta) => format_eta(eta),
            None => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridProgress {
    pub outer_parameter: Option<f64>,
    pub rows_done: usize,
    pub rows_total: usize,
    pub entry: f64,
    pub instrument_count: usize,
}

pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_date_serializes_open_sentinel() {
        let open = serde_json::to_string(&ExitDate::Open).unwrap();
        assert_eq!(open, "\"OPEN\"");
        let closed: ExitDate = serde_json::from_str("\"2024-01-05\"").unwrap();
        assert_eq!(closed, ExitDate::Closed("2024-01-05".to_string()));
        let parsed: ExitDate = serde_json::from_str("\"OPEN\"").unwrap();
        assert!(parsed.is_open());
    }

    #[test]
    fn validate_reports_shape_problems() {
        let empty = InstrumentSeries::default();
        assert_eq!(empty.validate(), Err(SeriesError::Empty));

        let mismatched = InstrumentSeries::new(
            vec!["d1".into(), "d2".into()],
            vec![Some(1.0)],
            vec![Some(0.0), Some(0.0)],
        );
        assert_eq!(
            mismatched.validate(),
            Err(SeriesError::LengthMismatch {
                dates: 2,
                prices: 1,
                signal: 2
            })
        );
    }

    #[test]
    fn observation_skips_gaps_and_non_positive_prices() {
        let series = InstrumentSeries::new(
            vec!["d1".into(), "d2".into(), "d3".into(), "d4".into()],
            vec![Some(10.0), None, Some(0.0), Some(12.0)],
            vec![Some(1.0), Some(1.0), Some(1.0), None],
        );
        assert_eq!(series.observation(0), Some((10.0, 1.0)));
        assert_eq!(series.observation(1), None);
        assert_eq!(series.observation(2), None);
        assert_eq!(series.observation(3), None);
        assert_eq!(series.last_known_price(), Some(12.0));
        assert_eq!(series.last_known_signal(), Some(1.0));
    }

    #[test]
    fn batch_label_abbreviates_long_batches() {
        let short = BatchJob {
            index: 0,
            symbols: vec!["AAPL".into(), "MSFT".into()],
        };
        assert_eq!(short.label(), "AAPL,MSFT");
        let long = BatchJob {
            index: 1,
            symbols: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        };
        assert_eq!(long.label(), "A..D");
    }

    #[test]
    fn eta_is_formatted_in_minutes_and_seconds() {
        assert_eq!(format_eta(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_eta(Duration::from_millis(900)), "0m 0s");
    }

    #[test]
    fn short_direction_mirrors_comparisons_with_same_threshold() {
        assert!(Direction::Long.should_enter(0.5, 0.0));
        assert!(!Direction::Short.should_enter(0.5, 0.0));
        assert!(Direction::Short.should_enter(-0.5, 0.0));
        assert!(Direction::Short.should_exit(0.5, 0.0));
        assert!(Direction::Long.should_exit(-0.5, 0.0));
        assert!((Direction::Short.pnl_percent(10.0, 8.0) - 20.0).abs() < 1e-12);
    }
}
