use crate::backtester::AnalysisReport;
use crate::data_context::SeriesStore;
use crate::models::Direction;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySignal {
    pub symbol: String,
    pub direction: Direction,
    pub date: String,
    pub days_ago: i64,
    pub price: f64,
    pub current_price: f64,
    pub signal: f64,
    pub price_change_since: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePosition {
    pub symbol: String,
    pub direction: Direction,
    pub entry_date: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl_percent: f64,
    pub signal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalScan {
    pub as_of: String,
    pub lookback_days: i64,
    /// Strongest signal first.
    pub entries_today: Vec<EntrySignal>,
    /// Most recent first.
    pub entries_recent: Vec<EntrySignal>,
    /// Best unrealised P/L first.
    pub active: Vec<ActivePosition>,
}

impl SignalScan {
    pub fn is_empty(&self) -> bool {
        self.entries_today.is_empty() && self.entries_recent.is_empty() && self.active.is_empty()
    }

    pub fn average_active_pnl(&self) -> Option<f64> {
        if self.active.is_empty() {
            return None;
        }
        let total: f64 = self.active.iter().map(|position| position.pnl_percent).sum();
        Some(total / self.active.len() as f64)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Entries triggered within `lookback_days` of `as_of` and positions still
/// open at the end of each instrument's series.
pub fn scan(
    report: &AnalysisReport,
    store: &SeriesStore,
    as_of: NaiveDate,
    lookback_days: i64,
) -> SignalScan {
    let mut entries_today = Vec::new();
    let mut entries_recent = Vec::new();
    let mut active = Vec::new();

    for run in &report.runs {
        let Some(series) = store.get(&run.symbol) else {
            continue;
        };
        let Some(current_price) = series.last_known_price() else {
            continue;
        };

        for trade in &run.result.trades {
            let Some(entry_day) = parse_date(&trade.entry_date) else {
                continue;
            };
            let days_ago = (as_of - entry_day).num_days();
            if !(0..=lookback_days).contains(&days_ago) {
                continue;
            }
            let signal = series
                .index_of_date(&trade.entry_date)
                .and_then(|index| series.signal.get(index).copied().flatten())
                .unwrap_or(0.0);
            let entry = EntrySignal {
                symbol: run.symbol.clone(),
                direction: trade.direction,
                date: trade.entry_date.clone(),
                days_ago,
                price: trade.entry_price,
                current_price,
                signal,
                price_change_since: (current_price - trade.entry_price) / trade.entry_price * 100.0,
            };
            if days_ago == 0 {
                entries_today.push(entry);
            } else {
                entries_recent.push(entry);
            }
        }

        for trade in run.result.trades.iter().filter(|trade| trade.is_open()) {
            active.push(ActivePosition {
                symbol: run.symbol.clone(),
                direction: trade.direction,
                entry_date: trade.entry_date.clone(),
                entry_price: trade.entry_price,
                current_price,
                pnl_percent: trade.direction.pnl_percent(trade.entry_price, current_price),
                signal: series.last_known_signal(),
            });
        }
    }

    entries_today.sort_by(|a, b| {
        b.signal
            .abs()
            .partial_cmp(&a.signal.abs())
            .unwrap_or(Ordering::Equal)
    });
    entries_recent.sort_by_key(|entry| entry.days_ago);
    active.sort_by(|a, b| {
        b.pnl_percent
            .partial_cmp(&a.pnl_percent)
            .unwrap_or(Ordering::Equal)
    });

    SignalScan {
        as_of: as_of.format("%Y-%m-%d").to_string(),
        lookback_days,
        entries_today,
        entries_recent,
        active,
    }
}
