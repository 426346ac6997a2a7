use crate::models::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// Reported instead of infinity when there are winning trades and no losers.
pub const PROFIT_FACTOR_CAP: f64 = 999.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Reduce one run into its metrics. Open trades count toward the return
    /// (through the last trade's capital) but not toward trade statistics.
    pub fn calculate_performance(
        trades: &[Trade],
        realized_capital: f64,
        initial_capital: f64,
        max_drawdown: f64,
    ) -> RunStats {
        let closed_pnls: Vec<f64> = trades
            .iter()
            .filter(|trade| !trade.is_open())
            .map(|trade| trade.pnl_percent)
            .collect();
        let total_trades = closed_pnls.len();

        let mut winning_sum = 0.0;
        let mut losing_sum = 0.0;
        let mut winning_trades = 0;
        for pnl in closed_pnls.iter().copied() {
            if pnl > 0.0 {
                winning_trades += 1;
                winning_sum += pnl;
            } else {
                losing_sum += pnl;
            }
        }
        let losing_trades = total_trades - winning_trades;
        let losing_sum = losing_sum.abs();

        let final_capital = trades
            .last()
            .map(|trade| trade.capital_after)
            .unwrap_or(realized_capital);
        let total_return = if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };

        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let avg_trade = if closed_pnls.is_empty() {
            0.0
        } else {
            closed_pnls.iter().mean()
        };

        let profit_factor = if losing_sum > 0.0 {
            winning_sum / losing_sum
        } else if winning_sum > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        RunStats {
            total_return,
            final_capital,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            avg_trade,
            max_drawdown,
            profit_factor,
        }
    }
}

/// Cross-instrument view of a single-parameter run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseSummary {
    pub instrument_count: usize,
    pub avg_return: f64,
    pub avg_win_rate: f64,
    pub total_trades: usize,
    pub avg_max_drawdown: f64,
    pub positive_instruments: usize,
}

impl UniverseSummary {
    pub fn from_stats<'a, I>(stats: I) -> Self
    where
        I: IntoIterator<Item = &'a RunStats>,
    {
        let stats: Vec<&RunStats> = stats.into_iter().collect();
        if stats.is_empty() {
            return Self::default();
        }

        Self {
            instrument_count: stats.len(),
            avg_return: stats.iter().map(|s| s.total_return).mean(),
            avg_win_rate: stats.iter().map(|s| s.win_rate).mean(),
            total_trades: stats.iter().map(|s| s.total_trades).sum(),
            avg_max_drawdown: stats.iter().map(|s| s.max_drawdown).mean(),
            positive_instruments: stats.iter().filter(|s| s.total_return > 0.0).count(),
        }
    }
}

/// Sort `(symbol, stats)` pairs by total return, best first. Ties keep input order.
pub fn rank_by_total_return<T>(entries: &mut [(T, &RunStats)]) {
    entries.sort_by(|a, b| {
        b.1.total_return
            .partial_cmp(&a.1.total_return)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(pnl_percent: f64, open: bool, capital_after: f64) -> Trade {
        Trade {
            entry_date: "2024-01-01".to_string(),
            exit_date: if open {
                ExitDate::Open
            } else {
                ExitDate::Closed("2024-01-10".to_string())
            },
            direction: Direction::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl_percent,
            pnl_percent,
            capital_after,
        }
    }

    #[test]
    fn no_trades_yield_zero_metrics() {
        let stats = PerformanceCalculator::calculate_performance(&[], 1000.0, 1000.0, 0.0);
        assert_eq!(stats.total_return, 0.0);
        assert_eq!(stats.final_capital, 1000.0);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.avg_trade, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
    }

    #[test]
    fn only_winners_report_capped_profit_factor() {
        let trades = vec![trade(10.0, false, 1100.0), trade(5.0, false, 1155.0)];
        let stats = PerformanceCalculator::calculate_performance(&trades, 1155.0, 1000.0, 0.0);
        assert_eq!(stats.profit_factor, PROFIT_FACTOR_CAP);
        assert!(stats.profit_factor.is_finite());
        assert_eq!(stats.win_rate, 100.0);
        assert!((stats.avg_trade - 7.5).abs() < 1e-12);
        assert!((stats.total_return - 15.5).abs() < 1e-9);
    }

    #[test]
    fn break_even_trades_count_as_losses() {
        let trades = vec![
            trade(12.0, false, 1120.0),
            trade(0.0, false, 1120.0),
            trade(-4.0, false, 1075.2),
        ];
        let stats = PerformanceCalculator::calculate_performance(&trades, 1075.2, 1000.0, 6.0);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 2);
        assert!((stats.win_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!((stats.profit_factor - 3.0).abs() < 1e-12);
        assert!((stats.avg_trade - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.max_drawdown, 6.0);
    }

    #[test]
    fn open_trade_counts_toward_return_only() {
        let trades = vec![trade(-10.0, false, 900.0), trade(20.0, true, 1080.0)];
        let stats = PerformanceCalculator::calculate_performance(&trades, 900.0, 1000.0, 10.0);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.win_rate, 0.0);
        assert!((stats.final_capital - 1080.0).abs() < 1e-12);
        assert!((stats.total_return - 8.0).abs() < 1e-9);
        assert_eq!(stats.profit_factor, 0.0);
    }

    #[test]
    fn universe_summary_averages_per_instrument_stats() {
        let a = RunStats {
            total_return: 10.0,
            win_rate: 50.0,
            total_trades: 4,
            max_drawdown: 5.0,
            ..RunStats::default()
        };
        let b = RunStats {
            total_return: -4.0,
            win_rate: 25.0,
            total_trades: 2,
            max_drawdown: 9.0,
            ..RunStats::default()
        };
        let summary = UniverseSummary::from_stats([&a, &b]);
        assert_eq!(summary.instrument_count, 2);
        assert!((summary.avg_return - 3.0).abs() < 1e-12);
        assert!((summary.avg_win_rate - 37.5).abs() < 1e-12);
        assert_eq!(summary.total_trades, 6);
        assert!((summary.avg_max_drawdown - 7.0).abs() < 1e-12);
        assert_eq!(summary.positive_instruments, 1);
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let low = RunStats {
            total_return: 1.0,
            ..RunStats::default()
        };
        let high = RunStats {
            total_return: 5.0,
            ..RunStats::default()
        };
        let tie = RunStats {
            total_return: 1.0,
            ..RunStats::default()
        };
        let mut entries = vec![("A", &low), ("B", &high), ("C", &tie)];
        rank_by_total_return(&mut entries);
        let order: Vec<_> = entries.iter().map(|(symbol, _)| *symbol).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }
}
