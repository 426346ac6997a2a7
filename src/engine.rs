use crate::models::*;
use crate::performance::PerformanceCalculator;

/// Notional starting capital. Only used to express returns as percentages.
pub const BASELINE_CAPITAL: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub entry: f64,
    pub exit: f64,
}

impl Thresholds {
    pub fn new(entry: f64, exit: f64) -> Self {
        Self { entry, exit }
    }
}

#[derive(Debug, Clone, Copy)]
enum LegState {
    Flat,
    InPosition { entry_price: f64, entry_index: usize },
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    direction: Direction,
    state: LegState,
}

impl Leg {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: LegState::Flat,
        }
    }

    fn unrealized_ratio(&self, price: f64) -> Option<f64> {
        match self.state {
            LegState::Flat => None,
            LegState::InPosition { entry_price, .. } => {
                Some(self.direction.return_ratio(entry_price, price))
            }
        }
    }
}

/// Everything the loop produces before stats are computed.
struct SimulationLoopResult {
    trades: Vec<Trade>,
    equity_curve: Vec<f64>,
    capital: f64,
    max_drawdown: f64,
}

/// Threshold-triggered position simulator for a single instrument.
///
/// Each direction in the mode is an independent leg that moves between FLAT and
/// IN_POSITION. All legs compound into one shared capital counter and one
/// marked-to-market equity curve.
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    pub thresholds: Thresholds,
    pub mode: TradeMode,
}

impl Engine {
    pub fn new(thresholds: Thresholds, mode: TradeMode) -> Self {
        Self { thresholds, mode }
    }

    /// Run the simulation. Malformed series (empty or misaligned) produce an
    /// empty result instead of an error so sweeps never abort on one instrument.
    pub fn backtest(&self, series: &InstrumentSeries) -> RunResult {
        if series.validate().is_err() {
            return Self::empty_result();
        }

        let run = self.run_loop(series);
        let stats = PerformanceCalculator::calculate_performance(
            &run.trades,
            run.capital,
            BASELINE_CAPITAL,
            run.max_drawdown,
        );

        RunResult {
            trades: run.trades,
            equity_curve: run.equity_curve,
            stats,
        }
    }

    pub fn empty_result() -> RunResult {
        RunResult {
            trades: Vec::new(),
            equity_curve: Vec::new(),
            stats: PerformanceCalculator::calculate_performance(
                &[],
                BASELINE_CAPITAL,
                BASELINE_CAPITAL,
                0.0,
            ),
        }
    }

    fn run_loop(&self, series: &InstrumentSeries) -> SimulationLoopResult {
        let Thresholds { entry, exit } = self.thresholds;
        let mut legs: Vec<Leg> = self.mode.legs().iter().copied().map(Leg::new).collect();
        let mut capital = BASELINE_CAPITAL;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(series.len());
        let mut peak = BASELINE_CAPITAL;
        let mut max_drawdown = 0.0_f64;

        for i in 0..series.len() {
            let Some((price, signal)) = series.observation(i) else {
                let carried = equity_curve.last().copied().unwrap_or(0.0);
                equity_curve.push(carried);
                continue;
            };

            for leg in legs.iter_mut() {
                match leg.state {
                    LegState::Flat => {
                        if leg.direction.should_enter(signal, entry) {
                            leg.state = LegState::InPosition {
                                entry_price: price,
                                entry_index: i,
                            };
                        }
                    }
                    LegState::InPosition {
                        entry_price,
                        entry_index,
                    } => {
                        if leg.direction.should_exit(signal, exit) {
                            let pnl_percent = leg.direction.pnl_percent(entry_price, price);
                            capital *= 1.0 + pnl_percent / 100.0;
                            trades.push(Trade {
                                entry_date: series.dates[entry_index].clone(),
                                exit_date: ExitDate::Closed(series.dates[i].clone()),
                                direction: leg.direction,
                                entry_price,
                                exit_price: price,
                                pnl_percent,
                                capital_after: capital,
                            });
                            leg.state = LegState::Flat;
                        }
                    }
                }
            }

            let marked = legs
                .iter()
                .filter_map(|leg| leg.unrealized_ratio(price))
                .fold(capital, |value, ratio| value * (1.0 + ratio));
            equity_curve.push((marked - BASELINE_CAPITAL) / BASELINE_CAPITAL * 100.0);

            if marked > peak {
                peak = marked;
            }
            let drawdown = (peak - marked) / peak * 100.0;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        // Positions still open are valued at the last known price, not dropped.
        if let Some(last_price) = series.last_known_price() {
            for leg in &legs {
                if let LegState::InPosition {
                    entry_price,
                    entry_index,
                } = leg.state
                {
                    let pnl_percent = leg.direction.pnl_percent(entry_price, last_price);
                    trades.push(Trade {
                        entry_date: series.dates[entry_index].clone(),
                        exit_date: ExitDate::Open,
                        direction: leg.direction,
                        entry_price,
                        exit_price: last_price,
                        pnl_percent,
                        capital_after: capital * (1.0 + pnl_percent / 100.0),
                    });
                }
            }
        }

        SimulationLoopResult {
            trades,
            equity_curve,
            capital,
            max_drawdown,
        }
    }
}

/// Convenience wrapper around [`Engine::backtest`].
pub fn simulate(
    series: &InstrumentSeries,
    thresholds: Thresholds,
    mode: TradeMode,
) -> RunResult {
    Engine::new(thresholds, mode).backtest(series)
}
