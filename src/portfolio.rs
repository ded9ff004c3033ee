use crate::config::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::exit_rules::resolve;
use crate::market_data::PriceSeriesSource;
use crate::models::{DataSource, MonthlyStats, TradeRecord};
use crate::simulator::{PathOutcome, TradePathSimulator};
use chrono::Datelike;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use std::ops::RangeInclusive;

/// Instruments the synthetic trades are labelled with.
pub const INSTRUMENTS: [&str; 12] = [
    "DOGECOIN",
    "SHIBA-INU",
    "PEPE",
    "FLOKI",
    "BONK",
    "WOJAK",
    "MOG-COIN",
    "BRETT-BASED",
    "BOOK-OF-MEME",
    "DOGWIFCOIN",
    "CAT-IN-A-DOGS-WORLD",
    "MEMECOIN-2",
];

const TRADES_PER_MONTH: RangeInclusive<usize> = 8..=15;
const LAST_TRADE_DAY: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeExecution {
    pub position_usd: f64,
    pub pnl: f64,
    pub new_capital: f64,
}

/// Applies one realized return to the capital. The position is sized against
/// the capital as it stands before this trade, so trades compound in order.
pub fn execute_trade(
    current_capital: f64,
    final_return: f64,
    position_size_pct: f64,
    fee: f64,
) -> TradeExecution {
    let position_usd = current_capital * position_size_pct / 100.0;
    let pnl = position_usd * final_return / 100.0 - fee;
    TradeExecution {
        position_usd,
        pnl,
        new_capital: current_capital + pnl,
    }
}

#[derive(Debug, Clone)]
pub struct MonthOutcome {
    pub stats: MonthlyStats,
    pub trades: Vec<TradeRecord>,
}

impl MonthOutcome {
    pub fn ending_capital(&self) -> f64 {
        self.stats.ending_capital
    }
}

pub struct PortfolioAccountant<'a> {
    config: &'a BacktestConfig,
    simulator: TradePathSimulator,
    price_source: Option<&'a dyn PriceSeriesSource>,
    real_data_fraction: f64,
}

impl<'a> PortfolioAccountant<'a> {
    pub fn new(config: &'a BacktestConfig) -> Result<Self> {
        Ok(Self {
            config,
            simulator: TradePathSimulator::new(config)?,
            price_source: None,
            real_data_fraction: 0.0,
        })
    }

    pub fn with_price_source(
        mut self,
        source: &'a dyn PriceSeriesSource,
        real_data_fraction: f64,
    ) -> Self {
        self.price_source = Some(source);
        self.real_data_fraction = real_data_fraction.clamp(0.0, 1.0);
        self
    }

    /// Simulates one month of sequential trades starting from
    /// `starting_capital`. `month_index` is 1-based.
    pub fn simulate_month<R: Rng + ?Sized>(
        &self,
        month_index: u32,
        starting_capital: f64,
        rng: &mut R,
    ) -> Result<MonthOutcome> {
        let trade_count = rng.gen_range(TRADES_PER_MONTH);
        let mut trades = Vec::with_capacity(trade_count);
        let mut capital = starting_capital;
        let mut winning_trades = 0;
        let mut moon_shots = 0;
        let mut total_pnl = 0.0;
        let mut total_fees = 0.0;

        for _ in 0..trade_count {
            let (trade, new_capital) = self.simulate_trade(month_index, capital, rng)?;
            capital = new_capital;
            total_pnl += trade.pnl;
            total_fees += trade.fee;
            if trade.is_win() {
                winning_trades += 1;
            }
            if trade.is_moon_shot() {
                moon_shots += 1;
            }
            trades.push(trade);
        }

        let return_pct = if starting_capital != 0.0 {
            (capital - starting_capital) / starting_capital * 100.0
        } else {
            0.0
        };

        Ok(MonthOutcome {
            stats: MonthlyStats {
                month: month_index,
                starting_capital,
                ending_capital: capital,
                return_pct,
                trades_count: trades.len(),
                winning_trades,
                moon_shots,
                total_pnl,
                total_fees,
            },
            trades,
        })
    }

    fn simulate_trade<R: Rng + ?Sized>(
        &self,
        month_index: u32,
        capital: f64,
        rng: &mut R,
    ) -> Result<(TradeRecord, f64)> {
        let instrument = INSTRUMENTS.choose(rng).copied().unwrap_or(INSTRUMENTS[0]);
        let (path, data_source) = self.trade_path(instrument, rng)?;
        let decision = resolve(
            path.raw_performance,
            self.config.stop_loss_pct,
            &self.config.take_profits,
        );
        let execution = execute_trade(
            capital,
            decision.final_return,
            self.config.position_size_pct,
            self.config.fee,
        );
        if !execution.new_capital.is_finite() {
            return Err(BacktestError::simulation(format!(
                "capital became non-finite in month {} ({} on {})",
                month_index, decision.final_return, instrument
            )));
        }

        let month_start = self.config.month_date(month_index).ok_or_else(|| {
            BacktestError::simulation(format!("month {} is outside the calendar", month_index))
        })?;
        let day = rng.gen_range(1..=LAST_TRADE_DAY);
        let date = month_start.with_day(day).unwrap_or(month_start);

        let trade = TradeRecord {
            month: month_index,
            instrument: instrument.to_string(),
            return_pct: decision.final_return,
            pnl: execution.pnl,
            position_usd: execution.position_usd,
            fee: self.config.fee,
            exit_reason: decision.reason,
            holding_days: path.days_held,
            date,
            data_source,
        };
        Ok((trade, execution.new_capital))
    }

    fn trade_path<R: Rng + ?Sized>(
        &self,
        instrument: &str,
        rng: &mut R,
    ) -> Result<(PathOutcome, DataSource)> {
        if let Some(source) = self.price_source {
            if self.real_data_fraction > 0.0 && rng.gen_bool(self.real_data_fraction) {
                let replayed = source
                    .price_series(instrument, self.config.max_holding_days)
                    .and_then(|prices| self.simulator.replay_series(&prices));
                match replayed {
                    Some(path) => return Ok((path, DataSource::Market)),
                    None => debug!(
                        "No usable price series for {}; falling back to simulation",
                        instrument
                    ),
                }
            }
        }

        Ok((self.simulator.simulate(rng)?, DataSource::Simulated))
    }
}
