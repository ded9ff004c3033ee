use crate::config::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::exit_rules::crosses_boundary;
use rand::Rng;
use statrs::distribution::Normal;

const TREND_MEAN: f64 = 1.5;
const TREND_STD_DEV: f64 = 3.0;
const VOLATILITY_MIN: f64 = 40.0;
const VOLATILITY_MAX: f64 = 80.0;
const DAILY_VOLATILITY_DIVISOR: f64 = 12.0;

const MOON_SHOT_GAIN: (f64, f64) = (200.0, 800.0);
const PUMP_GAIN: (f64, f64) = (50.0, 150.0);
const DUMP_LOSS: (f64, f64) = (30.0, 60.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpEvent {
    MoonShot,
    Pump,
    Dump,
}

/// Per-day probabilities of the mutually exclusive jump events.
///
/// A single uniform draw is classified against cumulative bands in priority
/// order (moon shot, pump, dump), so each event keeps its own probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpProbabilities {
    pub moon_shot: f64,
    pub pump: f64,
    pub dump: f64,
}

impl Default for JumpProbabilities {
    fn default() -> Self {
        Self {
            moon_shot: 0.08,
            pump: 0.05,
            dump: 0.12,
        }
    }
}

impl JumpProbabilities {
    pub fn classify(&self, draw: f64) -> Option<JumpEvent> {
        let moon_band = self.moon_shot;
        let pump_band = moon_band + self.pump;
        let dump_band = pump_band + self.dump;

        if draw < moon_band {
            Some(JumpEvent::MoonShot)
        } else if draw < pump_band {
            Some(JumpEvent::Pump)
        } else if draw < dump_band {
            Some(JumpEvent::Dump)
        } else {
            None
        }
    }
}

/// How one trade's path ended before exit rules are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathOutcome {
    /// Unclamped cumulative return in percent.
    pub raw_performance: f64,
    pub days_held: u32,
}

/// Day-by-day stochastic walk of a single position with jump events and
/// early termination on the stop-loss floor or the first take-profit ceiling.
#[derive(Debug, Clone)]
pub struct TradePathSimulator {
    max_holding_days: u32,
    stop_loss: f64,
    lowest_take_profit: Option<f64>,
    jumps: JumpProbabilities,
    trend: Normal,
}

impl TradePathSimulator {
    pub fn new(config: &BacktestConfig) -> Result<Self> {
        Self::with_parameters(
            config.max_holding_days,
            config.stop_loss_pct,
            config.lowest_take_profit(),
        )
    }

    pub fn with_parameters(
        max_holding_days: u32,
        stop_loss: f64,
        lowest_take_profit: Option<f64>,
    ) -> Result<Self> {
        let trend = Normal::new(TREND_MEAN, TREND_STD_DEV)
            .map_err(|err| BacktestError::simulation(format!("trend distribution: {}", err)))?;
        Ok(Self {
            max_holding_days: max_holding_days.max(1),
            stop_loss,
            lowest_take_profit,
            jumps: JumpProbabilities::default(),
            trend,
        })
    }

    pub fn with_jumps(mut self, jumps: JumpProbabilities) -> Self {
        self.jumps = jumps;
        self
    }

    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PathOutcome> {
        let mu = rng.sample(&self.trend);
        let sigma = rng.gen_range(VOLATILITY_MIN..VOLATILITY_MAX);
        let daily = Normal::new(mu, sigma / DAILY_VOLATILITY_DIVISOR)
            .map_err(|err| BacktestError::simulation(format!("daily distribution: {}", err)))?;

        let mut cumulative = 0.0;
        for day in 1..=self.max_holding_days {
            let mut delta = rng.sample(&daily);
            match self.jumps.classify(rng.gen::<f64>()) {
                Some(JumpEvent::MoonShot) => {
                    delta += rng.gen_range(MOON_SHOT_GAIN.0..MOON_SHOT_GAIN.1)
                }
                Some(JumpEvent::Pump) => delta += rng.gen_range(PUMP_GAIN.0..PUMP_GAIN.1),
                Some(JumpEvent::Dump) => delta -= rng.gen_range(DUMP_LOSS.0..DUMP_LOSS.1),
                None => {}
            }
            cumulative += delta;

            if !cumulative.is_finite() {
                return Err(BacktestError::simulation(format!(
                    "non-finite cumulative return on day {}",
                    day
                )));
            }
            if crosses_boundary(cumulative, self.stop_loss, self.lowest_take_profit) {
                return Ok(PathOutcome {
                    raw_performance: cumulative,
                    days_held: day,
                });
            }
        }

        Ok(PathOutcome {
            raw_performance: cumulative,
            days_held: self.max_holding_days,
        })
    }

    /// Walks an observed price series with the same early-exit rule, measuring
    /// the cumulative return against the first price. `None` when the series
    /// cannot be used.
    pub fn replay_series(&self, prices: &[f64]) -> Option<PathOutcome> {
        let (&entry, rest) = prices.split_first()?;
        if rest.is_empty() || !entry.is_finite() || entry <= 0.0 {
            return None;
        }

        let mut cumulative = 0.0;
        let mut days_held = 0;
        for (idx, price) in rest.iter().take(self.max_holding_days as usize).enumerate() {
            if !price.is_finite() {
                return None;
            }
            cumulative = (price - entry) / entry * 100.0;
            days_held = idx as u32 + 1;
            if crosses_boundary(cumulative, self.stop_loss, self.lowest_take_profit) {
                break;
            }
        }

        Some(PathOutcome {
            raw_performance: cumulative,
            days_held,
        })
    }
}
