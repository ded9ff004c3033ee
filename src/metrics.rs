use crate::models::{PerformanceMetrics, Summary, TradeRecord, MEGA_GAIN_THRESHOLD};
use statrs::statistics::Statistics;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Summary statistics over a finished run. `capital_curve` starts with
    /// the initial capital and holds one entry per simulated month after it.
    pub fn calculate_performance(
        initial_capital: f64,
        capital_curve: &[f64],
        monthly_returns: &[f64],
        trades: &[TradeRecord],
    ) -> PerformanceMetrics {
        let final_capital = capital_curve.last().copied().unwrap_or(initial_capital);
        let total_return = Self::total_return(initial_capital, final_capital);

        let returns: Vec<f64> = trades.iter().map(|trade| trade.return_pct).collect();
        let gains: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r <= 0.0).collect();
        let total_trades = returns.len();
        let winning_trades = gains.len();
        let losing_trades = losses.len();

        let win_rate = Self::rate(winning_trades, total_trades);
        let avg_gain = Self::average(&gains);
        let avg_loss = Self::average(&losses);

        let moon_shot_count = trades.iter().filter(|trade| trade.is_moon_shot()).count();
        let mega_gain_count = returns
            .iter()
            .filter(|r| **r >= MEGA_GAIN_THRESHOLD)
            .count();

        let best_trade = if returns.is_empty() {
            0.0
        } else {
            returns.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        };
        let worst_trade = if returns.is_empty() {
            0.0
        } else {
            returns.iter().copied().fold(f64::INFINITY, f64::min)
        };

        let volatility = Self::volatility(monthly_returns);
        let avg_monthly_return = Self::average(monthly_returns);
        let sharpe_like_ratio = if volatility > 0.0 {
            avg_monthly_return / volatility
        } else {
            0.0
        };

        let profit_factor = if losing_trades > 0 && avg_loss != 0.0 {
            (avg_gain * winning_trades as f64) / (avg_loss.abs() * losing_trades as f64)
        } else {
            0.0
        };

        let total_fees: f64 = trades.iter().map(|trade| trade.fee).sum();
        let avg_fee_per_trade = if total_trades > 0 {
            total_fees / total_trades as f64
        } else {
            0.0
        };

        PerformanceMetrics {
            total_return,
            win_rate,
            total_trades,
            winning_trades,
            losing_trades,
            avg_gain,
            avg_loss,
            best_trade,
            worst_trade,
            moon_shot_count,
            moon_shot_rate: Self::rate(moon_shot_count, total_trades),
            mega_gain_count,
            mega_gain_rate: Self::rate(mega_gain_count, total_trades),
            volatility,
            max_drawdown: Self::calculate_max_drawdown(capital_curve),
            sharpe_like_ratio,
            profit_factor,
            avg_monthly_return,
            roi_ratio: if initial_capital > 0.0 {
                final_capital / initial_capital
            } else {
                0.0
            },
            total_fees,
            avg_fee_per_trade,
        }
    }

    pub fn summarize(
        initial_capital: f64,
        final_capital: f64,
        metrics: &PerformanceMetrics,
    ) -> Summary {
        Summary {
            initial_capital,
            final_capital,
            total_return: metrics.total_return,
            total_pnl: final_capital - initial_capital,
            total_trades: metrics.total_trades,
            win_rate: metrics.win_rate,
            moon_shots: metrics.moon_shot_count,
            total_fees: metrics.total_fees,
        }
    }

    pub fn total_return(initial_capital: f64, final_capital: f64) -> f64 {
        if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        }
    }

    /// Percentage of `count` in `total`, 0 when there is nothing to count.
    pub fn rate(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64 * 100.0
        }
    }

    /// Largest peak-to-trough decline of the curve, in percent.
    pub fn calculate_max_drawdown(capital_curve: &[f64]) -> f64 {
        let Some(&first) = capital_curve.first() else {
            return 0.0;
        };

        let mut max_drawdown_percent: f64 = 0.0;
        let mut peak_value = first;
        for &value in capital_curve {
            if value > peak_value {
                peak_value = value;
            } else if peak_value > 0.0 {
                let drawdown_percent = (peak_value - value) / peak_value * 100.0;
                max_drawdown_percent = max_drawdown_percent.max(drawdown_percent);
            }
        }

        max_drawdown_percent
    }

    fn volatility(monthly_returns: &[f64]) -> f64 {
        if monthly_returns.is_empty() {
            return 0.0;
        }
        let std_dev = monthly_returns.population_std_dev();
        if std_dev.is_finite() {
            std_dev
        } else {
            0.0
        }
    }

    fn average(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.mean()
        }
    }
}
