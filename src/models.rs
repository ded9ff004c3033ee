use crate::config::BacktestConfig;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque handle of one backtest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveMetrics {
    pub capital: f64,
    pub total_return: f64,
    pub total_trades: usize,
    pub win_rate: f64,
    pub moon_shots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub progress: f64,
    pub message: String,
    pub current_month: u32,
    pub total_months: u32,
    pub live_metrics: LiveMetrics,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId, total_months: u32, initial_capital: f64) -> Self {
        Self {
            id,
            state: JobState::Running,
            progress: 0.0,
            message: "Initializing backtest".to_string(),
            current_month: 0,
            total_months,
            live_metrics: LiveMetrics {
                capital: initial_capital,
                ..Default::default()
            },
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Moves a running record into `state`. Terminal records are left untouched
    /// and `false` is returned, so `completed_at` is stamped exactly once.
    pub fn finish<S: Into<String>>(&mut self, state: JobState, message: S) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.message = message.into();
        self.completed_at = Some(Utc::now());
        if state == JobState::Completed {
            self.progress = 100.0;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    /// 1-based rank of the take-profit tier in ascending order.
    TakeProfit(usize),
    TimeExit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => f.write_str("STOP_LOSS"),
            ExitReason::TakeProfit(rank) => write!(f, "TP{}", rank),
            ExitReason::TimeExit => f.write_str("TIME_EXIT"),
        }
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "STOP_LOSS" => Ok(ExitReason::StopLoss),
            "TIME_EXIT" => Ok(ExitReason::TimeExit),
            other => other
                .strip_prefix("TP")
                .and_then(|rank| rank.parse::<usize>().ok())
                .filter(|rank| *rank >= 1)
                .map(ExitReason::TakeProfit)
                .ok_or_else(|| format!("unknown exit reason {}", other)),
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExitReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Simulated,
    Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub month: u32,
    pub instrument: String,
    #[serde(rename = "return")]
    pub return_pct: f64,
    pub pnl: f64,
    pub position_usd: f64,
    pub fee: f64,
    pub exit_reason: ExitReason,
    pub holding_days: u32,
    pub date: NaiveDate,
    pub data_source: DataSource,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.return_pct > 0.0
    }

    pub fn is_moon_shot(&self) -> bool {
        self.return_pct >= MOON_SHOT_THRESHOLD
    }
}

/// Realized return (percent) at or above which a trade counts as a moon shot.
pub const MOON_SHOT_THRESHOLD: f64 = 100.0;
/// Realized return (percent) at or above which a trade counts as a mega gain.
pub const MEGA_GAIN_THRESHOLD: f64 = 500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub month: u32,
    pub starting_capital: f64,
    pub ending_capital: f64,
    pub return_pct: f64,
    pub trades_count: usize,
    pub winning_trades: usize,
    pub moon_shots: usize,
    pub total_pnl: f64,
    pub total_fees: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub total_pnl: f64,
    pub total_trades: usize,
    pub win_rate: f64,
    pub moon_shots: usize,
    pub total_fees: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub moon_shot_count: usize,
    pub moon_shot_rate: f64,
    pub mega_gain_count: usize,
    pub mega_gain_rate: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe_like_ratio: f64,
    pub profit_factor: f64,
    pub avg_monthly_return: f64,
    pub roi_ratio: f64,
    pub total_fees: f64,
    pub avg_fee_per_trade: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartsData {
    pub capital_evolution: Vec<f64>,
    pub monthly_returns: Vec<f64>,
    pub trade_returns: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: JobId,
    pub config: BacktestConfig,
    pub summary: Summary,
    pub capital_curve: Vec<f64>,
    pub monthly_stats: Vec<MonthlyStats>,
    pub trades: Vec<TradeRecord>,
    pub metrics: PerformanceMetrics,
    pub charts_data: ChartsData,
    pub completed_at: DateTime<Utc>,
}

/// One row of the completed-backtest history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: JobId,
    pub config: BacktestConfig,
    pub summary: Summary,
    pub completed_at: DateTime<Utc>,
}

impl From<&BacktestResult> for HistoryEntry {
    fn from(result: &BacktestResult) -> Self {
        Self {
            id: result.id,
            config: result.config.clone(),
            summary: result.summary.clone(),
            completed_at: result.completed_at,
        }
    }
}
