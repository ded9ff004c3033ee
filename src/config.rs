use crate::error::{BacktestError, Result};
use anyhow::{anyhow, Context};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Longest simulated horizon, inclusive of both end months.
pub const MAX_BACKTEST_MONTHS: i64 = 36;

/// Upper bound of `BACKTEST_RETENTION_HOURS` (one year).
pub const MAX_RETENTION_HOURS: u64 = 24 * 365;

/// Parameters of one backtest run. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BacktestConfig {
    #[serde(alias = "initialCapital")]
    pub initial_capital: f64,
    #[serde(
        alias = "position_size",
        alias = "positionSize",
        alias = "positionSizePct"
    )]
    pub position_size_pct: f64,
    #[serde(alias = "stop_loss", alias = "stopLoss", alias = "stopLossPct")]
    pub stop_loss_pct: f64,
    /// Take-profit tiers in percent, strictly increasing.
    #[serde(alias = "takeProfits")]
    pub take_profits: Vec<f64>,
    #[serde(alias = "maxHoldingDays")]
    pub max_holding_days: u32,
    #[serde(alias = "startYear")]
    pub start_year: i32,
    #[serde(alias = "startMonth")]
    pub start_month: u32,
    #[serde(alias = "endYear")]
    pub end_year: i32,
    #[serde(alias = "endMonth")]
    pub end_month: u32,
    /// Flat fee charged per trade, in currency units.
    #[serde(alias = "trading_fee", alias = "tradingFee")]
    pub fee: f64,
    /// Fixes the random source so a run can be reproduced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            position_size_pct: 2.0,
            stop_loss_pct: -20.0,
            take_profits: vec![35.0, 80.0, 200.0, 500.0, 1200.0],
            max_holding_days: 8,
            start_year: 2023,
            start_month: 1,
            end_year: 2024,
            end_month: 12,
            fee: 40.0,
            seed: None,
        }
    }
}

impl BacktestConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read backtest config from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse backtest config from {}", path.display()))
    }

    /// Inclusive number of calendar months between start and end. Zero or
    /// negative when the end precedes the start.
    pub fn month_span(&self) -> i64 {
        (self.end_year as i64 - self.start_year as i64) * 12
            + (self.end_month as i64 - self.start_month as i64)
            + 1
    }

    pub fn month_count(&self) -> u32 {
        self.month_span().clamp(0, MAX_BACKTEST_MONTHS) as u32
    }

    /// First day of the calendar month that simulated month `month_index`
    /// (1-based) falls in.
    pub fn month_date(&self, month_index: u32) -> Option<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(self.start_year, self.start_month, 1)?;
        start.checked_add_months(Months::new(month_index.saturating_sub(1)))
    }

    pub fn lowest_take_profit(&self) -> Option<f64> {
        self.take_profits.first().copied()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::validation(format!(
                "initial_capital must be > 0 (value: {})",
                self.initial_capital
            )));
        }
        if !self.position_size_pct.is_finite()
            || self.position_size_pct <= 0.0
            || self.position_size_pct > 100.0
        {
            return Err(BacktestError::validation(format!(
                "position_size_pct must be in (0, 100] (value: {})",
                self.position_size_pct
            )));
        }
        if !self.stop_loss_pct.is_finite() || self.stop_loss_pct >= 0.0 {
            return Err(BacktestError::validation(format!(
                "stop_loss_pct must be < 0 (value: {})",
                self.stop_loss_pct
            )));
        }
        self.validate_take_profits()?;
        if self.max_holding_days < 1 {
            return Err(BacktestError::validation("max_holding_days must be >= 1"));
        }
        if !self.fee.is_finite() || self.fee < 0.0 {
            return Err(BacktestError::validation(format!(
                "fee must be >= 0 (value: {})",
                self.fee
            )));
        }
        self.validate_period()
    }

    fn validate_take_profits(&self) -> Result<()> {
        if self.take_profits.is_empty() {
            return Err(BacktestError::validation(
                "take_profits must contain at least one threshold",
            ));
        }
        for (idx, tp) in self.take_profits.iter().enumerate() {
            if !tp.is_finite() || *tp <= 0.0 {
                return Err(BacktestError::validation(format!(
                    "take_profits[{}] must be > 0 (value: {})",
                    idx, tp
                )));
            }
        }
        if self.take_profits.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(BacktestError::validation(format!(
                "take_profits must be strictly increasing (value: {:?})",
                self.take_profits
            )));
        }
        Ok(())
    }

    fn validate_period(&self) -> Result<()> {
        for (label, month) in [("start_month", self.start_month), ("end_month", self.end_month)] {
            if !(1..=12).contains(&month) {
                return Err(BacktestError::validation(format!(
                    "{} must be in 1..=12 (value: {})",
                    label, month
                )));
            }
        }
        let start = NaiveDate::from_ymd_opt(self.start_year, self.start_month, 1);
        let end = NaiveDate::from_ymd_opt(self.end_year, self.end_month, 1);
        let (Some(start), Some(end)) = (start, end) else {
            return Err(BacktestError::validation("start or end year is out of range"));
        };
        if end <= start {
            return Err(BacktestError::validation(format!(
                "end date {} must be after start date {}",
                end.format("%Y-%m"),
                start.format("%Y-%m")
            )));
        }
        let span = self.month_span();
        if span > MAX_BACKTEST_MONTHS {
            return Err(BacktestError::validation(format!(
                "period spans {} months (max {})",
                span, MAX_BACKTEST_MONTHS
            )));
        }
        Ok(())
    }
}

/// Parses a `YYYY-MM` month into `(year, month)`.
pub fn parse_year_month(raw: &str) -> anyhow::Result<(i32, u32)> {
    let trimmed = raw.trim();
    let date = NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d")
        .map_err(|_| anyhow!("month must be in YYYY-MM format (value: {})", trimmed))?;
    Ok((date.year(), date.month()))
}

/// Runtime knobs of the job orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Pause between simulated months; pacing only, results do not depend on it.
    pub month_pause: Duration,
    pub retention: Duration,
    pub sweep_interval: Duration,
    /// Share of trades that replay real price series when a source is attached.
    pub real_data_fraction: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            month_pause: Duration::from_millis(200),
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(600),
            real_data_fraction: 0.3,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let month_pause_ms = setting_u64(
            settings,
            "BACKTEST_MONTH_PAUSE_MS",
            defaults.month_pause.as_millis() as u64,
            0,
            None,
        )?;
        let retention_hours = setting_u64(
            settings,
            "BACKTEST_RETENTION_HOURS",
            defaults.retention.as_secs() / 3600,
            1,
            Some(MAX_RETENTION_HOURS),
        )?;
        let sweep_interval_secs = setting_u64(
            settings,
            "BACKTEST_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
            1,
            None,
        )?;
        let real_data_fraction = setting_f64(
            settings,
            "BACKTEST_REAL_DATA_FRACTION",
            defaults.real_data_fraction,
            Some(0.0),
            Some(1.0),
        )?;

        let retention_secs = retention_hours.checked_mul(3600).ok_or_else(|| {
            anyhow!(
                "Setting BACKTEST_RETENTION_HOURS is too large (value: {})",
                retention_hours
            )
        })?;

        Ok(Self {
            month_pause: Duration::from_millis(month_pause_ms),
            retention: Duration::from_secs(retention_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            real_data_fraction,
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> anyhow::Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_u64(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
    max: Option<u64>,
) -> anyhow::Result<u64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_period(start: (i32, u32), end: (i32, u32)) -> BacktestConfig {
        BacktestConfig {
            start_year: start.0,
            start_month: start.1,
            end_year: end.0,
            end_month: end.1,
            ..Default::default()
        }
    }

    fn assert_validation_error(config: &BacktestConfig) {
        match config.validate() {
            Err(BacktestError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = BacktestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.month_count(), 24);
    }

    #[test]
    fn rejects_end_not_after_start() {
        assert_validation_error(&config_with_period((2023, 5), (2023, 5)));
        assert_validation_error(&config_with_period((2023, 5), (2023, 4)));
        assert_validation_error(&config_with_period((2024, 1), (2023, 12)));
    }

    #[test]
    fn enforces_thirty_six_month_cap() {
        let at_cap = config_with_period((2022, 1), (2024, 12));
        assert_eq!(at_cap.month_span(), 36);
        assert!(at_cap.validate().is_ok());

        assert_validation_error(&config_with_period((2022, 1), (2025, 1)));
    }

    #[test]
    fn rejects_invalid_months() {
        assert_validation_error(&config_with_period((2023, 0), (2023, 6)));
        assert_validation_error(&config_with_period((2023, 1), (2023, 13)));
    }

    #[test]
    fn rejects_bad_take_profits() {
        let mut config = BacktestConfig::default();
        config.take_profits = vec![];
        assert_validation_error(&config);

        config.take_profits = vec![35.0, 35.0, 80.0];
        assert_validation_error(&config);

        config.take_profits = vec![80.0, 35.0];
        assert_validation_error(&config);

        config.take_profits = vec![-5.0, 35.0];
        assert_validation_error(&config);
    }

    #[test]
    fn rejects_out_of_range_scalars() {
        let base = BacktestConfig::default();

        assert_validation_error(&BacktestConfig {
            initial_capital: 0.0,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            position_size_pct: 0.0,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            position_size_pct: 100.5,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            stop_loss_pct: 0.0,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            max_holding_days: 0,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            fee: -1.0,
            ..base.clone()
        });
        assert_validation_error(&BacktestConfig {
            initial_capital: f64::NAN,
            ..base
        });
    }

    #[test]
    fn month_dates_cross_year_boundary() {
        let config = config_with_period((2023, 11), (2024, 2));
        assert_eq!(config.month_count(), 4);
        assert_eq!(
            config.month_date(1),
            NaiveDate::from_ymd_opt(2023, 11, 1)
        );
        assert_eq!(config.month_date(3), NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn accepts_short_field_aliases() {
        let config: BacktestConfig = serde_json::from_str(
            r#"{"position_size": 5.0, "stop_loss": -15, "start_year": 2023, "start_month": 1, "end_year": 2023, "end_month": 3}"#,
        )
        .unwrap();
        assert_eq!(config.position_size_pct, 5.0);
        assert_eq!(config.stop_loss_pct, -15.0);
        assert_eq!(config.take_profits, BacktestConfig::default().take_profits);
        assert_eq!(config.month_count(), 3);
    }

    #[test]
    fn accepts_camel_case_field_names() {
        let config: BacktestConfig = serde_json::from_str(
            r#"{"initialCapital": 5000, "positionSizePct": 3.0, "stopLossPct": -25,
                "takeProfits": [50, 150], "maxHoldingDays": 5, "startYear": 2024,
                "startMonth": 2, "endYear": 2024, "endMonth": 7, "tradingFee": 10}"#,
        )
        .unwrap();
        assert_eq!(config.initial_capital, 5000.0);
        assert_eq!(config.position_size_pct, 3.0);
        assert_eq!(config.stop_loss_pct, -25.0);
        assert_eq!(config.take_profits, vec![50.0, 150.0]);
        assert_eq!(config.max_holding_days, 5);
        assert_eq!((config.start_year, config.start_month), (2024, 2));
        assert_eq!((config.end_year, config.end_month), (2024, 7));
        assert_eq!(config.fee, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_year_month() {
        assert_eq!(parse_year_month("2023-03").unwrap(), (2023, 3));
        assert!(parse_year_month("2023-13").is_err());
        assert!(parse_year_month("March").is_err());
    }

    #[test]
    fn engine_settings_fall_back_to_defaults() {
        let settings = HashMap::new();
        let parsed = EngineSettings::from_settings_map(&settings).unwrap();
        assert_eq!(parsed.month_pause, Duration::from_millis(200));
        assert_eq!(parsed.retention, Duration::from_secs(24 * 3600));
        assert!((parsed.real_data_fraction - 0.3).abs() < 1e-12);
    }

    #[test]
    fn engine_settings_reject_malformed_values() {
        let mut settings = HashMap::new();
        settings.insert("BACKTEST_MONTH_PAUSE_MS".to_string(), "0".to_string());
        settings.insert("BACKTEST_RETENTION_HOURS".to_string(), "48".to_string());
        let parsed = EngineSettings::from_settings_map(&settings).unwrap();
        assert!(parsed.month_pause.is_zero());
        assert_eq!(parsed.retention, Duration::from_secs(48 * 3600));

        settings.insert("BACKTEST_REAL_DATA_FRACTION".to_string(), "1.5".to_string());
        assert!(EngineSettings::from_settings_map(&settings).is_err());

        settings.remove("BACKTEST_REAL_DATA_FRACTION");
        settings.insert("BACKTEST_MONTH_PAUSE_MS".to_string(), "fast".to_string());
        assert!(EngineSettings::from_settings_map(&settings).is_err());
    }

    #[test]
    fn engine_settings_reject_retention_beyond_cap() {
        let mut settings = HashMap::new();
        settings.insert(
            "BACKTEST_RETENTION_HOURS".to_string(),
            "6000000000000000".to_string(),
        );
        assert!(EngineSettings::from_settings_map(&settings).is_err());

        settings.insert(
            "BACKTEST_RETENTION_HOURS".to_string(),
            (MAX_RETENTION_HOURS + 1).to_string(),
        );
        assert!(EngineSettings::from_settings_map(&settings).is_err());

        settings.insert(
            "BACKTEST_RETENTION_HOURS".to_string(),
            MAX_RETENTION_HOURS.to_string(),
        );
        let parsed = EngineSettings::from_settings_map(&settings).unwrap();
        assert_eq!(
            parsed.retention,
            Duration::from_secs(MAX_RETENTION_HOURS * 3600)
        );
    }
}
