pub mod batch;
pub mod run;

use crate::config::BacktestConfig;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Loads the config file when one is given, the built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<BacktestConfig> {
    match path {
        Some(path) => {
            let config = BacktestConfig::load(path)?;
            info!("Loaded backtest config from {}", path.display());
            Ok(config)
        }
        None => Ok(BacktestConfig::default()),
    }
}

pub fn print_defaults() -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&BacktestConfig::default())?
    );
    Ok(())
}
