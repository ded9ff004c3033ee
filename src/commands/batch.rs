use crate::commands::load_config;
use crate::config::EngineSettings;
use crate::models::JobState;
use crate::orchestrator::JobOrchestrator;
use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::{info, warn};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::path::PathBuf;

pub struct BatchOptions {
    pub config: Option<PathBuf>,
    pub runs: usize,
    pub seed: Option<u64>,
}

/// Runs the same config `runs` times concurrently and reports how the total
/// return is distributed across the completed runs.
pub async fn run(settings: EngineSettings, options: BatchOptions) -> Result<()> {
    if options.runs == 0 {
        return Err(anyhow!("--runs must be at least 1"));
    }
    let base = load_config(options.config.as_deref())?;
    let base_seed = options.seed.or(base.seed);

    let orchestrator = JobOrchestrator::new(settings);
    let mut ids = Vec::with_capacity(options.runs);
    for run_index in 0..options.runs {
        let mut config = base.clone();
        config.seed = base_seed.map(|seed| seed.wrapping_add(run_index as u64));
        ids.push(orchestrator.submit(config)?);
    }
    info!("Submitted {} backtests", ids.len());

    let records = join_all(ids.iter().map(|id| orchestrator.join(id))).await;

    let mut returns = Vec::with_capacity(ids.len());
    for (id, record) in ids.iter().zip(records) {
        let record = record?;
        match record.state {
            JobState::Completed => {
                returns.push(orchestrator.get_result(id)?.summary.total_return);
            }
            state => warn!("Backtest {} ended {}: {}", id, state.as_str(), record.message),
        }
    }

    if returns.is_empty() {
        return Err(anyhow!("no backtest in the batch completed"));
    }

    let mean = Statistics::mean(&returns);
    let min = Statistics::min(&returns);
    let max = Statistics::max(&returns);
    let profitable = returns.iter().filter(|r| **r > 0.0).count();
    let completed = returns.len();
    let mut data = Data::new(returns);
    let median = data.median();

    info!(
        "Total return over {} completed runs: mean {:+.2}%, median {:+.2}%, min {:+.2}%, max {:+.2}%",
        completed,
        mean,
        median,
        min,
        max
    );
    info!("{} of {} runs ended profitable", profitable, completed);
    Ok(())
}
