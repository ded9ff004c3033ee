use crate::commands::load_config;
use crate::config::{parse_year_month, EngineSettings};
use crate::market_data::{PriceSeriesCache, PriceSeriesSource};
use crate::models::{BacktestResult, JobState};
use crate::orchestrator::JobOrchestrator;
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub price_data: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub async fn run(settings: EngineSettings, options: RunOptions) -> Result<()> {
    let mut config = load_config(options.config.as_deref())?;
    if let Some(seed) = options.seed {
        config.seed = Some(seed);
    }
    if let Some(start) = options.start.as_deref() {
        (config.start_year, config.start_month) = parse_year_month(start)?;
    }
    if let Some(end) = options.end.as_deref() {
        (config.end_year, config.end_month) = parse_year_month(end)?;
    }

    let price_source = match options.price_data.as_deref() {
        Some(path) => {
            let cache = PriceSeriesCache::load_from_file(path)?;
            Some(Arc::new(cache) as Arc<dyn PriceSeriesSource>)
        }
        None => None,
    };

    let orchestrator = match price_source {
        Some(source) => JobOrchestrator::with_price_source(settings, source),
        None => JobOrchestrator::new(settings),
    };
    let id = orchestrator.submit(config)?;

    let record = orchestrator.get_status(&id)?;
    let pb = ProgressBar::new(record.total_months as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    loop {
        let record = orchestrator.get_status(&id)?;
        pb.set_position(record.current_month as u64);
        pb.set_message(format!(
            "capital {:.2} ({:+.2}%)",
            record.live_metrics.capital, record.live_metrics.total_return
        ));
        if !record.is_running() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received; stopping backtest {}", id);
                orchestrator.cancel(&id);
            }
        }
    }

    let record = orchestrator.join(&id).await?;
    pb.finish_with_message(record.message.clone());

    match record.state {
        JobState::Completed => {
            let result = orchestrator.get_result(&id)?;
            log_summary(&result);
            if let Some(output) = options.output.as_deref() {
                let json = serde_json::to_string_pretty(&result)?;
                fs::write(output, json)
                    .with_context(|| format!("failed to write result to {}", output.display()))?;
                info!("Wrote backtest result to {}", output.display());
            }
            Ok(())
        }
        JobState::Stopped => {
            warn!("Backtest {} stopped before completion", id);
            Ok(())
        }
        JobState::Failed => Err(anyhow!("backtest {} failed: {}", id, record.message)),
        JobState::Running => Err(anyhow!("backtest {} did not finish", id)),
    }
}

fn log_summary(result: &BacktestResult) {
    let summary = &result.summary;
    let metrics = &result.metrics;
    info!(
        "Backtest {} finished: capital {:.2} -> {:.2} ({:+.2}%), P&L {:.2}, fees {:.2}",
        result.id,
        summary.initial_capital,
        summary.final_capital,
        summary.total_return,
        summary.total_pnl,
        summary.total_fees
    );
    info!(
        "Trades: {} (win rate {:.1}%), moon shots: {} ({:.1}%), mega gains: {}",
        metrics.total_trades,
        metrics.win_rate,
        metrics.moon_shot_count,
        metrics.moon_shot_rate,
        metrics.mega_gain_count
    );
    info!(
        "Best trade {:+.2}%, worst trade {:+.2}%, max drawdown {:.2}%, volatility {:.2}, sharpe-like {:.3}, profit factor {:.2}",
        metrics.best_trade,
        metrics.worst_trade,
        metrics.max_drawdown,
        metrics.volatility,
        metrics.sharpe_like_ratio,
        metrics.profit_factor
    );
}
