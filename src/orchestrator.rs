use crate::config::{BacktestConfig, EngineSettings};
use crate::error::{BacktestError, Result};
use crate::market_data::PriceSeriesSource;
use crate::metrics::PerformanceCalculator;
use crate::models::{
    BacktestResult, ChartsData, HistoryEntry, JobId, JobRecord, JobState, LiveMetrics,
    MonthlyStats, TradeRecord,
};
use crate::portfolio::{MonthOutcome, PortfolioAccountant};
use crate::store::{MemoryStore, RecordStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

const MESSAGE_COMPLETED: &str = "Backtest completed";
const MESSAGE_STOPPED: &str = "Stopped by user";
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Owns job bookkeeping and drives each backtest as its own tokio task.
///
/// A job's record is written by its own task and by `cancel`; both go through
/// the store's per-record lock. Cancellation is observed at month boundaries,
/// so a month that has started always finishes its trades.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    jobs: Arc<dyn RecordStore<JobRecord>>,
    results: Arc<dyn RecordStore<BacktestResult>>,
    tasks: DashMap<JobId, JoinHandle<()>>,
    price_source: Option<Arc<dyn PriceSeriesSource>>,
    settings: EngineSettings,
}

impl JobOrchestrator {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_components(
            settings,
            Arc::new(MemoryStore::<JobRecord>::new()),
            Arc::new(MemoryStore::<BacktestResult>::new()),
            None,
        )
    }

    /// In-memory stores, with trades replaying `source` at the configured
    /// real-data fraction.
    pub fn with_price_source(settings: EngineSettings, source: Arc<dyn PriceSeriesSource>) -> Self {
        Self::with_components(
            settings,
            Arc::new(MemoryStore::<JobRecord>::new()),
            Arc::new(MemoryStore::<BacktestResult>::new()),
            Some(source),
        )
    }

    pub fn with_components(
        settings: EngineSettings,
        jobs: Arc<dyn RecordStore<JobRecord>>,
        results: Arc<dyn RecordStore<BacktestResult>>,
        price_source: Option<Arc<dyn PriceSeriesSource>>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                jobs,
                results,
                tasks: DashMap::new(),
                price_source,
                settings,
            }),
        }
    }

    /// Validates `config`, registers a RUNNING job and spawns its monthly
    /// loop. Must be called from within a tokio runtime.
    pub fn submit(&self, config: BacktestConfig) -> Result<JobId> {
        config.validate()?;

        let id = JobId::new();
        let total_months = config.month_count();
        self.inner
            .jobs
            .put(id, JobRecord::new(id, total_months, config.initial_capital));
        info!(
            "Submitted backtest {} ({} months, {}-{:02} to {}-{:02})",
            id,
            total_months,
            config.start_year,
            config.start_month,
            config.end_year,
            config.end_month
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let inner = Arc::clone(&self.inner);
        let job = tokio::spawn(async move { inner.run_job(id, config, rng).await });

        let inner = Arc::clone(&self.inner);
        let supervisor = tokio::spawn(async move {
            if let Err(err) = job.await {
                let message = join_error_message(err);
                warn!("Backtest {} task aborted: {}", id, message);
                inner.fail(&id, &message);
            }
        });
        self.inner.tasks.insert(id, supervisor);

        Ok(id)
    }

    pub fn get_status(&self, id: &JobId) -> Result<JobRecord> {
        self.inner
            .jobs
            .get(id)
            .ok_or(BacktestError::NotFound(*id))
    }

    pub fn get_result(&self, id: &JobId) -> Result<BacktestResult> {
        self.inner
            .results
            .get(id)
            .ok_or(BacktestError::NotFound(*id))
    }

    /// Requests a stop. Returns `true` only when a running job was flipped to
    /// STOPPED by this call.
    pub fn cancel(&self, id: &JobId) -> bool {
        let stopped = self
            .inner
            .jobs
            .update(id, &mut |record| record.finish(JobState::Stopped, MESSAGE_STOPPED));
        if stopped {
            info!("Backtest {} stopped by request", id);
        }
        stopped
    }

    pub fn list_active(&self) -> Vec<JobRecord> {
        let mut active: Vec<JobRecord> = self
            .inner
            .jobs
            .list()
            .into_iter()
            .filter(|record| record.is_running())
            .collect();
        active.sort_by_key(|record| record.created_at);
        active
    }

    /// Completed backtests, most recent first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let mut history: Vec<HistoryEntry> = self
            .inner
            .results
            .list()
            .iter()
            .map(HistoryEntry::from)
            .collect();
        history.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        history
    }

    /// Waits for the job's task to exit and returns its final record.
    pub async fn join(&self, id: &JobId) -> Result<JobRecord> {
        if let Some((_, handle)) = self.inner.tasks.remove(id) {
            if let Err(err) = handle.await {
                warn!("Supervisor of backtest {} ended abnormally: {}", id, err);
            }
        }
        self.get_status(id)
    }

    /// Evicts terminal jobs whose `completed_at` is older than the retention
    /// window, together with their results. Returns the number evicted.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        // A window beyond chrono's range means nothing can have expired yet.
        let Some(cutoff) = chrono::Duration::from_std(self.inner.settings.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return 0;
        };
        let is_expired = |record: &JobRecord| {
            record.state.is_terminal()
                && record
                    .completed_at
                    .map(|completed_at| completed_at < cutoff)
                    .unwrap_or(false)
        };

        let mut evicted = 0;
        for record in self.inner.jobs.list() {
            if !is_expired(&record) {
                continue;
            }
            if self.inner.jobs.remove_if(&record.id, &is_expired).is_some() {
                self.inner.results.delete(&record.id);
                self.inner.tasks.remove(&record.id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(
                "Evicted {} expired backtest{}",
                evicted,
                if evicted == 1 { "" } else { "s" }
            );
        }
        evicted
    }

    pub fn spawn_retention_sweeper(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = self
            .inner
            .settings
            .sweep_interval
            .max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                orchestrator.sweep_expired(Utc::now());
            }
        })
    }
}

impl OrchestratorInner {
    async fn run_job(self: Arc<Self>, id: JobId, config: BacktestConfig, mut rng: StdRng) {
        match self.simulate(&id, &config, &mut rng).await {
            Ok(Some(ledger)) => self.complete(&id, &config, ledger),
            Ok(None) => info!("Backtest {} exited before completion", id),
            Err(err) => {
                warn!("Backtest {} failed: {}", id, err);
                self.fail(&id, &err.to_string());
            }
        }
    }

    async fn simulate(
        &self,
        id: &JobId,
        config: &BacktestConfig,
        rng: &mut StdRng,
    ) -> Result<Option<RunLedger>> {
        let mut accountant = PortfolioAccountant::new(config)?;
        if let Some(source) = self.price_source.as_deref() {
            accountant = accountant.with_price_source(source, self.settings.real_data_fraction);
        }

        let total_months = config.month_count();
        let mut ledger = RunLedger::new(config.initial_capital);

        for month in 1..=total_months {
            let running = self
                .jobs
                .get(id)
                .map(|record| record.is_running())
                .unwrap_or(false);
            if !running {
                return Ok(None);
            }

            let outcome = accountant.simulate_month(month, ledger.capital, rng)?;
            ledger.record_month(outcome);

            let live_metrics = ledger.live_metrics(config.initial_capital);
            let progress = month as f64 / total_months as f64 * 100.0;
            let still_running = self.jobs.update(id, &mut |record| {
                if !record.is_running() {
                    return false;
                }
                record.current_month = month;
                record.progress = progress;
                record.message = format!("Simulating month {}/{}", month, total_months);
                record.live_metrics = live_metrics.clone();
                true
            });
            if !still_running {
                return Ok(None);
            }
            debug!(
                "Backtest {} month {}/{}: capital {:.2} ({:+.2}%)",
                id, month, total_months, live_metrics.capital, live_metrics.total_return
            );

            if month < total_months {
                self.pause_between_months().await;
            }
        }

        Ok(Some(ledger))
    }

    async fn pause_between_months(&self) {
        if self.settings.month_pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.settings.month_pause).await;
        }
    }

    fn complete(&self, id: &JobId, config: &BacktestConfig, ledger: RunLedger) {
        let metrics = PerformanceCalculator::calculate_performance(
            config.initial_capital,
            &ledger.capital_curve,
            &ledger.monthly_returns,
            &ledger.trades,
        );
        let final_capital = ledger.capital;
        let total_return = metrics.total_return;
        let summary =
            PerformanceCalculator::summarize(config.initial_capital, final_capital, &metrics);
        let charts_data = ChartsData {
            capital_evolution: ledger.capital_curve.clone(),
            monthly_returns: ledger.monthly_returns.clone(),
            trade_returns: ledger.trades.iter().map(|trade| trade.return_pct).collect(),
        };

        let mut pending = Some(BacktestResult {
            id: *id,
            config: config.clone(),
            summary,
            capital_curve: ledger.capital_curve,
            monthly_stats: ledger.monthly_stats,
            trades: ledger.trades,
            metrics,
            charts_data,
            completed_at: Utc::now(),
        });

        // The result is stored under the job's lock so a COMPLETED record is
        // never observable without its result, and a concurrent stop wins
        // cleanly.
        let results = &self.results;
        let completed = self.jobs.update(id, &mut |record| {
            if !record.finish(JobState::Completed, MESSAGE_COMPLETED) {
                return false;
            }
            if let Some(mut result) = pending.take() {
                if let Some(completed_at) = record.completed_at {
                    result.completed_at = completed_at;
                }
                results.put(*id, result);
            }
            true
        });

        if completed {
            info!(
                "Backtest {} completed: final capital {:.2} ({:+.2}%)",
                id, final_capital, total_return
            );
        } else {
            info!("Backtest {} was no longer running at completion; result discarded", id);
        }
    }

    fn fail(&self, id: &JobId, message: &str) {
        let message = format!("Error: {}", message);
        self.jobs
            .update(id, &mut |record| record.finish(JobState::Failed, message.clone()));
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "task cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}

/// Running totals of one job, owned by its task.
struct RunLedger {
    capital: f64,
    capital_curve: Vec<f64>,
    monthly_returns: Vec<f64>,
    monthly_stats: Vec<MonthlyStats>,
    trades: Vec<TradeRecord>,
    winning_trades: usize,
    moon_shots: usize,
}

impl RunLedger {
    fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            capital_curve: vec![initial_capital],
            monthly_returns: Vec::new(),
            monthly_stats: Vec::new(),
            trades: Vec::new(),
            winning_trades: 0,
            moon_shots: 0,
        }
    }

    fn record_month(&mut self, outcome: MonthOutcome) {
        self.capital = outcome.ending_capital();
        self.capital_curve.push(self.capital);
        self.monthly_returns.push(outcome.stats.return_pct);
        self.winning_trades += outcome.stats.winning_trades;
        self.moon_shots += outcome.stats.moon_shots;
        self.trades.extend(outcome.trades);
        self.monthly_stats.push(outcome.stats);
    }

    fn live_metrics(&self, initial_capital: f64) -> LiveMetrics {
        LiveMetrics {
            capital: self.capital,
            total_return: PerformanceCalculator::total_return(initial_capital, self.capital),
            total_trades: self.trades.len(),
            win_rate: PerformanceCalculator::rate(self.winning_trades, self.trades.len()),
            moon_shots: self.moon_shots,
        }
    }
}
