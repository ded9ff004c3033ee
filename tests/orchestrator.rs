use chrono::{Duration as ChronoDuration, Utc};
use moonshot::config::{BacktestConfig, EngineSettings};
use moonshot::error::BacktestError;
use moonshot::market_data::{PriceSeriesCache, PriceSeriesSource};
use moonshot::models::{JobId, JobState};
use moonshot::orchestrator::JobOrchestrator;
use moonshot::portfolio::INSTRUMENTS;
use std::sync::{Arc, Once};
use std::time::Duration;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn fast_settings() -> EngineSettings {
    ensure_test_env();
    EngineSettings {
        month_pause: Duration::ZERO,
        ..EngineSettings::default()
    }
}

fn paced_settings(month_pause: Duration) -> EngineSettings {
    ensure_test_env();
    EngineSettings {
        month_pause,
        ..EngineSettings::default()
    }
}

fn config_for(start: (i32, u32), end: (i32, u32), seed: u64) -> BacktestConfig {
    BacktestConfig {
        start_year: start.0,
        start_month: start.1,
        end_year: end.0,
        end_month: end.1,
        seed: Some(seed),
        ..BacktestConfig::default()
    }
}

fn quarter_config(seed: u64) -> BacktestConfig {
    config_for((2023, 1), (2023, 3), seed)
}

fn year_config(seed: u64) -> BacktestConfig {
    config_for((2023, 1), (2023, 12), seed)
}

#[tokio::test]
async fn quarter_backtest_runs_to_completion() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let id = orchestrator.submit(quarter_config(7)).unwrap();

    let record = orchestrator.join(&id).await.unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.message, "Backtest completed");
    assert_eq!(record.current_month, 3);
    assert_eq!(record.total_months, 3);
    assert!(record.completed_at.is_some());

    let result = orchestrator.get_result(&id).unwrap();
    assert_eq!(result.id, id);
    assert_eq!(result.monthly_stats.len(), 3);
    assert_eq!(result.capital_curve.len(), 4);
    assert_eq!(result.capital_curve[0], 10_000.0);
    assert_eq!(Some(result.completed_at), record.completed_at);

    for (idx, stats) in result.monthly_stats.iter().enumerate() {
        assert_eq!(stats.month, idx as u32 + 1);
        assert!((8..=15).contains(&stats.trades_count));
        assert_eq!(stats.starting_capital, result.capital_curve[idx]);
        assert_eq!(stats.ending_capital, result.capital_curve[idx + 1]);
    }

    let trade_total: usize = result.monthly_stats.iter().map(|s| s.trades_count).sum();
    assert_eq!(result.trades.len(), trade_total);
    assert_eq!(result.metrics.total_trades, trade_total);
    for trade in &result.trades {
        assert!(trade.return_pct >= -20.0 && trade.return_pct <= 1200.0);
        assert!(trade.holding_days >= 1 && trade.holding_days <= 8);
    }

    let final_capital = *result.capital_curve.last().unwrap();
    assert_eq!(result.summary.final_capital, final_capital);
    assert_eq!(record.live_metrics.capital, final_capital);
    assert_eq!(result.charts_data.capital_evolution, result.capital_curve);
    assert_eq!(result.charts_data.trade_returns.len(), trade_total);

    assert!(orchestrator.list_active().is_empty());
    let history = orchestrator.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, id);
}

#[tokio::test]
async fn same_seed_reproduces_the_run() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let first = orchestrator.submit(quarter_config(42)).unwrap();
    let second = orchestrator.submit(quarter_config(42)).unwrap();
    let other = orchestrator.submit(quarter_config(43)).unwrap();
    for id in [first, second, other] {
        assert_eq!(
            orchestrator.join(&id).await.unwrap().state,
            JobState::Completed
        );
    }

    let first = orchestrator.get_result(&first).unwrap();
    let second = orchestrator.get_result(&second).unwrap();
    let other = orchestrator.get_result(&other).unwrap();

    assert_eq!(first.capital_curve, second.capital_curve);
    assert_eq!(
        serde_json::to_value(&first.trades).unwrap(),
        serde_json::to_value(&second.trades).unwrap()
    );
    assert_ne!(first.capital_curve, other.capital_curve);
}

#[tokio::test]
async fn cancel_before_first_month_leaves_no_result() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let id = orchestrator.submit(year_config(1)).unwrap();

    // The job task has not been polled yet on this single-threaded runtime.
    assert!(orchestrator.cancel(&id));

    let record = orchestrator.join(&id).await.unwrap();
    assert_eq!(record.state, JobState::Stopped);
    assert_eq!(record.message, "Stopped by user");
    assert_eq!(record.current_month, 0);
    assert!(record.completed_at.is_some());
    assert_eq!(
        orchestrator.get_result(&id).unwrap_err(),
        BacktestError::NotFound(id)
    );
}

#[tokio::test]
async fn cancel_mid_run_stops_at_month_boundary() {
    let orchestrator = JobOrchestrator::new(paced_settings(Duration::from_millis(50)));
    let id = orchestrator.submit(year_config(2)).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(orchestrator.cancel(&id));

    let record = orchestrator.join(&id).await.unwrap();
    assert_eq!(record.state, JobState::Stopped);
    assert!(record.current_month >= 1);
    assert!(record.current_month < 12);
    assert!(record.progress < 100.0);
    assert!(orchestrator.get_result(&id).is_err());
    assert!(orchestrator.history().is_empty());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let id = orchestrator.submit(year_config(3)).unwrap();
    assert!(orchestrator.cancel(&id));
    let stopped = orchestrator.join(&id).await.unwrap();

    assert!(!orchestrator.cancel(&id));
    let again = orchestrator.get_status(&id).unwrap();
    assert_eq!(again.state, JobState::Stopped);
    assert_eq!(again.completed_at, stopped.completed_at);

    let finished = orchestrator.submit(quarter_config(3)).unwrap();
    orchestrator.join(&finished).await.unwrap();
    assert!(!orchestrator.cancel(&finished));
    assert_eq!(
        orchestrator.get_status(&finished).unwrap().state,
        JobState::Completed
    );
    assert!(orchestrator.get_result(&finished).is_ok());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let id = JobId::new();

    assert_eq!(
        orchestrator.get_status(&id).unwrap_err(),
        BacktestError::NotFound(id)
    );
    assert_eq!(
        orchestrator.get_result(&id).unwrap_err(),
        BacktestError::NotFound(id)
    );
    assert!(!orchestrator.cancel(&id));
    assert!(orchestrator.join(&id).await.is_err());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_a_job_exists() {
    let orchestrator = JobOrchestrator::new(fast_settings());

    let reversed = config_for((2024, 6), (2024, 1), 1);
    assert!(matches!(
        orchestrator.submit(reversed),
        Err(BacktestError::Validation(_))
    ));

    let too_long = config_for((2020, 1), (2023, 1), 1);
    assert!(matches!(
        orchestrator.submit(too_long),
        Err(BacktestError::Validation(_))
    ));

    let unordered = BacktestConfig {
        take_profits: vec![80.0, 35.0],
        ..quarter_config(1)
    };
    assert!(matches!(
        orchestrator.submit(unordered),
        Err(BacktestError::Validation(_))
    ));

    assert!(orchestrator.list_active().is_empty());
}

#[tokio::test]
async fn list_active_shows_only_running_jobs_in_submission_order() {
    let orchestrator = JobOrchestrator::new(paced_settings(Duration::from_secs(30)));
    let first = orchestrator.submit(year_config(4)).unwrap();
    let second = orchestrator.submit(year_config(5)).unwrap();

    let active: Vec<JobId> = orchestrator
        .list_active()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(active, vec![first, second]);

    assert!(orchestrator.cancel(&first));
    let active = orchestrator.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second);
    assert_eq!(active[0].state, JobState::Running);

    assert!(orchestrator.cancel(&second));
    assert!(orchestrator.list_active().is_empty());
    orchestrator.join(&first).await.unwrap();
    orchestrator.join(&second).await.unwrap();
}

#[tokio::test]
async fn sweep_evicts_only_expired_terminal_jobs() {
    let orchestrator = JobOrchestrator::new(fast_settings());
    let done = orchestrator.submit(quarter_config(6)).unwrap();
    orchestrator.join(&done).await.unwrap();

    let paced = JobOrchestrator::new(paced_settings(Duration::from_secs(30)));
    let running = paced.submit(year_config(6)).unwrap();

    assert_eq!(orchestrator.sweep_expired(Utc::now()), 0);
    assert!(orchestrator.get_result(&done).is_ok());

    let later = Utc::now() + ChronoDuration::hours(25);
    assert_eq!(orchestrator.sweep_expired(later), 1);
    assert_eq!(
        orchestrator.get_status(&done).unwrap_err(),
        BacktestError::NotFound(done)
    );
    assert_eq!(
        orchestrator.get_result(&done).unwrap_err(),
        BacktestError::NotFound(done)
    );
    assert!(orchestrator.history().is_empty());

    assert_eq!(paced.sweep_expired(later), 0);
    assert!(paced.get_status(&running).unwrap().is_running());
    assert!(paced.cancel(&running));
}

#[tokio::test]
async fn non_finite_capital_marks_job_failed() {
    let cache = PriceSeriesCache::new();
    for instrument in INSTRUMENTS {
        cache.insert(instrument, vec![1.0, 30.0]);
    }
    let settings = EngineSettings {
        real_data_fraction: 1.0,
        ..fast_settings()
    };
    let orchestrator = JobOrchestrator::with_price_source(settings, Arc::new(cache));
    let config = BacktestConfig {
        initial_capital: 1e308,
        position_size_pct: 100.0,
        ..quarter_config(8)
    };
    let id = orchestrator.submit(config).unwrap();

    let record = orchestrator.join(&id).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(record.message.starts_with("Error: "));
    assert!(record.completed_at.is_some());
    assert!(orchestrator.get_result(&id).is_err());
    assert!(orchestrator.list_active().is_empty());
}

struct PanickingSource;

impl PriceSeriesSource for PanickingSource {
    fn price_series(&self, _instrument: &str, _days: u32) -> Option<Vec<f64>> {
        panic!("price feed exploded");
    }
}

#[tokio::test]
async fn panicking_job_is_marked_failed() {
    let settings = EngineSettings {
        real_data_fraction: 1.0,
        ..fast_settings()
    };
    let orchestrator = JobOrchestrator::with_price_source(settings, Arc::new(PanickingSource));
    let id = orchestrator.submit(quarter_config(9)).unwrap();

    let record = orchestrator.join(&id).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(record.message.contains("price feed exploded"));
    assert!(orchestrator.get_result(&id).is_err());
}

#[tokio::test]
async fn background_sweeper_evicts_finished_jobs() {
    let settings = EngineSettings {
        retention: Duration::ZERO,
        sweep_interval: Duration::from_millis(10),
        ..fast_settings()
    };
    let orchestrator = JobOrchestrator::new(settings);
    let id = orchestrator.submit(quarter_config(10)).unwrap();
    assert_eq!(
        orchestrator.join(&id).await.unwrap().state,
        JobState::Completed
    );

    let sweeper = orchestrator.spawn_retention_sweeper();
    tokio::time::sleep(Duration::from_millis(100)).await;
    sweeper.abort();

    assert!(orchestrator.get_status(&id).is_err());
    assert!(orchestrator.get_result(&id).is_err());
}

#[tokio::test]
async fn sweep_keeps_jobs_when_retention_exceeds_calendar() {
    let settings = EngineSettings {
        retention: Duration::from_secs(1_000_000_000_000 * 3600),
        ..fast_settings()
    };
    let orchestrator = JobOrchestrator::new(settings);
    let id = orchestrator.submit(quarter_config(11)).unwrap();
    orchestrator.join(&id).await.unwrap();

    assert_eq!(orchestrator.sweep_expired(Utc::now()), 0);
    assert_eq!(
        orchestrator.sweep_expired(Utc::now() + ChronoDuration::hours(25)),
        0
    );
    assert!(orchestrator.get_status(&id).is_ok());
    assert!(orchestrator.get_result(&id).is_ok());
}

#[tokio::test]
async fn sweeper_tolerates_zero_interval() {
    let settings = EngineSettings {
        retention: Duration::ZERO,
        sweep_interval: Duration::ZERO,
        ..fast_settings()
    };
    let orchestrator = JobOrchestrator::new(settings);
    let id = orchestrator.submit(quarter_config(12)).unwrap();
    orchestrator.join(&id).await.unwrap();

    let sweeper = orchestrator.spawn_retention_sweeper();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sweeper.is_finished());
    sweeper.abort();

    assert!(orchestrator.get_status(&id).is_err());
}
