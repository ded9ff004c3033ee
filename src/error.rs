use crate::models::JobId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BacktestError {
    /// Rejected configuration; the job never enters the job map.
    #[error("invalid backtest config: {0}")]
    Validation(String),
    #[error("backtest {0} not found")]
    NotFound(JobId),
    /// Failure inside the simulation loop, recorded on the job as FAILED.
    #[error("simulation failed: {0}")]
    Simulation(String),
}

impl BacktestError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        BacktestError::Validation(message.into())
    }

    pub fn simulation<S: Into<String>>(message: S) -> Self {
        BacktestError::Simulation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
