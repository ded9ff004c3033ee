pub mod commands;
pub mod config;
pub mod error;
pub mod exit_rules;
pub mod market_data;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod portfolio;
pub mod simulator;
pub mod store;
