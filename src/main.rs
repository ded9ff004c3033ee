use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use moonshot::{
    commands::{
        self,
        batch::{self, BatchOptions},
        run::{self, RunOptions},
    },
    config::EngineSettings,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moonshot")]
#[command(about = "Monte Carlo backtester for memecoin take-profit ladders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest and report its result
    Run {
        /// JSON file with backtest parameters (defaults are used for missing fields)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
        /// First simulated month (YYYY-MM)
        #[arg(long, value_name = "YYYY-MM")]
        start: Option<String>,
        /// Last simulated month (YYYY-MM)
        #[arg(long, value_name = "YYYY-MM")]
        end: Option<String>,
        /// JSON price series to replay for part of the trades
        #[arg(long = "price-data", value_name = "PATH")]
        price_data: Option<PathBuf>,
        /// Destination for the full result as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Run the same backtest several times concurrently and summarize the spread
    Batch {
        /// JSON file with backtest parameters
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Number of runs
        #[arg(long)]
        runs: usize,
        /// Seed of the first run; run i uses seed + i
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the default backtest parameters as JSON
    Defaults,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match command {
        Commands::Run {
            config,
            seed,
            start,
            end,
            price_data,
            output,
        } => {
            let settings = load_settings()?;
            run::run(
                settings,
                RunOptions {
                    config,
                    seed,
                    start,
                    end,
                    price_data,
                    output,
                },
            )
            .await?;
        }
        Commands::Batch { config, runs, seed } => {
            let settings = load_settings()?;
            batch::run(settings, BatchOptions { config, runs, seed }).await?;
        }
        Commands::Defaults => {
            commands::print_defaults()?;
        }
    }

    Ok(())
}

fn load_settings() -> Result<EngineSettings> {
    let settings = EngineSettings::from_env()?;
    info!(
        "Month pause {}ms, real-data fraction {:.0}%",
        settings.month_pause.as_millis(),
        settings.real_data_fraction * 100.0
    );
    Ok(settings)
}
