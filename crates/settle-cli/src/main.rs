mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "settle", version, about = "Settlement warehouse loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the warehouse YAML config
    #[arg(long, short, global = true, env = "SETTLE_CONFIG", default_value = "settle.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the warehouse schemas, tables and checkpoint tables
    Init,
    /// Run one pipeline once
    Run {
        /// Pipeline key, as printed by `settle list`
        pipeline: String,
        /// First day of source history to load on a first run (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,
    },
    /// Run every enabled pipeline in dependency order
    RunAll {
        /// First day of source history to load on a first run (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Repeat the round every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// List the pipeline catalog
    List,
    /// Show stored checkpoints
    Checkpoint {
        /// Only show this pipeline
        pipeline: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Commands::Init => commands::init::execute(&cli.config).await,
        Commands::Run {
            pipeline,
            start_date,
        } => commands::run::execute(&cli.config, &pipeline, start_date).await,
        Commands::RunAll { start_date, every } => {
            commands::run_all::execute(&cli.config, start_date, every).await
        }
        Commands::List => commands::list::execute(&cli.config),
        Commands::Checkpoint { pipeline } => {
            commands::checkpoint::execute(&cli.config, pipeline).await
        }
    }
}
