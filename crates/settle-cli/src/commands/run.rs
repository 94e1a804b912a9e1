use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use settle_engine::Orchestrator;

/// Execute the `run` command: run one pipeline once.
pub async fn execute(
    config_path: &Path,
    pipeline: &str,
    start_date: Option<NaiveDate>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let orchestrator = Orchestrator::new(config);

    tracing::info!(pipeline, start_date = ?start_date, "Starting pipeline run");
    let key = pipeline.to_string();
    let outcome = super::blocking(move || orchestrator.run_pipeline(&key, start_date)).await?;

    println!("Pipeline '{}' finished: {}.", outcome.pipeline, outcome.progress);
    println!("  Records read:      {}", outcome.stats.records_read);
    println!("  Records written:   {}", outcome.stats.records_written);
    println!("  Records skipped:   {}", outcome.stats.records_skipped);
    println!("  Records held back: {}", outcome.stats.records_held_back);
    println!("  Batches:           {}", outcome.stats.batches);
    println!("  Checkpoint moved:  {}", outcome.checkpoint_moved());
    println!("  Duration:          {:.2}s", outcome.duration_secs);
    Ok(())
}
