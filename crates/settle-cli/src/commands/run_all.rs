use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use settle_engine::{Orchestrator, PipelineStatus, RoundReport};
use tokio::time::MissedTickBehavior;

/// Execute the `run-all` command: one round, or a round every `every`
/// seconds until Ctrl-C.
pub async fn execute(
    config_path: &Path,
    start_date: Option<NaiveDate>,
    every: Option<u64>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let orchestrator = Arc::new(Orchestrator::new(config));

    let Some(secs) = every else {
        let report = run_round(Arc::clone(&orchestrator), start_date).await?;
        print_report(&report);
        if report.failed() > 0 {
            bail!("{} pipeline(s) failed", report.failed());
        }
        return Ok(());
    };
    if secs == 0 {
        bail!("--every must be at least 1 second");
    }

    tracing::info!(every_secs = secs, "Running rounds until interrupted");
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    // A round longer than the period delays the next one instead of
    // queueing catch-up rounds.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, stopping");
                break;
            }
        }

        let round = run_round(Arc::clone(&orchestrator), start_date);
        tokio::pin!(round);
        let (result, stop) = tokio::select! {
            result = &mut round => (result, false),
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, finishing the current round");
                (round.await, true)
            }
        };
        match result {
            Ok(report) => print_report(&report),
            Err(err) => tracing::error!(error = %format!("{err:#}"), "Round failed"),
        }
        if stop {
            break;
        }
    }
    Ok(())
}

async fn run_round(
    orchestrator: Arc<Orchestrator>,
    start_date: Option<NaiveDate>,
) -> Result<RoundReport> {
    super::blocking(move || orchestrator.run_all(start_date)).await
}

fn print_report(report: &RoundReport) {
    println!("Round finished in {:.2}s.", report.duration_secs);
    for (key, status) in &report.results {
        match status {
            PipelineStatus::Completed(outcome) => println!(
                "  {:<52} {:<8} read={} written={} held_back={}",
                key.as_str(),
                outcome.progress.as_str(),
                outcome.stats.records_read,
                outcome.stats.records_written,
                outcome.stats.records_held_back,
            ),
            PipelineStatus::Failed(message) => {
                println!("  {:<52} failed   {message}", key.as_str());
            }
            PipelineStatus::Skipped { blocked_by } => {
                println!("  {:<52} skipped  blocked by {blocked_by}", key.as_str());
            }
            PipelineStatus::Disabled => println!("  {:<52} disabled", key.as_str()),
        }
    }
}
