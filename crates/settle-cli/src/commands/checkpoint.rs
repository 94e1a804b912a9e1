use std::path::Path;

use anyhow::Result;
use settle_engine::Orchestrator;

/// Execute the `checkpoint` command: print stored checkpoints.
pub async fn execute(config_path: &Path, pipeline: Option<String>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let orchestrator = Orchestrator::new(config);

    let stored = super::blocking(move || orchestrator.checkpoints(pipeline.as_deref())).await?;
    if stored.is_empty() {
        println!("No checkpoints stored.");
        return Ok(());
    }
    for checkpoint in stored {
        println!("{}.{}", checkpoint.layer, checkpoint.pipeline);
        println!("  {}", checkpoint.settings);
    }
    Ok(())
}
