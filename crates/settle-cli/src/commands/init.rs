use std::path::Path;

use anyhow::Result;
use settle_engine::Orchestrator;

/// Execute the `init` command: create every schema and table.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let backend = config.warehouse.backend;
    let orchestrator = Orchestrator::new(config);

    tracing::info!(backend = backend.as_str(), "Initializing warehouse");
    let statements = super::blocking(move || orchestrator.init()).await?;

    println!("Warehouse initialized ({}).", backend.as_str());
    println!("  Statements applied: {statements}");
    Ok(())
}
