use std::path::Path;

use anyhow::Result;
use settle_engine::catalog;

/// Execute the `list` command: print the catalog with effective settings.
pub fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;

    println!(
        "{:<52} {:<6} {:<16} {:<7} {:>6}  ENABLED",
        "PIPELINE", "LAYER", "SOURCE", "MODE", "LIMIT"
    );
    for entry in catalog::entries() {
        let limit = config.batch_limit(entry.key).unwrap_or(entry.default_limit);
        println!(
            "{:<52} {:<6} {:<16} {:<7} {:>6}  {}",
            entry.key,
            entry.layer.as_str(),
            entry.source.as_str(),
            entry.mode.as_str(),
            limit,
            if config.is_enabled(entry.key) { "yes" } else { "no" },
        );
    }
    Ok(())
}
