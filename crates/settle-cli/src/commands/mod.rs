pub mod checkpoint;
pub mod init;
pub mod list;
pub mod run;
pub mod run_all;

use anyhow::{Context, Result};
pub use settle_engine::config::parser::load_config;

/// Run warehouse work off the async runtime; the database and HTTP clients
/// block.
pub async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Warehouse task panicked")?
}
