//! Runs catalog pipelines against the configured warehouse.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use settle_core::{Pipeline, RunOutcome};
use settle_state::postgres::PostgresWarehouse;
use settle_state::sqlite::SqliteWarehouse;
use settle_state::{CheckpointStore, Warehouse};
use settle_types::state::PipelineKey;

use crate::catalog::{self, CatalogEntry};
use crate::config::{Backend, SettleConfig};
use crate::connectors::{ConfiguredConnectors, Connectors};
use crate::pipelines::BuildContext;
use crate::schema;

/// What happened to one pipeline in a round.
#[derive(Debug, Clone)]
pub enum PipelineStatus {
    Completed(RunOutcome),
    Failed(String),
    /// Not run because an upstream pipeline failed or was skipped.
    Skipped { blocked_by: String },
    Disabled,
}

impl PipelineStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Disabled => "disabled",
        }
    }
}

/// Result of one `run_all` round, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub results: Vec<(PipelineKey, PipelineStatus)>,
    pub duration_secs: f64,
}

impl RoundReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, s)| matches!(s, PipelineStatus::Failed(_)))
            .count()
    }

    #[must_use]
    pub fn status(&self, key: &str) -> Option<&PipelineStatus> {
        self.results.iter().find(|(k, _)| k.as_str() == key).map(|(_, s)| s)
    }
}

/// A stored checkpoint document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCheckpoint {
    pub layer: &'static str,
    pub pipeline: String,
    pub settings: String,
}

pub struct Orchestrator {
    config: SettleConfig,
    connectors: Box<dyn Connectors>,
}

impl Orchestrator {
    /// Orchestrator reaching the sources named in `config`.
    #[must_use]
    pub fn new(config: SettleConfig) -> Self {
        let connectors = ConfiguredConnectors::new(&config);
        Self::with_connectors(config, connectors)
    }

    pub fn with_connectors(config: SettleConfig, connectors: impl Connectors + 'static) -> Self {
        Self {
            config,
            connectors: Box::new(connectors),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SettleConfig {
        &self.config
    }

    /// Open the warehouse named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened.
    pub fn open_warehouse(&self) -> Result<Box<dyn Warehouse>> {
        let connection = &self.config.warehouse.connection;
        Ok(match self.config.warehouse.backend {
            Backend::Sqlite => Box::new(
                SqliteWarehouse::open(Path::new(connection), &schema::LAYERS)
                    .with_context(|| format!("Failed to open SQLite warehouse {connection}"))?,
            ),
            Backend::Postgres => Box::new(
                PostgresWarehouse::connect(connection).context("Failed to connect to PostgreSQL warehouse")?,
            ),
        })
    }

    /// Create every warehouse schema and table that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the warehouse cannot be opened or a statement
    /// fails; nothing is committed in that case.
    pub fn init(&self) -> Result<usize> {
        let mut warehouse = self.open_warehouse()?;
        let dialect = warehouse.dialect();
        let mut tx = warehouse.begin()?;
        let statements = schema::apply(tx.session()).context("Failed to apply warehouse DDL")?;
        tx.commit()?;
        tracing::info!(statements, dialect = %dialect, "Warehouse initialized");
        Ok(statements)
    }

    fn build(&self, entry: &CatalogEntry, warehouse: &dyn Warehouse) -> Result<Box<dyn Pipeline>> {
        let ctx = BuildContext {
            key: entry.key,
            layer: entry.layer.as_str(),
            dialect: warehouse.dialect(),
            mode: entry.mode,
            limit: self.config.batch_limit(entry.key).unwrap_or(entry.default_limit),
            stall_alarm: self.config.stall_alarm_after(),
            connectors: self.connectors.as_ref(),
        };
        (entry.build)(&ctx).with_context(|| format!("Failed to build pipeline '{}'", entry.key))
    }

    fn run_entry(
        &self,
        entry: &CatalogEntry,
        warehouse: &mut dyn Warehouse,
        start_date: Option<NaiveDate>,
    ) -> Result<RunOutcome> {
        let mut pipeline = self.build(entry, warehouse)?;
        let start_date = start_date.filter(|_| entry.uses_start_date);
        let outcome = pipeline
            .run(warehouse, start_date)
            .with_context(|| format!("Pipeline '{}' failed", entry.key))?;
        tracing::info!(
            pipeline = entry.key,
            progress = %outcome.progress,
            records_read = outcome.stats.records_read,
            records_written = outcome.stats.records_written,
            records_held_back = outcome.stats.records_held_back,
            duration_secs = outcome.duration_secs,
            "Pipeline run finished"
        );
        Ok(outcome)
    }

    /// Run one pipeline once.
    ///
    /// `start_date` only affects pipelines that read a source history and
    /// have never run.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the pipeline cannot be
    /// built, or the run fails.
    pub fn run_pipeline(&self, key: &str, start_date: Option<NaiveDate>) -> Result<RunOutcome> {
        let Some(entry) = catalog::find(key) else {
            bail!("Unknown pipeline '{key}'");
        };
        let mut warehouse = self.open_warehouse()?;
        self.run_entry(entry, warehouse.as_mut(), start_date)
    }

    /// Run every enabled pipeline once, in dependency order.
    ///
    /// A failure is recorded and the round goes on, but pipelines depending
    /// on a failed or skipped one are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the warehouse cannot be opened.
    pub fn run_all(&self, start_date: Option<NaiveDate>) -> Result<RoundReport> {
        let started = Instant::now();
        let mut warehouse = self.open_warehouse()?;
        let mut blocked: BTreeMap<&str, String> = BTreeMap::new();
        let mut report = RoundReport::default();

        for entry in catalog::entries() {
            let status = if !self.config.is_enabled(entry.key) {
                PipelineStatus::Disabled
            } else if let Some(dep) = entry.depends_on.iter().find(|d| blocked.contains_key(**d)) {
                tracing::warn!(pipeline = entry.key, blocked_by = *dep, "Skipping pipeline");
                blocked.insert(entry.key, (*dep).to_string());
                PipelineStatus::Skipped {
                    blocked_by: (*dep).to_string(),
                }
            } else {
                match self.run_entry(entry, warehouse.as_mut(), start_date) {
                    Ok(outcome) => PipelineStatus::Completed(outcome),
                    Err(err) => {
                        let message = format!("{err:#}");
                        tracing::error!(pipeline = entry.key, error = %message, "Pipeline failed");
                        blocked.insert(entry.key, message.clone());
                        PipelineStatus::Failed(message)
                    }
                }
            };
            report.results.push((PipelineKey::new(entry.key), status));
        }

        report.duration_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            pipelines = report.results.len(),
            failed = report.failed(),
            duration_secs = report.duration_secs,
            "Round finished"
        );
        Ok(report)
    }

    /// Stored checkpoints of every layer, or of one pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the warehouse cannot be read or `key` is not a
    /// catalog pipeline.
    pub fn checkpoints(&self, key: Option<&str>) -> Result<Vec<StoredCheckpoint>> {
        if let Some(key) = key {
            if catalog::find(key).is_none() {
                bail!("Unknown pipeline '{key}'");
            }
        }
        let mut warehouse = self.open_warehouse()?;
        let mut tx = warehouse.begin()?;
        let mut stored = Vec::new();
        for layer in schema::LAYERS {
            let store = CheckpointStore::new(layer)?;
            let rows = store
                .list(tx.session())
                .with_context(|| format!("Failed to read {}", store.table()))?;
            stored.extend(
                rows.into_iter()
                    .filter(|(pipeline, _)| key.map_or(true, |k| k == pipeline))
                    .map(|(pipeline, settings)| StoredCheckpoint {
                        layer,
                        pipeline,
                        settings,
                    }),
            );
        }
        Ok(stored)
    }
}
