//! Configuration types deserialized from the settlement YAML file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Supported SQL backends, for the warehouse and the bonus-system source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    Sqlite,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettleConfig {
    pub version: String,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Per-pipeline overrides, keyed by pipeline key.
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineOverride>,
    #[serde(default = "default_stall_alarm_after_secs")]
    pub stall_alarm_after_secs: u64,
}

impl SettleConfig {
    #[must_use]
    pub fn stall_alarm_after(&self) -> Duration {
        Duration::from_secs(self.stall_alarm_after_secs)
    }

    /// Whether `key` is enabled; pipelines without an override are.
    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.pipelines.get(key).map_or(true, |o| o.enabled)
    }

    /// Configured batch limit for `key`, if overridden.
    #[must_use]
    pub fn batch_limit(&self, key: &str) -> Option<usize> {
        self.pipelines.get(key).and_then(|o| o.batch_limit)
    }
}

fn default_stall_alarm_after_secs() -> u64 {
    3600
}

/// Destination warehouse.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    pub backend: Backend,
    /// `SQLite` file path or libpq connection string.
    pub connection: String,
}

/// Connection settings of the three source systems.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    pub bonus_system: Option<BonusSystemConfig>,
    pub order_system: Option<OrderSystemConfig>,
    pub delivery_system: Option<DeliverySystemConfig>,
}

/// Relational loyalty database.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BonusSystemConfig {
    pub connection: String,
    #[serde(default)]
    pub backend: Backend,
}

/// Order system document store: a `MongoDB` server, or a directory of
/// `mongoexport --jsonArray` files. Exactly one of `uri` and `export_dir`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSystemConfig {
    /// `mongodb://` or `mongodb+srv://` URI; TLS options such as
    /// `tlsCAFile` go in its query string.
    pub uri: Option<String>,
    /// Database holding the collections, if not the one in the URI path.
    pub database: Option<String>,
    /// Directory holding `<collection>.json` arrays.
    pub export_dir: Option<PathBuf>,
}

/// Delivery system HTTP API.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySystemConfig {
    pub base_url: String,
    /// Fixed headers sent with every request (API key, nickname, cohort).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_size() -> usize {
    50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

/// Per-pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineOverride {
    pub batch_limit: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
