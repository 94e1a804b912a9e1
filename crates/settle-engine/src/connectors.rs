//! Source connections handed to pipeline builders.
//!
//! Pipelines never open sources themselves; they ask a [`Connectors`]
//! implementation, so tests can substitute in-memory collections and page
//! sources for the real systems.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use settle_core::retry::RetryPolicy;
use settle_source_document::{DocumentCollection, JsonDirCollection, MemoryCollection, MongoCollection};
use settle_source_http::reader::DEFAULT_PAGE_SIZE;
use settle_source_http::{HttpPageSource, MemoryPageSource, PageSource};
use settle_state::postgres::PostgresFactory;
use settle_state::sqlite::SqliteFactory;
use settle_state::SessionFactory;

use crate::config::{Backend, SettleConfig, SourcesConfig};

/// Paging settings of the delivery API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPaging {
    pub page_size: usize,
    pub retry: RetryPolicy,
}

impl Default for DeliveryPaging {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Opens the three source systems.
pub trait Connectors: Send + Sync {
    /// Relational loyalty database.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not configured.
    fn bonus_system(&self) -> Result<Arc<dyn SessionFactory>>;

    /// One collection of the order system.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not configured.
    fn order_collection(&self, name: &str) -> Result<Box<dyn DocumentCollection>>;

    /// The delivery API.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not configured or the client
    /// cannot be built.
    fn delivery_api(&self) -> Result<Box<dyn PageSource>>;

    fn delivery_paging(&self) -> DeliveryPaging {
        DeliveryPaging::default()
    }
}

/// Connectors built from the `sources` section of the configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredConnectors {
    sources: SourcesConfig,
}

impl ConfiguredConnectors {
    #[must_use]
    pub fn new(config: &SettleConfig) -> Self {
        Self {
            sources: config.sources.clone(),
        }
    }
}

impl Connectors for ConfiguredConnectors {
    fn bonus_system(&self) -> Result<Arc<dyn SessionFactory>> {
        let bonus = self
            .sources
            .bonus_system
            .as_ref()
            .context("sources.bonus_system is not configured")?;
        Ok(match bonus.backend {
            Backend::Postgres => Arc::new(PostgresFactory::new(bonus.connection.clone())),
            Backend::Sqlite => Arc::new(SqliteFactory::new(&bonus.connection)),
        })
    }

    fn order_collection(&self, name: &str) -> Result<Box<dyn DocumentCollection>> {
        let orders = self
            .sources
            .order_system
            .as_ref()
            .context("sources.order_system is not configured")?;
        match (&orders.uri, &orders.export_dir) {
            (Some(uri), _) => {
                let collection = MongoCollection::connect(uri, orders.database.as_deref(), name)
                    .with_context(|| format!("Failed to open order collection '{name}'"))?;
                Ok(Box::new(collection))
            }
            (None, Some(dir)) => Ok(Box::new(JsonDirCollection::new(dir, name))),
            (None, None) => anyhow::bail!("sources.order_system needs uri or export_dir"),
        }
    }

    fn delivery_api(&self) -> Result<Box<dyn PageSource>> {
        let delivery = self
            .sources
            .delivery_system
            .as_ref()
            .context("sources.delivery_system is not configured")?;
        let source = HttpPageSource::new(
            delivery.base_url.clone(),
            &delivery.headers,
            Duration::from_secs(delivery.timeout_secs),
        )
        .context("Failed to build delivery API client")?;
        Ok(Box::new(source))
    }

    fn delivery_paging(&self) -> DeliveryPaging {
        self.sources
            .delivery_system
            .as_ref()
            .map_or_else(DeliveryPaging::default, |d| DeliveryPaging {
                page_size: d.page_size,
                retry: RetryPolicy::new(d.max_attempts)
                    .with_base_delay(Duration::from_millis(d.backoff_ms)),
            })
    }
}

/// Connectors over fixed data: a relational source reached through a
/// factory, in-memory collections and an in-memory delivery API.
///
/// Every call hands out a fresh copy, so a pipeline sees the data as it
/// was when the connectors were built.
#[derive(Default)]
pub struct StaticConnectors {
    bonus: Option<Arc<dyn SessionFactory>>,
    collections: BTreeMap<String, Vec<Value>>,
    api: Option<MemoryPageSource>,
    paging: DeliveryPaging,
}

impl StaticConnectors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bonus_system(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.bonus = Some(factory);
        self
    }

    /// Serve `docs` (extended JSON is accepted) as collection `name`.
    #[must_use]
    pub fn with_collection(mut self, name: &str, docs: Vec<Value>) -> Self {
        self.collections.insert(name.to_string(), docs);
        self
    }

    #[must_use]
    pub fn with_delivery_api(mut self, api: MemoryPageSource) -> Self {
        self.api = Some(api);
        self
    }

    #[must_use]
    pub fn with_delivery_paging(mut self, paging: DeliveryPaging) -> Self {
        self.paging = paging;
        self
    }
}

impl Connectors for StaticConnectors {
    fn bonus_system(&self) -> Result<Arc<dyn SessionFactory>> {
        self.bonus.clone().context("no bonus system source")
    }

    fn order_collection(&self, name: &str) -> Result<Box<dyn DocumentCollection>> {
        let docs = self
            .collections
            .get(name)
            .with_context(|| format!("no collection `{name}`"))?;
        Ok(Box::new(MemoryCollection::new(name, docs.clone())))
    }

    fn delivery_api(&self) -> Result<Box<dyn PageSource>> {
        let api = self.api.clone().context("no delivery API")?;
        Ok(Box::new(api))
    }

    fn delivery_paging(&self) -> DeliveryPaging {
        self.paging.clone()
    }
}
