//! The pipeline catalog: every pipeline of the warehouse with its layer,
//! source, defaults and upstream dependencies, in load order.

use settle_core::RunMode;

use crate::pipelines::{cdm, dds, stg, BuildFn};

/// Warehouse layer a pipeline writes to; also the schema of its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Stg,
    Dds,
    Cdm,
}

impl Layer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stg => "stg",
            Self::Dds => "dds",
            Self::Cdm => "cdm",
        }
    }
}

/// System a pipeline reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSystem {
    BonusSystem,
    OrderSystem,
    DeliverySystem,
    /// Earlier layers of the warehouse itself.
    Warehouse,
}

impl SourceSystem {
    /// Name of the configuration section for this source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BonusSystem => "bonus_system",
            Self::OrderSystem => "order_system",
            Self::DeliverySystem => "delivery_system",
            Self::Warehouse => "warehouse",
        }
    }
}

pub struct CatalogEntry {
    pub key: &'static str,
    pub layer: Layer,
    pub source: SourceSystem,
    /// Pipelines whose output this one reads.
    pub depends_on: &'static [&'static str],
    pub default_limit: usize,
    pub mode: RunMode,
    /// Whether a start date seeds the first run.
    pub uses_start_date: bool,
    pub build: BuildFn,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("key", &self.key)
            .field("layer", &self.layer)
            .field("source", &self.source)
            .field("depends_on", &self.depends_on)
            .field("default_limit", &self.default_limit)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

const fn stage(
    key: &'static str,
    source: SourceSystem,
    default_limit: usize,
    uses_start_date: bool,
    build: BuildFn,
) -> CatalogEntry {
    CatalogEntry {
        key,
        layer: Layer::Stg,
        source,
        depends_on: &[],
        default_limit,
        mode: RunMode::Single,
        uses_start_date,
        build,
    }
}

const fn dimension(
    key: &'static str,
    depends_on: &'static [&'static str],
    default_limit: usize,
    build: BuildFn,
) -> CatalogEntry {
    CatalogEntry {
        key,
        layer: Layer::Dds,
        source: SourceSystem::Warehouse,
        depends_on,
        default_limit,
        mode: RunMode::Single,
        uses_start_date: false,
        build,
    }
}

const fn mart(key: &'static str, depends_on: &'static [&'static str], build: BuildFn) -> CatalogEntry {
    CatalogEntry {
        key,
        layer: Layer::Cdm,
        source: SourceSystem::Warehouse,
        depends_on,
        default_limit: 100,
        mode: RunMode::Drain,
        uses_start_date: false,
        build,
    }
}

static ENTRIES: [CatalogEntry; 19] = [
    stage("bonussystem_ranks_origin_to_stg_workflow", SourceSystem::BonusSystem, 2, false, stg::bonus_ranks),
    stage("bonussystem_users_origin_to_stg_workflow", SourceSystem::BonusSystem, 50, false, stg::bonus_users),
    stage("bonussystem_events_origin_to_stg_workflow", SourceSystem::BonusSystem, 10_000, true, stg::bonus_events),
    stage("ordersystem_restaurants_origin_to_stg_workflow", SourceSystem::OrderSystem, 2, false, stg::order_restaurants),
    stage("ordersystem_users_origin_to_stg_workflow", SourceSystem::OrderSystem, 50, false, stg::order_users),
    stage("ordersystem_orders_origin_to_stg_workflow", SourceSystem::OrderSystem, 5_000, true, stg::order_orders),
    stage(
        "deliverysystem_restaurants_origin_to_stg_workflow",
        SourceSystem::DeliverySystem,
        2,
        false,
        stg::delivery_restaurants,
    ),
    stage(
        "deliverysystem_couriers_origin_to_stg_workflow",
        SourceSystem::DeliverySystem,
        50,
        false,
        stg::delivery_couriers,
    ),
    stage(
        "deliverysystem_deliveries_origin_to_stg_workflow",
        SourceSystem::DeliverySystem,
        5_000,
        true,
        stg::delivery_deliveries,
    ),
    dimension(
        "users_stg_to_dds_workflow",
        &["ordersystem_users_origin_to_stg_workflow", "bonussystem_users_origin_to_stg_workflow"],
        50,
        dds::users,
    ),
    dimension(
        "restaurants_stg_to_dds_workflow",
        &[
            "ordersystem_restaurants_origin_to_stg_workflow",
            "deliverysystem_restaurants_origin_to_stg_workflow",
        ],
        2,
        dds::restaurants,
    ),
    dimension(
        "timestamps_stg_to_dds_workflow",
        &["ordersystem_orders_origin_to_stg_workflow"],
        5_000,
        dds::timestamps,
    ),
    dimension(
        "couriers_stg_to_dds_workflow",
        &["deliverysystem_couriers_origin_to_stg_workflow"],
        50,
        dds::couriers,
    ),
    dimension("products_stg_to_dds_workflow", &["restaurants_stg_to_dds_workflow"], 100, dds::products),
    dimension(
        "orders_stg_to_dds_workflow",
        &[
            "users_stg_to_dds_workflow",
            "restaurants_stg_to_dds_workflow",
            "timestamps_stg_to_dds_workflow",
        ],
        5_000,
        dds::orders,
    ),
    dimension(
        "product_sales_stg_to_dds_workflow",
        &[
            "orders_stg_to_dds_workflow",
            "products_stg_to_dds_workflow",
            "bonussystem_events_origin_to_stg_workflow",
        ],
        10_000,
        dds::product_sales,
    ),
    dimension(
        "courier_deliveries_stg_to_dds_workflow",
        &[
            "orders_stg_to_dds_workflow",
            "couriers_stg_to_dds_workflow",
            "deliverysystem_deliveries_origin_to_stg_workflow",
        ],
        5_000,
        dds::courier_deliveries,
    ),
    mart(
        "settlement_report_dds_to_cdm_workflow",
        &["product_sales_stg_to_dds_workflow"],
        cdm::settlement_report,
    ),
    mart(
        "courier_ledger_dds_to_cdm_workflow",
        &["courier_deliveries_stg_to_dds_workflow"],
        cdm::courier_ledger,
    ),
];

/// Every pipeline, each listed after all of its dependencies.
#[must_use]
pub fn entries() -> &'static [CatalogEntry] {
    &ENTRIES
}

#[must_use]
pub fn find(key: &str) -> Option<&'static CatalogEntry> {
    ENTRIES.iter().find(|e| e.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let keys: HashSet<&str> = entries().iter().map(|e| e.key).collect();
        assert_eq!(keys.len(), entries().len());
    }

    #[test]
    fn dependencies_precede_dependents() {
        let mut seen = HashSet::new();
        for entry in entries() {
            for dep in entry.depends_on {
                assert!(seen.contains(dep), "{} listed before its dependency {dep}", entry.key);
            }
            seen.insert(entry.key);
        }
    }

    #[test]
    fn layers_follow_key_suffixes() {
        for entry in entries() {
            let expected = match entry.layer {
                Layer::Stg => "_to_stg_workflow",
                Layer::Dds => "_to_dds_workflow",
                Layer::Cdm => "_to_cdm_workflow",
            };
            assert!(entry.key.ends_with(expected), "{}", entry.key);
            assert_eq!(entry.mode == RunMode::Drain, entry.layer == Layer::Cdm);
        }
    }

    #[test]
    fn only_source_backed_pipelines_take_a_start_date() {
        let seeded: Vec<&str> = entries().iter().filter(|e| e.uses_start_date).map(|e| e.key).collect();
        assert_eq!(
            seeded,
            [
                "bonussystem_events_origin_to_stg_workflow",
                "ordersystem_orders_origin_to_stg_workflow",
                "deliverysystem_deliveries_origin_to_stg_workflow",
            ]
        );
        assert!(find("orders_stg_to_dds_workflow").is_some());
        assert!(find("orders").is_none());
    }
}
