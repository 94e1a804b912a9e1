//! Semantic validation for parsed configuration values.

use anyhow::{bail, Result};

use crate::catalog::{self, SourceSystem};
use crate::config::types::{DeliverySystemConfig, OrderSystemConfig, SettleConfig};

fn validate_delivery(delivery: &DeliverySystemConfig, errors: &mut Vec<String>) {
    let url = delivery.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(format!(
            "sources.delivery_system.base_url '{}' must start with http:// or https://",
            delivery.base_url
        ));
    }
    if delivery.page_size == 0 {
        errors.push("sources.delivery_system.page_size must be > 0".to_string());
    }
    if delivery.max_attempts == 0 {
        errors.push("sources.delivery_system.max_attempts must be > 0".to_string());
    }
    if delivery.timeout_secs == 0 {
        errors.push("sources.delivery_system.timeout_secs must be > 0".to_string());
    }
}

fn validate_orders(orders: &OrderSystemConfig, errors: &mut Vec<String>) {
    match (&orders.uri, &orders.export_dir) {
        (Some(_), Some(_)) => {
            errors.push("sources.order_system takes either uri or export_dir, not both".to_string());
        }
        (None, None) => errors.push("sources.order_system needs uri or export_dir".to_string()),
        (Some(uri), None) => {
            if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
                errors.push(format!(
                    "sources.order_system.uri '{uri}' must start with mongodb:// or mongodb+srv://"
                ));
            }
        }
        (None, Some(dir)) => {
            if dir.as_os_str().is_empty() {
                errors.push("sources.order_system.export_dir must not be empty".to_string());
            }
            if orders.database.is_some() {
                errors.push("sources.order_system.database only applies with uri".to_string());
            }
        }
    }
}

/// Whether the source a pipeline reads from is configured.
fn source_configured(config: &SettleConfig, source: SourceSystem) -> bool {
    match source {
        SourceSystem::BonusSystem => config.sources.bonus_system.is_some(),
        SourceSystem::OrderSystem => config.sources.order_system.is_some(),
        SourceSystem::DeliverySystem => config.sources.delivery_system.is_some(),
        SourceSystem::Warehouse => true,
    }
}

/// Validate a parsed configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_config(config: &SettleConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported configuration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.warehouse.connection.trim().is_empty() {
        errors.push("warehouse.connection must not be empty".to_string());
    }

    if config.stall_alarm_after_secs == 0 {
        errors.push("stall_alarm_after_secs must be > 0".to_string());
    }

    if let Some(bonus) = &config.sources.bonus_system {
        if bonus.connection.trim().is_empty() {
            errors.push("sources.bonus_system.connection must not be empty".to_string());
        }
    }
    if let Some(orders) = &config.sources.order_system {
        validate_orders(orders, &mut errors);
    }
    if let Some(delivery) = &config.sources.delivery_system {
        validate_delivery(delivery, &mut errors);
    }

    for (key, settings) in &config.pipelines {
        if catalog::find(key).is_none() {
            errors.push(format!("Unknown pipeline '{key}'"));
        }
        if settings.batch_limit == Some(0) {
            errors.push(format!("pipelines.{key}.batch_limit must be > 0"));
        }
    }

    for entry in catalog::entries() {
        if config.is_enabled(entry.key) && !source_configured(config, entry.source) {
            errors.push(format!(
                "Pipeline '{}' is enabled but sources.{} is not configured",
                entry.key,
                entry.source.as_str()
            ));
        }
    }

    if !errors.is_empty() {
        bail!("Configuration validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}
