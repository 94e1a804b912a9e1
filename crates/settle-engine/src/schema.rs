//! Warehouse DDL for the staging, dimensional and mart layers.
//!
//! Every statement is idempotent. Templates use the dialect type tokens
//! expanded by [`Dialect::render_ddl`]. Foreign keys are not declared:
//! `SQLite` cannot reference tables of another attached schema, and the
//! gap filter already guarantees that referenced rows exist.

use settle_state::{CheckpointStore, Dialect, Session, StateError};

/// Layer schemas, in load order.
pub const LAYERS: [&str; 3] = ["stg", "dds", "cdm"];

const STG_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS stg.bonussystem_ranks (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    bonus_percent DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (bonus_percent >= 0),
    min_payment_threshold DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (min_payment_threshold >= 0)
)",
    r"CREATE TABLE IF NOT EXISTS stg.bonussystem_users (
    id INTEGER PRIMARY KEY,
    order_user_id TEXT NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.bonussystem_events (
    id INTEGER PRIMARY KEY,
    event_ts {timestamp} NOT NULL,
    event_type VARCHAR NOT NULL,
    event_value TEXT NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.ordersystem_restaurants (
    id {serial},
    object_id VARCHAR NOT NULL UNIQUE,
    object_value TEXT NOT NULL,
    update_ts {timestamp} NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.ordersystem_users (
    id {serial},
    object_id VARCHAR NOT NULL UNIQUE,
    object_value TEXT NOT NULL,
    update_ts {timestamp} NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.ordersystem_orders (
    id {serial},
    object_id VARCHAR NOT NULL UNIQUE,
    object_value TEXT NOT NULL,
    update_ts {timestamp} NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.deliverysystem_restaurants (
    id {serial},
    object_id VARCHAR NOT NULL UNIQUE,
    name VARCHAR NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.deliverysystem_couriers (
    id {serial},
    object_id VARCHAR NOT NULL UNIQUE,
    name VARCHAR NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS stg.deliverysystem_deliveries (
    id {serial},
    delivery_id VARCHAR NOT NULL UNIQUE,
    delivery_ts {timestamp} NOT NULL,
    delivery_value TEXT NOT NULL
)",
];

const DDS_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS dds.dm_users (
    id {serial},
    user_id VARCHAR NOT NULL UNIQUE,
    user_name VARCHAR NOT NULL,
    user_login VARCHAR NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS dds.dm_restaurants (
    id {serial},
    restaurant_id VARCHAR NOT NULL,
    restaurant_name VARCHAR NOT NULL,
    active_from {timestamp} NOT NULL,
    active_to {timestamp} NOT NULL,
    UNIQUE (restaurant_id, active_to)
)",
    r"CREATE TABLE IF NOT EXISTS dds.dm_timestamps (
    id {serial},
    ts {timestamp} NOT NULL UNIQUE,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL CHECK (month >= 1 AND month <= 12),
    day INTEGER NOT NULL CHECK (day >= 1 AND day <= 31),
    time {time} NOT NULL,
    date {date} NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS dds.dm_couriers (
    id {serial},
    courier_id VARCHAR NOT NULL UNIQUE,
    courier_name VARCHAR NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS dds.dm_products (
    id {serial},
    restaurant_id INTEGER NOT NULL,
    product_id VARCHAR NOT NULL,
    product_name VARCHAR NOT NULL,
    product_price DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (product_price >= 0),
    active_from {timestamp} NOT NULL,
    active_to {timestamp} NOT NULL,
    UNIQUE (product_id, active_to)
)",
    r"CREATE TABLE IF NOT EXISTS dds.dm_orders (
    id {serial},
    order_key VARCHAR NOT NULL UNIQUE,
    order_status VARCHAR NOT NULL,
    user_id INTEGER NOT NULL,
    restaurant_id INTEGER NOT NULL,
    timestamp_id INTEGER NOT NULL
)",
    r"CREATE TABLE IF NOT EXISTS dds.fct_product_sales (
    id {serial},
    product_id INTEGER NOT NULL,
    order_id INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    price DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (price >= 0),
    total_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (total_sum >= 0),
    bonus_payment DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (bonus_payment >= 0),
    bonus_grant DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (bonus_grant >= 0),
    UNIQUE (product_id, order_id)
)",
    r"CREATE TABLE IF NOT EXISTS dds.fct_deliveries (
    id {serial},
    courier_id INTEGER NOT NULL,
    order_id INTEGER NOT NULL,
    address VARCHAR NOT NULL,
    rate INTEGER NOT NULL CHECK (rate >= 1 AND rate <= 5),
    tip_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (tip_sum >= 0),
    sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (sum >= 0),
    UNIQUE (courier_id, order_id)
)",
];

const CDM_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS cdm.dm_settlement_report (
    id {serial},
    restaurant_id VARCHAR NOT NULL,
    restaurant_name VARCHAR NOT NULL,
    settlement_date {date} NOT NULL,
    orders_count INTEGER NOT NULL DEFAULT 0 CHECK (orders_count >= 0),
    orders_total_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (orders_total_sum >= 0),
    orders_bonus_payment_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (orders_bonus_payment_sum >= 0),
    orders_bonus_granted_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (orders_bonus_granted_sum >= 0),
    order_processing_fee DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (order_processing_fee >= 0),
    restaurant_reward_sum DOUBLE PRECISION NOT NULL DEFAULT 0,
    UNIQUE (settlement_date, restaurant_id)
)",
    r"CREATE TABLE IF NOT EXISTS cdm.dm_courier_ledger (
    id {serial},
    courier_id VARCHAR NOT NULL,
    courier_name VARCHAR NOT NULL,
    settlement_year INTEGER NOT NULL,
    settlement_month INTEGER NOT NULL CHECK (settlement_month >= 1 AND settlement_month <= 12),
    orders_count INTEGER NOT NULL DEFAULT 0 CHECK (orders_count >= 0),
    orders_total_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (orders_total_sum >= 0),
    rate_avg DOUBLE PRECISION NOT NULL DEFAULT 0,
    order_processing_fee DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (order_processing_fee >= 0),
    courier_order_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (courier_order_sum >= 0),
    courier_tips_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (courier_tips_sum >= 0),
    courier_reward_sum DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (courier_reward_sum >= 0),
    UNIQUE (settlement_year, settlement_month, courier_id)
)",
];

/// Every DDL statement of the warehouse, rendered for `dialect`.
///
/// # Errors
///
/// Returns [`StateError::InvalidIdentifier`] if a layer name is rejected
/// by the checkpoint store.
pub fn warehouse_ddl(dialect: Dialect) -> Result<Vec<String>, StateError> {
    let mut statements = Vec::new();
    if dialect == Dialect::Postgres {
        statements.extend(LAYERS.iter().map(|layer| format!("CREATE SCHEMA IF NOT EXISTS {layer}")));
    }
    for tables in [STG_TABLES, DDS_TABLES, CDM_TABLES] {
        statements.extend(tables.iter().map(|t| dialect.render_ddl(t)));
    }
    for layer in LAYERS {
        statements.push(CheckpointStore::new(layer)?.create_table_sql(dialect));
    }
    Ok(statements)
}

/// Apply the warehouse DDL through `session`.
///
/// # Errors
///
/// Returns a backend error if a statement fails.
pub fn apply(session: &mut dyn Session) -> Result<usize, StateError> {
    let statements = warehouse_ddl(session.dialect())?;
    for statement in &statements {
        session.batch_execute(statement)?;
    }
    tracing::debug!(statements = statements.len(), dialect = %session.dialect(), "Applied warehouse DDL");
    Ok(statements.len())
}
