//! Dimensional pipelines: shape staged rows into `dds` dimensions and facts.
//!
//! Every reader goes through the warehouse transaction. Facts and the
//! dimensions that point at other entities carry a resolver; a record is
//! only written once everything it references is already in `dds`.

use anyhow::Result;
use chrono::{Datelike, NaiveDateTime};
use serde_json::Value;
use settle_core::{Pipeline, PipelineError, Record, ReferenceResolver, Resolution};
use settle_dest_warehouse::{OnConflict, ScdSpec, ScdWriter, UpsertSpec, UpsertWriter, Versioned};
use settle_source_sql::{KeysetQuery, NestedReader, SqlBatchReader};
use settle_state::{Row, Session, SqlValue};
use settle_types::key::{KeyKind, KeySchema, KeyValue, Watermark};

use super::lookup::{exists, latest_id};
use super::{f64_at, i64_at, json_column, text_at, timestamp_at, BuildContext};

/// Parent rows read per query when flattening nested arrays.
const PARENT_PAGE_SIZE: usize = 50;

/// A row of one of the `stg.ordersystem_*` tables.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedObject {
    pub object_id: String,
    pub value: Value,
    pub update_ts: NaiveDateTime,
}

impl StagedObject {
    fn from_row(row: &Row) -> Result<Self, PipelineError> {
        Ok(Self {
            object_id: row.get_string(0)?,
            value: json_column(row, 1)?,
            update_ts: row.get_timestamp(2)?,
        })
    }
}

fn staged_query(table: &str) -> KeysetQuery {
    KeysetQuery::new(
        format!("SELECT object_id, object_value, update_ts FROM {table}"),
        ["update_ts", "object_id"],
    )
}

fn staged_schema() -> KeySchema {
    KeySchema::new([("update_ts", KeyKind::Timestamp), ("object_id", KeyKind::ObjectId)])
}

fn staged_key(update_ts: NaiveDateTime, object_id: &str) -> Watermark {
    Watermark::new(vec![KeyValue::Timestamp(update_ts), KeyValue::Text(object_id.to_string())])
}

fn fk(value: Option<i64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Int)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdsUser {
    pub user_id: String,
    pub user_name: String,
    pub user_login: String,
    pub update_ts: NaiveDateTime,
}

impl Record for DdsUser {
    fn key(&self) -> Watermark {
        staged_key(self.update_ts, &self.user_id)
    }
}

impl TryFrom<StagedObject> for DdsUser {
    type Error = PipelineError;

    fn try_from(staged: StagedObject) -> Result<Self, PipelineError> {
        Ok(Self {
            user_name: text_at(&staged.value, "/name")?,
            user_login: text_at(&staged.value, "/login")?,
            user_id: staged.object_id,
            update_ts: staged.update_ts,
        })
    }
}

/// Admits a user once the loyalty system knows it.
struct BonusAccountKnown;

impl ReferenceResolver<DdsUser> for BonusAccountKnown {
    fn resolve(&mut self, session: &mut dyn Session, user: &mut DdsUser) -> Result<Resolution, PipelineError> {
        if exists(session, "stg.bonussystem_users", "order_user_id", user.user_id.as_str().into())? {
            Ok(Resolution::Resolved)
        } else {
            Ok(Resolution::missing(format!("bonus account of user {}", user.user_id)))
        }
    }
}

/// `users_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn users(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(staged_query("stg.ordersystem_users"), |row: &Row| {
        DdsUser::try_from(StagedObject::from_row(row)?)
    });
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.dm_users",
            ["user_id", "user_name", "user_login"],
            ["user_id"],
            OnConflict::Update,
        ),
        |u: &DdsUser| {
            vec![
                u.user_id.as_str().into(),
                u.user_name.as_str().into(),
                u.user_login.as_str().into(),
            ]
        },
    );
    let driver = ctx.driver(staged_schema(), reader, writer)?.with_resolver(BonusAccountKnown);
    Ok(Box::new(driver))
}

// ---------------------------------------------------------------------------
// Restaurants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdsRestaurant {
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub update_ts: NaiveDateTime,
}

impl Record for DdsRestaurant {
    fn key(&self) -> Watermark {
        staged_key(self.update_ts, &self.restaurant_id)
    }
}

/// Admits a restaurant once the delivery system lists it.
struct DeliveryPartnerKnown;

impl ReferenceResolver<DdsRestaurant> for DeliveryPartnerKnown {
    fn resolve(
        &mut self,
        session: &mut dyn Session,
        restaurant: &mut DdsRestaurant,
    ) -> Result<Resolution, PipelineError> {
        let id = restaurant.restaurant_id.as_str();
        if exists(session, "stg.deliverysystem_restaurants", "object_id", id.into())? {
            Ok(Resolution::Resolved)
        } else {
            Ok(Resolution::missing(format!("delivery restaurant {id}")))
        }
    }
}

/// `restaurants_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn restaurants(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(staged_query("stg.ordersystem_restaurants"), |row: &Row| {
        let staged = StagedObject::from_row(row)?;
        Ok(DdsRestaurant {
            restaurant_name: text_at(&staged.value, "/name")?,
            restaurant_id: staged.object_id,
            update_ts: staged.update_ts,
        })
    });
    let writer = ScdWriter::new(
        ScdSpec::new("dds.dm_restaurants", "restaurant_id", ["restaurant_name"]),
        |r: &DdsRestaurant| Versioned {
            natural_key: r.restaurant_id.as_str().into(),
            payload: vec![r.restaurant_name.as_str().into()],
            valid_from: r.update_ts,
        },
    );
    let driver = ctx.driver(staged_schema(), reader, writer)?.with_resolver(DeliveryPartnerKnown);
    Ok(Box::new(driver))
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// The placement time of a staged order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTimestamp {
    pub order_id: String,
    pub update_ts: NaiveDateTime,
    pub ts: NaiveDateTime,
}

impl Record for OrderTimestamp {
    fn key(&self) -> Watermark {
        staged_key(self.update_ts, &self.order_id)
    }
}

/// `timestamps_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn timestamps(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(staged_query("stg.ordersystem_orders"), |row: &Row| {
        let staged = StagedObject::from_row(row)?;
        Ok(OrderTimestamp {
            ts: timestamp_at(&staged.value, "/date")?,
            order_id: staged.object_id,
            update_ts: staged.update_ts,
        })
    });
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.dm_timestamps",
            ["ts", "year", "month", "day", "time", "date"],
            ["ts"],
            OnConflict::DoNothing,
        ),
        |t: &OrderTimestamp| {
            vec![
                t.ts.into(),
                t.ts.year().into(),
                t.ts.month().into(),
                t.ts.day().into(),
                t.ts.time().into(),
                t.ts.date().into(),
            ]
        },
    );
    Ok(Box::new(ctx.driver(staged_schema(), reader, writer)?))
}

// ---------------------------------------------------------------------------
// Couriers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCourier {
    pub id: i64,
    pub courier_id: String,
    pub courier_name: String,
}

impl Record for StagedCourier {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Int(self.id)])
    }
}

/// `couriers_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn couriers(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(
        KeysetQuery::new("SELECT id, object_id, name FROM stg.deliverysystem_couriers", ["id"]),
        |row: &Row| {
            Ok(StagedCourier {
                id: row.get_i64(0)?,
                courier_id: row.get_string(1)?,
                courier_name: row.get_string(2)?,
            })
        },
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.dm_couriers",
            ["courier_id", "courier_name"],
            ["courier_id"],
            OnConflict::Update,
        ),
        |c: &StagedCourier| vec![c.courier_id.as_str().into(), c.courier_name.as_str().into()],
    );
    let schema = KeySchema::new([("id", KeyKind::Int)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// A menu item of a staged restaurant.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub update_ts: NaiveDateTime,
    pub restaurant_id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_price: f64,
    /// Surrogate key of the current restaurant version, once resolved.
    pub restaurant_fk: Option<i64>,
}

impl Record for Product {
    fn key(&self) -> Watermark {
        Watermark::new(vec![
            KeyValue::Timestamp(self.update_ts),
            KeyValue::Text(self.restaurant_id.clone()),
            KeyValue::Text(self.product_id.clone()),
        ])
    }
}

fn menu_items(restaurant: StagedObject) -> Result<Vec<Product>, PipelineError> {
    let Some(menu) = restaurant.value.get("menu").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    menu.iter()
        .map(|item| {
            Ok(Product {
                update_ts: restaurant.update_ts,
                restaurant_id: restaurant.object_id.clone(),
                product_id: text_at(item, "/_id")?,
                product_name: text_at(item, "/name")?,
                product_price: f64_at(item, "/price")?,
                restaurant_fk: None,
            })
        })
        .collect()
}

struct RestaurantDimension;

impl ReferenceResolver<Product> for RestaurantDimension {
    fn resolve(&mut self, session: &mut dyn Session, product: &mut Product) -> Result<Resolution, PipelineError> {
        let id = product.restaurant_id.as_str();
        product.restaurant_fk = latest_id(session, "dds.dm_restaurants", "restaurant_id", id.into())?;
        Ok(match product.restaurant_fk {
            Some(_) => Resolution::Resolved,
            None => Resolution::missing(format!("restaurant {id}")),
        })
    }
}

/// `products_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn products(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let parents = SqlBatchReader::over_warehouse(
        staged_query("stg.ordersystem_restaurants").inclusive(),
        StagedObject::from_row,
    );
    let reader = NestedReader::new(parents, PARENT_PAGE_SIZE, menu_items);
    let writer = ScdWriter::new(
        ScdSpec::new(
            "dds.dm_products",
            "product_id",
            ["product_name", "product_price", "restaurant_id"],
        ),
        |p: &Product| Versioned {
            natural_key: p.product_id.as_str().into(),
            payload: vec![
                p.product_name.as_str().into(),
                p.product_price.into(),
                fk(p.restaurant_fk),
            ],
            valid_from: p.update_ts,
        },
    );
    let schema = KeySchema::new([
        ("update_ts", KeyKind::Timestamp),
        ("restaurant_id", KeyKind::ObjectId),
        ("product_id", KeyKind::ObjectId),
    ]);
    let driver = ctx.driver(schema, reader, writer)?.with_resolver(RestaurantDimension);
    Ok(Box::new(driver))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdsOrder {
    pub order_key: String,
    pub order_status: String,
    pub user_id: String,
    pub restaurant_id: String,
    pub ts: NaiveDateTime,
    pub update_ts: NaiveDateTime,
    pub user_fk: Option<i64>,
    pub restaurant_fk: Option<i64>,
    pub timestamp_fk: Option<i64>,
}

impl Record for DdsOrder {
    fn key(&self) -> Watermark {
        staged_key(self.update_ts, &self.order_key)
    }
}

impl TryFrom<StagedObject> for DdsOrder {
    type Error = PipelineError;

    fn try_from(staged: StagedObject) -> Result<Self, PipelineError> {
        let order = &staged.value;
        Ok(Self {
            order_status: text_at(order, "/final_status")?,
            user_id: text_at(order, "/user/id")?,
            restaurant_id: text_at(order, "/restaurant/id")?,
            ts: timestamp_at(order, "/date")?,
            order_key: staged.object_id,
            update_ts: staged.update_ts,
            user_fk: None,
            restaurant_fk: None,
            timestamp_fk: None,
        })
    }
}

struct OrderDimensions;

impl ReferenceResolver<DdsOrder> for OrderDimensions {
    fn resolve(&mut self, session: &mut dyn Session, order: &mut DdsOrder) -> Result<Resolution, PipelineError> {
        order.user_fk = latest_id(session, "dds.dm_users", "user_id", order.user_id.as_str().into())?;
        if order.user_fk.is_none() {
            return Ok(Resolution::missing(format!("user {}", order.user_id)));
        }
        order.restaurant_fk =
            latest_id(session, "dds.dm_restaurants", "restaurant_id", order.restaurant_id.as_str().into())?;
        if order.restaurant_fk.is_none() {
            return Ok(Resolution::missing(format!("restaurant {}", order.restaurant_id)));
        }
        order.timestamp_fk = latest_id(session, "dds.dm_timestamps", "ts", order.ts.into())?;
        if order.timestamp_fk.is_none() {
            return Ok(Resolution::missing(format!("timestamp {}", order.ts)));
        }
        Ok(Resolution::Resolved)
    }
}

/// `orders_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn orders(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(staged_query("stg.ordersystem_orders"), |row: &Row| {
        DdsOrder::try_from(StagedObject::from_row(row)?)
    });
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.dm_orders",
            ["order_key", "order_status", "user_id", "restaurant_id", "timestamp_id"],
            ["order_key"],
            OnConflict::Update,
        ),
        |o: &DdsOrder| {
            vec![
                o.order_key.as_str().into(),
                o.order_status.as_str().into(),
                fk(o.user_fk),
                fk(o.restaurant_fk),
                fk(o.timestamp_fk),
            ]
        },
    );
    let driver = ctx.driver(staged_schema(), reader, writer)?.with_resolver(OrderDimensions);
    Ok(Box::new(driver))
}

// ---------------------------------------------------------------------------
// Product sales
// ---------------------------------------------------------------------------

/// A `bonus_transaction` event of the loyalty outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct BonusTransaction {
    pub event_id: i64,
    pub event_ts: NaiveDateTime,
    pub value: Value,
}

/// One product line of a bonus transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSale {
    pub event_ts: NaiveDateTime,
    pub event_id: i64,
    pub product_id: String,
    pub order_key: String,
    pub price: f64,
    pub quantity: i64,
    pub bonus_payment: f64,
    pub bonus_grant: f64,
    pub order_fk: Option<i64>,
    pub product_fk: Option<i64>,
}

impl Record for ProductSale {
    fn key(&self) -> Watermark {
        Watermark::new(vec![
            KeyValue::Timestamp(self.event_ts),
            KeyValue::Int(self.event_id),
            KeyValue::Text(self.product_id.clone()),
        ])
    }
}

impl ProductSale {
    #[allow(clippy::cast_precision_loss)]
    fn total_sum(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

fn product_payments(event: BonusTransaction) -> Result<Vec<ProductSale>, PipelineError> {
    let order_key = text_at(&event.value, "/order_id")?;
    let Some(payments) = event.value.get("product_payments").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    payments
        .iter()
        .map(|line| {
            Ok(ProductSale {
                event_ts: event.event_ts,
                event_id: event.event_id,
                product_id: text_at(line, "/product_id")?,
                order_key: order_key.clone(),
                price: f64_at(line, "/price")?,
                quantity: i64_at(line, "/quantity")?,
                bonus_payment: f64_at(line, "/bonus_payment")?,
                bonus_grant: f64_at(line, "/bonus_grant")?,
                order_fk: None,
                product_fk: None,
            })
        })
        .collect()
}

struct SaleDimensions;

impl ReferenceResolver<ProductSale> for SaleDimensions {
    fn resolve(&mut self, session: &mut dyn Session, sale: &mut ProductSale) -> Result<Resolution, PipelineError> {
        sale.order_fk = latest_id(session, "dds.dm_orders", "order_key", sale.order_key.as_str().into())?;
        if sale.order_fk.is_none() {
            return Ok(Resolution::missing(format!("order {}", sale.order_key)));
        }
        sale.product_fk = latest_id(session, "dds.dm_products", "product_id", sale.product_id.as_str().into())?;
        if sale.product_fk.is_none() {
            return Ok(Resolution::missing(format!("product {}", sale.product_id)));
        }
        Ok(Resolution::Resolved)
    }
}

/// `product_sales_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn product_sales(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let parents = SqlBatchReader::over_warehouse(
        KeysetQuery::new(
            "SELECT id, event_ts, event_value FROM stg.bonussystem_events \
             WHERE event_type = 'bonus_transaction' AND {keyset}",
            ["event_ts", "id"],
        )
        .inclusive(),
        |row: &Row| {
            Ok(BonusTransaction {
                event_id: row.get_i64(0)?,
                event_ts: row.get_timestamp(1)?,
                value: json_column(row, 2)?,
            })
        },
    );
    let reader = NestedReader::new(parents, PARENT_PAGE_SIZE, product_payments);
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.fct_product_sales",
            ["product_id", "order_id", "count", "price", "total_sum", "bonus_payment", "bonus_grant"],
            ["product_id", "order_id"],
            OnConflict::DoNothing,
        ),
        |s: &ProductSale| {
            vec![
                fk(s.product_fk),
                fk(s.order_fk),
                s.quantity.into(),
                s.price.into(),
                s.total_sum().into(),
                s.bonus_payment.into(),
                s.bonus_grant.into(),
            ]
        },
    );
    let schema = KeySchema::new([
        ("event_ts", KeyKind::Timestamp),
        ("event_id", KeyKind::Int),
        ("product_id", KeyKind::ObjectId),
    ]);
    let driver = ctx.driver(schema, reader, writer)?.with_resolver(SaleDimensions);
    Ok(Box::new(driver))
}

// ---------------------------------------------------------------------------
// Courier deliveries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CourierDelivery {
    pub id: i64,
    pub order_key: String,
    pub courier_key: String,
    pub address: String,
    pub rate: i64,
    pub sum: f64,
    pub tip_sum: f64,
    pub order_fk: Option<i64>,
    pub courier_fk: Option<i64>,
}

impl Record for CourierDelivery {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Int(self.id)])
    }
}

impl CourierDelivery {
    fn from_row(row: &Row) -> Result<Self, PipelineError> {
        let delivery = json_column(row, 1)?;
        Ok(Self {
            id: row.get_i64(0)?,
            order_key: text_at(&delivery, "/order_id")?,
            courier_key: text_at(&delivery, "/courier_id")?,
            address: text_at(&delivery, "/address")?,
            rate: i64_at(&delivery, "/rate")?,
            sum: f64_at(&delivery, "/sum")?,
            tip_sum: f64_at(&delivery, "/tip_sum")?,
            order_fk: None,
            courier_fk: None,
        })
    }
}

struct DeliveryDimensions;

impl ReferenceResolver<CourierDelivery> for DeliveryDimensions {
    fn resolve(
        &mut self,
        session: &mut dyn Session,
        delivery: &mut CourierDelivery,
    ) -> Result<Resolution, PipelineError> {
        delivery.order_fk = latest_id(session, "dds.dm_orders", "order_key", delivery.order_key.as_str().into())?;
        if delivery.order_fk.is_none() {
            return Ok(Resolution::missing(format!("order {}", delivery.order_key)));
        }
        delivery.courier_fk =
            latest_id(session, "dds.dm_couriers", "courier_id", delivery.courier_key.as_str().into())?;
        if delivery.courier_fk.is_none() {
            return Ok(Resolution::missing(format!("courier {}", delivery.courier_key)));
        }
        Ok(Resolution::Resolved)
    }
}

/// `courier_deliveries_stg_to_dds_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn courier_deliveries(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(
        KeysetQuery::new("SELECT id, delivery_value FROM stg.deliverysystem_deliveries", ["id"]),
        CourierDelivery::from_row,
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "dds.fct_deliveries",
            ["courier_id", "order_id", "address", "rate", "tip_sum", "sum"],
            ["courier_id", "order_id"],
            OnConflict::DoNothing,
        ),
        |d: &CourierDelivery| {
            vec![
                fk(d.courier_fk),
                fk(d.order_fk),
                d.address.as_str().into(),
                d.rate.into(),
                d.tip_sum.into(),
                d.sum.into(),
            ]
        },
    );
    let schema = KeySchema::new([("id", KeyKind::Int)]);
    let driver = ctx.driver(schema, reader, writer)?.with_resolver(DeliveryDimensions);
    Ok(Box::new(driver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::StaticConnectors;
    use crate::schema;
    use serde_json::json;
    use settle_core::{Progress, RunMode};
    use settle_state::sqlite::SqliteWarehouse;
    use settle_state::Dialect;
    use std::time::Duration;

    fn context<'a>(key: &'static str, limit: usize, connectors: &'a StaticConnectors) -> BuildContext<'a> {
        BuildContext {
            key,
            layer: "dds",
            dialect: Dialect::Sqlite,
            mode: RunMode::Single,
            limit,
            stall_alarm: Duration::from_secs(3600),
            connectors,
        }
    }

    fn warehouse() -> SqliteWarehouse {
        let mut wh = SqliteWarehouse::in_memory(&schema::LAYERS).unwrap();
        schema::apply(&mut wh).unwrap();
        wh
    }

    fn stage(wh: &mut SqliteWarehouse, table: &str, id: &str, value: &Value, update_ts: &str) {
        wh.execute(
            &format!("INSERT INTO {table} (object_id, object_value, update_ts) VALUES ($1, $2, $3)"),
            &[
                id.into(),
                value.to_string().into(),
                settle_types::key::parse_timestamp(update_ts).unwrap().into(),
            ],
        )
        .unwrap();
    }

    fn scalar(wh: &mut SqliteWarehouse, sql: &str) -> i64 {
        wh.query_opt(sql, &[]).unwrap().unwrap().get_i64(0).unwrap()
    }

    #[test]
    fn users_wait_for_their_bonus_account() {
        let mut wh = warehouse();
        stage(&mut wh, "stg.ordersystem_users", "u1", &json!({ "name": "Ann", "login": "ann" }), "2022-05-01 10:00:00");
        stage(&mut wh, "stg.ordersystem_users", "u2", &json!({ "name": "Bob", "login": "bob" }), "2022-05-01 11:00:00");
        stage(&mut wh, "stg.ordersystem_users", "u3", &json!({ "name": "Cat", "login": "cat" }), "2022-05-01 12:00:00");
        wh.batch_execute("INSERT INTO stg.bonussystem_users (id, order_user_id) VALUES (1, 'u1'), (3, 'u3')")
            .unwrap();

        let connectors = StaticConnectors::new();
        let mut pipeline = users(&context("users_stg_to_dds_workflow", 10, &connectors)).unwrap();
        let outcome = pipeline.run(&mut wh, None).unwrap();
        assert_eq!(outcome.progress, Progress::Advanced);
        assert_eq!(outcome.stats.records_written, 1);
        assert_eq!(outcome.stats.records_held_back, 2);
        assert_eq!(scalar(&mut wh, "SELECT COUNT(*) FROM dds.dm_users"), 1);

        let blocked = pipeline.run(&mut wh, None).unwrap();
        assert_eq!(blocked.progress, Progress::Stalled);
        assert!(blocked.checkpoint_after.stall.is_some());

        wh.batch_execute("INSERT INTO stg.bonussystem_users (id, order_user_id) VALUES (2, 'u2')")
            .unwrap();
        let resumed = pipeline.run(&mut wh, None).unwrap();
        assert_eq!(resumed.stats.records_written, 2);
        assert!(resumed.checkpoint_after.stall.is_none());
    }

    #[test]
    fn restaurant_renames_open_new_product_versions() {
        let mut wh = warehouse();
        wh.batch_execute("INSERT INTO stg.deliverysystem_restaurants (object_id, name) VALUES ('r1', 'Oak')")
            .unwrap();
        let menu = |price: f64| json!({ "name": "Oak", "menu": [{ "_id": "p1", "name": "Soup", "price": price }] });
        stage(&mut wh, "stg.ordersystem_restaurants", "r1", &menu(100.0), "2022-05-01 10:00:00");

        let connectors = StaticConnectors::new();
        let mut dims = restaurants(&context("restaurants_stg_to_dds_workflow", 10, &connectors)).unwrap();
        let mut items = products(&context("products_stg_to_dds_workflow", 10, &connectors)).unwrap();
        dims.run(&mut wh, None).unwrap();
        assert_eq!(items.run(&mut wh, None).unwrap().stats.records_written, 1);

        wh.execute(
            "UPDATE stg.ordersystem_restaurants SET object_value = $1, update_ts = $2 WHERE object_id = 'r1'",
            &[
                menu(120.0).to_string().into(),
                settle_types::key::parse_timestamp("2022-05-03 10:00:00").unwrap().into(),
            ],
        )
        .unwrap();
        dims.run(&mut wh, None).unwrap();
        items.run(&mut wh, None).unwrap();

        assert_eq!(scalar(&mut wh, "SELECT COUNT(*) FROM dds.dm_products WHERE product_id = 'p1'"), 2);
        let open = wh
            .query_opt(
                "SELECT product_price FROM dds.dm_products WHERE product_id = 'p1' \
                 AND active_to > '2099-01-01'",
                &[],
            )
            .unwrap()
            .unwrap();
        assert!((open.get_f64(0).unwrap() - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn products_wait_for_the_restaurant_dimension() {
        let mut wh = warehouse();
        let value = json!({ "name": "Oak", "menu": [{ "_id": "p1", "name": "Soup", "price": 10 }] });
        stage(&mut wh, "stg.ordersystem_restaurants", "r1", &value, "2022-05-01 10:00:00");
        let connectors = StaticConnectors::new();
        let mut items = products(&context("products_stg_to_dds_workflow", 10, &connectors)).unwrap();
        let outcome = items.run(&mut wh, None).unwrap();
        assert_eq!(outcome.progress, Progress::Stalled);
        assert_eq!(scalar(&mut wh, "SELECT COUNT(*) FROM dds.dm_products"), 0);
    }

    #[test]
    fn sale_lines_of_one_event_span_batches() {
        let mut wh = warehouse();
        wh.batch_execute(
            "INSERT INTO dds.dm_orders (order_key, order_status, user_id, restaurant_id, timestamp_id)
                 VALUES ('o1', 'CLOSED', 1, 1, 1);
             INSERT INTO dds.dm_products (restaurant_id, product_id, product_name, product_price, active_from, active_to)
                 VALUES (1, 'p1', 'Soup', 10, '2022-01-01 00:00:00.000000', '2099-12-31 00:00:00.000000'),
                        (1, 'p2', 'Tea', 5, '2022-01-01 00:00:00.000000', '2099-12-31 00:00:00.000000');",
        )
        .unwrap();
        let event = json!({
            "order_id": "o1",
            "product_payments": [
                { "product_id": "p2", "price": 5, "quantity": 2, "bonus_payment": 0, "bonus_grant": 1 },
                { "product_id": "p1", "price": 10, "quantity": 1, "bonus_payment": 3, "bonus_grant": 0 }
            ]
        });
        wh.execute(
            "INSERT INTO stg.bonussystem_events (id, event_ts, event_type, event_value) VALUES (7, $1, 'bonus_transaction', $2)",
            &[
                settle_types::key::parse_timestamp("2022-05-01 10:00:00").unwrap().into(),
                event.to_string().into(),
            ],
        )
        .unwrap();

        let connectors = StaticConnectors::new();
        let mut sales = product_sales(&context("product_sales_stg_to_dds_workflow", 1, &connectors)).unwrap();
        assert_eq!(sales.run(&mut wh, None).unwrap().stats.records_written, 1);
        assert_eq!(sales.run(&mut wh, None).unwrap().stats.records_written, 1);
        assert_eq!(sales.run(&mut wh, None).unwrap().progress, Progress::NoRows);

        let row = wh
            .query_opt("SELECT SUM(total_sum), SUM(bonus_payment) FROM dds.fct_product_sales", &[])
            .unwrap()
            .unwrap();
        assert!((row.get_f64(0).unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((row.get_f64(1).unwrap() - 3.0).abs() < f64::EPSILON);
    }
}
