//! Staging pipelines: copy the three source systems into `stg` as they are.
//!
//! Relational rows keep their columns, documents are stored whole as JSON
//! next to their id and update time, and delivery API objects keep their
//! identifying fields (deliveries are stored whole).

use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use settle_core::{Pipeline, PipelineError, Record};
use settle_dest_warehouse::{OnConflict, UpsertSpec, UpsertWriter};
use settle_source_document::DocumentBatchReader;
use settle_source_http::{HttpPagedReader, Resume};
use settle_source_sql::{KeysetQuery, SqlBatchReader};
use settle_state::{Row, SqlValue};
use settle_types::key::{KeyKind, KeySchema, KeyValue, Watermark};

use super::{text_at, timestamp_at, BuildContext};

// ---------------------------------------------------------------------------
// Bonus system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Rank {
    pub id: i64,
    pub name: String,
    pub bonus_percent: f64,
    pub min_payment_threshold: f64,
}

impl Record for Rank {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Int(self.id)])
    }
}

impl Rank {
    fn from_row(row: &Row) -> Result<Self, PipelineError> {
        Ok(Self {
            id: row.get_i64(0)?,
            name: row.get_string(1)?,
            bonus_percent: row.get_f64(2)?,
            min_payment_threshold: row.get_f64(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusUser {
    pub id: i64,
    pub order_user_id: String,
}

impl Record for BonusUser {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Int(self.id)])
    }
}

/// One row of the loyalty outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusEvent {
    pub id: i64,
    pub event_ts: NaiveDateTime,
    pub event_type: String,
    pub event_value: String,
}

impl Record for BonusEvent {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Timestamp(self.event_ts), KeyValue::Int(self.id)])
    }
}

fn id_schema() -> KeySchema {
    KeySchema::new([("id", KeyKind::Int)])
}

/// `bonussystem_ranks_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the bonus system is not configured.
pub fn bonus_ranks(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_source(
        ctx.connectors.bonus_system()?,
        KeysetQuery::new(
            "SELECT id, name, CAST(bonus_percent AS DOUBLE PRECISION), \
             CAST(min_payment_threshold AS DOUBLE PRECISION) FROM ranks",
            ["id"],
        ),
        Rank::from_row,
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "stg.bonussystem_ranks",
            ["id", "name", "bonus_percent", "min_payment_threshold"],
            ["id"],
            OnConflict::Update,
        ),
        |r: &Rank| {
            vec![
                r.id.into(),
                r.name.as_str().into(),
                r.bonus_percent.into(),
                r.min_payment_threshold.into(),
            ]
        },
    );
    Ok(Box::new(ctx.driver(id_schema(), reader, writer)?))
}

/// `bonussystem_users_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the bonus system is not configured.
pub fn bonus_users(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_source(
        ctx.connectors.bonus_system()?,
        KeysetQuery::new("SELECT id, order_user_id FROM users", ["id"]),
        |row: &Row| {
            Ok(BonusUser {
                id: row.get_i64(0)?,
                order_user_id: row.get_string(1)?,
            })
        },
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new("stg.bonussystem_users", ["id", "order_user_id"], ["id"], OnConflict::Update),
        |u: &BonusUser| vec![u.id.into(), u.order_user_id.as_str().into()],
    );
    Ok(Box::new(ctx.driver(id_schema(), reader, writer)?))
}

/// `bonussystem_events_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the bonus system is not configured.
pub fn bonus_events(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_source(
        ctx.connectors.bonus_system()?,
        KeysetQuery::new(
            "SELECT id, event_ts, event_type, event_value FROM outbox",
            ["event_ts", "id"],
        ),
        |row: &Row| {
            Ok(BonusEvent {
                id: row.get_i64(0)?,
                event_ts: row.get_timestamp(1)?,
                event_type: row.get_string(2)?,
                event_value: row.get_string(3)?,
            })
        },
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "stg.bonussystem_events",
            ["id", "event_ts", "event_type", "event_value"],
            ["id"],
            OnConflict::Update,
        ),
        |e: &BonusEvent| {
            vec![
                e.id.into(),
                e.event_ts.into(),
                e.event_type.as_str().into(),
                e.event_value.as_str().into(),
            ]
        },
    );
    let schema = KeySchema::new([("event_ts", KeyKind::Timestamp), ("id", KeyKind::Int)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}

// ---------------------------------------------------------------------------
// Order system
// ---------------------------------------------------------------------------

/// A document of the order system, kept whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSystemObject {
    pub object_id: String,
    pub object_value: String,
    pub update_ts: NaiveDateTime,
}

impl Record for OrderSystemObject {
    fn key(&self) -> Watermark {
        Watermark::new(vec![
            KeyValue::Timestamp(self.update_ts),
            KeyValue::Text(self.object_id.clone()),
        ])
    }
}

impl OrderSystemObject {
    fn from_document(doc: Value) -> Result<Self, PipelineError> {
        Ok(Self {
            object_id: text_at(&doc, "/_id")?,
            update_ts: timestamp_at(&doc, "/update_ts")?,
            object_value: doc.to_string(),
        })
    }
}

fn order_system(ctx: &BuildContext<'_>, collection: &str) -> Result<Box<dyn Pipeline>> {
    let schema = KeySchema::new([("update_ts", KeyKind::Timestamp), ("_id", KeyKind::ObjectId)]);
    let reader = DocumentBatchReader::new(
        ctx.connectors.order_collection(collection)?,
        schema.clone(),
        OrderSystemObject::from_document,
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            format!("stg.ordersystem_{collection}"),
            ["object_id", "object_value", "update_ts"],
            ["object_id"],
            OnConflict::Update,
        ),
        |o: &OrderSystemObject| {
            vec![
                o.object_id.as_str().into(),
                o.object_value.as_str().into(),
                o.update_ts.into(),
            ]
        },
    );
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}

/// `ordersystem_restaurants_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the order system is not configured.
pub fn order_restaurants(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    order_system(ctx, "restaurants")
}

/// `ordersystem_users_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the order system is not configured.
pub fn order_users(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    order_system(ctx, "users")
}

/// `ordersystem_orders_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the order system is not configured.
pub fn order_orders(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    order_system(ctx, "orders")
}

// ---------------------------------------------------------------------------
// Delivery system
// ---------------------------------------------------------------------------

/// A restaurant or courier of the delivery API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEntity {
    pub object_id: String,
    pub name: String,
}

impl Record for DeliveryEntity {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Text(self.object_id.clone())])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: String,
    pub delivery_ts: NaiveDateTime,
    pub delivery_value: String,
}

impl Record for Delivery {
    fn key(&self) -> Watermark {
        Watermark::new(vec![
            KeyValue::Timestamp(self.delivery_ts),
            KeyValue::Text(self.delivery_id.clone()),
        ])
    }
}

fn delivery_entities(ctx: &BuildContext<'_>, endpoint: &str) -> Result<Box<dyn Pipeline>> {
    let paging = ctx.connectors.delivery_paging();
    let reader = HttpPagedReader::new(
        ctx.connectors.delivery_api()?,
        format!("/{endpoint}"),
        "id",
        Resume::Offset,
        |v: Value| {
            Ok(DeliveryEntity {
                object_id: text_at(&v, "/_id")?,
                name: text_at(&v, "/name")?,
            })
        },
    )
    .with_page_size(paging.page_size)
    .with_retry(paging.retry);
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            format!("stg.deliverysystem_{endpoint}"),
            ["object_id", "name"],
            ["object_id"],
            OnConflict::Update,
        ),
        |e: &DeliveryEntity| vec![e.object_id.as_str().into(), e.name.as_str().into()],
    );
    let schema = KeySchema::new([("object_id", KeyKind::ObjectId)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?.tracking_offset()))
}

/// `deliverysystem_restaurants_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the delivery system is not configured.
pub fn delivery_restaurants(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    delivery_entities(ctx, "restaurants")
}

/// `deliverysystem_couriers_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the delivery system is not configured.
pub fn delivery_couriers(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    delivery_entities(ctx, "couriers")
}

/// `deliverysystem_deliveries_origin_to_stg_workflow`
///
/// # Errors
///
/// Returns an error if the delivery system is not configured.
pub fn delivery_deliveries(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let paging = ctx.connectors.delivery_paging();
    let reader = HttpPagedReader::new(
        ctx.connectors.delivery_api()?,
        "/deliveries",
        "date",
        Resume::From { param: "from" },
        |v: Value| {
            Ok(Delivery {
                delivery_id: text_at(&v, "/delivery_id")?,
                delivery_ts: timestamp_at(&v, "/delivery_ts")?,
                delivery_value: v.to_string(),
            })
        },
    )
    .with_page_size(paging.page_size)
    .with_retry(paging.retry);
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "stg.deliverysystem_deliveries",
            ["delivery_id", "delivery_ts", "delivery_value"],
            ["delivery_id"],
            OnConflict::DoNothing,
        ),
        |d: &Delivery| {
            vec![
                d.delivery_id.as_str().into(),
                SqlValue::Timestamp(d.delivery_ts),
                d.delivery_value.as_str().into(),
            ]
        },
    );
    let schema = KeySchema::new([("delivery_ts", KeyKind::Timestamp), ("delivery_id", KeyKind::Text)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}
