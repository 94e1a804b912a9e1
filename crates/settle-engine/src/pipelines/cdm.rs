//! Mart pipelines: the restaurant settlement report and the courier ledger.
//!
//! Both aggregate `dds` facts per period and run in drain mode with an
//! inclusive period bound, so the latest period is recomputed on every run
//! and its row overwritten.

use anyhow::Result;
use chrono::NaiveDate;
use settle_core::{Pipeline, PipelineError, Record};
use settle_dest_warehouse::{OnConflict, UpsertSpec, UpsertWriter};
use settle_source_sql::{KeysetQuery, SqlBatchReader};
use settle_state::{Dialect, Row};
use settle_types::key::{KeyKind, KeySchema, KeyValue, Watermark};

use super::BuildContext;

/// Share of an order total kept as the processing fee.
pub const PROCESSING_FEE_SHARE: f64 = 0.25;

/// Share of tips passed on to the courier.
pub const COURIER_TIP_SHARE: f64 = 0.95;

/// Per-order courier payout for couriers whose monthly average rate is
/// below `below` (the last tier has no upper bound).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayoutTier {
    pub below: Option<f64>,
    pub share: f64,
    pub minimum: f64,
}

pub const PAYOUT_TIERS: [PayoutTier; 4] = [
    PayoutTier { below: Some(4.0), share: 0.05, minimum: 100.0 },
    PayoutTier { below: Some(4.5), share: 0.07, minimum: 150.0 },
    PayoutTier { below: Some(4.9), share: 0.08, minimum: 175.0 },
    PayoutTier { below: None, share: 0.10, minimum: 200.0 },
];

/// Payout for one order of `sum` delivered by a courier rated `rate_avg`.
#[must_use]
pub fn payout_for(rate_avg: f64, sum: f64) -> f64 {
    let tier = PAYOUT_TIERS
        .iter()
        .find(|t| t.below.map_or(true, |below| rate_avg < below))
        .unwrap_or(&PAYOUT_TIERS[PAYOUT_TIERS.len() - 1]);
    (sum * tier.share).max(tier.minimum)
}

/// SQL `CASE` computing [`payout_for`] over `rate` and `sum` expressions.
fn payout_case(dialect: Dialect, rate: &str, sum: &str) -> String {
    let greatest = dialect.greatest();
    let mut case = String::from("CASE");
    for tier in &PAYOUT_TIERS {
        let amount = format!("{greatest}({sum} * {}, {})", tier.share, tier.minimum);
        match tier.below {
            Some(below) => case.push_str(&format!(" WHEN {rate} < {below} THEN {amount}")),
            None => case.push_str(&format!(" ELSE {amount}")),
        }
    }
    case.push_str(" END");
    case
}

// ---------------------------------------------------------------------------
// Settlement report
// ---------------------------------------------------------------------------

const SETTLEMENT_SQL: &str = "\
SELECT t.date, r.restaurant_id, \
(SELECT cur.restaurant_name FROM dds.dm_restaurants cur \
WHERE cur.restaurant_id = r.restaurant_id ORDER BY cur.active_to DESC LIMIT 1), \
COUNT(DISTINCT o.id), SUM(s.total_sum), SUM(s.bonus_payment), SUM(s.bonus_grant) \
FROM dds.fct_product_sales s \
JOIN dds.dm_orders o ON o.id = s.order_id \
JOIN dds.dm_timestamps t ON t.id = o.timestamp_id \
JOIN dds.dm_restaurants r ON r.id = o.restaurant_id \
WHERE o.order_status = 'CLOSED' AND {keyset} \
GROUP BY t.date, r.restaurant_id";

/// One restaurant's closed orders of one day.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRow {
    pub settlement_date: NaiveDate,
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub orders_count: i64,
    pub orders_total_sum: f64,
    pub orders_bonus_payment_sum: f64,
    pub orders_bonus_granted_sum: f64,
}

impl Record for SettlementRow {
    fn key(&self) -> Watermark {
        Watermark::new(vec![KeyValue::Date(self.settlement_date)])
    }
}

impl SettlementRow {
    fn from_row(row: &Row) -> Result<Self, PipelineError> {
        Ok(Self {
            settlement_date: row.get_date(0)?,
            restaurant_id: row.get_string(1)?,
            restaurant_name: row.get_string(2)?,
            orders_count: row.get_i64(3)?,
            orders_total_sum: row.get_f64(4)?,
            orders_bonus_payment_sum: row.get_f64(5)?,
            orders_bonus_granted_sum: row.get_f64(6)?,
        })
    }

    #[must_use]
    pub fn order_processing_fee(&self) -> f64 {
        self.orders_total_sum * PROCESSING_FEE_SHARE
    }

    #[must_use]
    pub fn restaurant_reward_sum(&self) -> f64 {
        self.orders_total_sum - self.order_processing_fee() - self.orders_bonus_payment_sum
    }
}

/// `settlement_report_dds_to_cdm_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn settlement_report(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(
        KeysetQuery::new(SETTLEMENT_SQL, ["t.date"])
            .inclusive()
            .then_order_by(["r.restaurant_id"]),
        SettlementRow::from_row,
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "cdm.dm_settlement_report",
            [
                "restaurant_id",
                "restaurant_name",
                "settlement_date",
                "orders_count",
                "orders_total_sum",
                "orders_bonus_payment_sum",
                "orders_bonus_granted_sum",
                "order_processing_fee",
                "restaurant_reward_sum",
            ],
            ["settlement_date", "restaurant_id"],
            OnConflict::Update,
        ),
        |r: &SettlementRow| {
            vec![
                r.restaurant_id.as_str().into(),
                r.restaurant_name.as_str().into(),
                r.settlement_date.into(),
                r.orders_count.into(),
                r.orders_total_sum.into(),
                r.orders_bonus_payment_sum.into(),
                r.orders_bonus_granted_sum.into(),
                r.order_processing_fee().into(),
                r.restaurant_reward_sum().into(),
            ]
        },
    );
    let schema = KeySchema::new([("settlement_date", KeyKind::Date)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}

// ---------------------------------------------------------------------------
// Courier ledger
// ---------------------------------------------------------------------------

fn ledger_sql(dialect: Dialect) -> String {
    format!(
        "WITH monthly AS (\
SELECT d.courier_id, t.year, t.month, AVG(CAST(d.rate AS DOUBLE PRECISION)) AS rate_avg \
FROM dds.fct_deliveries d \
JOIN dds.dm_orders o ON o.id = d.order_id \
JOIN dds.dm_timestamps t ON t.id = o.timestamp_id \
GROUP BY d.courier_id, t.year, t.month) \
SELECT t.year, t.month, c.courier_id, c.courier_name, \
COUNT(DISTINCT d.order_id), SUM(d.sum), MAX(m.rate_avg), SUM({payout}), SUM(d.tip_sum) \
FROM dds.fct_deliveries d \
JOIN dds.dm_orders o ON o.id = d.order_id \
JOIN dds.dm_timestamps t ON t.id = o.timestamp_id \
JOIN dds.dm_couriers c ON c.id = d.courier_id \
JOIN monthly m ON m.courier_id = d.courier_id AND m.year = t.year AND m.month = t.month \
WHERE {{keyset}} \
GROUP BY t.year, t.month, c.courier_id, c.courier_name",
        payout = payout_case(dialect, "m.rate_avg", "d.sum")
    )
}

/// One courier's deliveries of one month.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub settlement_year: i64,
    pub settlement_month: i64,
    pub courier_id: String,
    pub courier_name: String,
    pub orders_count: i64,
    pub orders_total_sum: f64,
    pub rate_avg: f64,
    pub courier_order_sum: f64,
    pub courier_tips_sum: f64,
}

impl Record for LedgerRow {
    fn key(&self) -> Watermark {
        Watermark::new(vec![
            KeyValue::Int(self.settlement_year),
            KeyValue::Int(self.settlement_month),
        ])
    }
}

impl LedgerRow {
    fn from_row(row: &Row) -> Result<Self, PipelineError> {
        Ok(Self {
            settlement_year: row.get_i64(0)?,
            settlement_month: row.get_i64(1)?,
            courier_id: row.get_string(2)?,
            courier_name: row.get_string(3)?,
            orders_count: row.get_i64(4)?,
            orders_total_sum: row.get_f64(5)?,
            rate_avg: row.get_f64(6)?,
            courier_order_sum: row.get_f64(7)?,
            courier_tips_sum: row.get_f64(8)?,
        })
    }

    #[must_use]
    pub fn order_processing_fee(&self) -> f64 {
        self.orders_total_sum * PROCESSING_FEE_SHARE
    }

    #[must_use]
    pub fn courier_reward_sum(&self) -> f64 {
        self.courier_order_sum + self.courier_tips_sum * COURIER_TIP_SHARE
    }
}

/// `courier_ledger_dds_to_cdm_workflow`
///
/// # Errors
///
/// Returns an error if the pipeline cannot be assembled.
pub fn courier_ledger(ctx: &BuildContext<'_>) -> Result<Box<dyn Pipeline>> {
    let reader = SqlBatchReader::over_warehouse(
        KeysetQuery::new(ledger_sql(ctx.dialect), ["t.year", "t.month"])
            .inclusive()
            .then_order_by(["c.courier_id"]),
        LedgerRow::from_row,
    );
    let writer = UpsertWriter::new(
        UpsertSpec::new(
            "cdm.dm_courier_ledger",
            [
                "courier_id",
                "courier_name",
                "settlement_year",
                "settlement_month",
                "orders_count",
                "orders_total_sum",
                "rate_avg",
                "order_processing_fee",
                "courier_order_sum",
                "courier_tips_sum",
                "courier_reward_sum",
            ],
            ["settlement_year", "settlement_month", "courier_id"],
            OnConflict::Update,
        ),
        |l: &LedgerRow| {
            vec![
                l.courier_id.as_str().into(),
                l.courier_name.as_str().into(),
                l.settlement_year.into(),
                l.settlement_month.into(),
                l.orders_count.into(),
                l.orders_total_sum.into(),
                l.rate_avg.into(),
                l.order_processing_fee().into(),
                l.courier_order_sum.into(),
                l.courier_tips_sum.into(),
                l.courier_reward_sum().into(),
            ]
        },
    );
    let schema = KeySchema::new([("settlement_year", KeyKind::Int), ("settlement_month", KeyKind::Int)]);
    Ok(Box::new(ctx.driver(schema, reader, writer)?))
}
