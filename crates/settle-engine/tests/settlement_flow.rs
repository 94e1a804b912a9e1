//! End-to-end rounds over a file-backed SQLite warehouse with in-memory
//! order and delivery sources and a SQLite loyalty database.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};
use settle_engine::config::parser::parse_config_str;
use settle_engine::connectors::StaticConnectors;
use settle_engine::{Orchestrator, PipelineStatus};
use settle_source_http::MemoryPageSource;
use settle_state::sqlite::{SqliteFactory, SqliteWarehouse};
use settle_state::{Row, Session};

fn bonus_database(path: &Path) {
    let mut db = SqliteWarehouse::open(path, &[]).unwrap();
    let sale = |order: &str, lines: Value| json!({ "order_id": order, "product_payments": lines }).to_string();
    db.batch_execute(
        "CREATE TABLE ranks (id INTEGER PRIMARY KEY, name TEXT, bonus_percent REAL, min_payment_threshold REAL);
         CREATE TABLE users (id INTEGER PRIMARY KEY, order_user_id TEXT);
         CREATE TABLE outbox (id INTEGER PRIMARY KEY, event_ts TEXT, event_type TEXT, event_value TEXT);
         INSERT INTO ranks VALUES (1, 'Bronze', 0, 0), (2, 'Silver', 0.02, 1000);
         INSERT INTO users VALUES (1, 'u1'), (2, 'u2');",
    )
    .unwrap();
    let events = [
        (
            1,
            "2022-04-30 09:00:00.000000",
            "bonus_transaction",
            sale("o0", json!([])),
        ),
        (
            2,
            "2022-05-01 12:00:00.000000",
            "bonus_transaction",
            sale(
                "o1",
                json!([
                    { "product_id": "p1", "price": 100, "quantity": 2, "bonus_payment": 20, "bonus_grant": 10 },
                    { "product_id": "p2", "price": 50, "quantity": 1, "bonus_payment": 0, "bonus_grant": 5 }
                ]),
            ),
        ),
        (
            3,
            "2022-05-01 12:05:00.000000",
            "user_rank",
            json!({ "user_id": 1, "rank_id": 2 }).to_string(),
        ),
        (
            4,
            "2022-05-02 12:30:00.000000",
            "bonus_transaction",
            sale(
                "o2",
                json!([{ "product_id": "p1", "price": 100, "quantity": 1, "bonus_payment": 0, "bonus_grant": 10 }]),
            ),
        ),
    ];
    for (id, ts, kind, value) in events {
        db.execute(
            "INSERT INTO outbox VALUES ($1, $2, $3, $4)",
            &[id.into(), ts.into(), kind.into(), value.into()],
        )
        .unwrap();
    }
}

fn order_documents(connectors: StaticConnectors) -> StaticConnectors {
    let ts = |raw: &str| json!({ "$date": raw });
    connectors
        .with_collection(
            "restaurants",
            vec![json!({
                "_id": "r1",
                "name": "Oak",
                "menu": [
                    { "_id": "p1", "name": "Soup", "price": 100, "category": "Main" },
                    { "_id": "p2", "name": "Tea", "price": 50, "category": "Drinks" }
                ],
                "update_ts": ts("2022-04-01T08:00:00Z")
            })],
        )
        .with_collection(
            "users",
            vec![
                json!({ "_id": "u1", "name": "Ann", "login": "ann", "update_ts": ts("2022-04-02T08:00:00Z") }),
                json!({ "_id": "u2", "name": "Bob", "login": "bob", "update_ts": ts("2022-04-03T08:00:00Z") }),
            ],
        )
        .with_collection(
            "orders",
            vec![
                json!({
                    "_id": "o1", "user": { "id": "u1" }, "restaurant": { "id": "r1" },
                    "date": "2022-05-01 11:50:00", "final_status": "CLOSED",
                    "update_ts": ts("2022-05-01T12:00:00Z")
                }),
                json!({
                    "_id": "o2", "user": { "id": "u2" }, "restaurant": { "id": "r1" },
                    "date": "2022-05-02 12:20:00", "final_status": "CLOSED",
                    "update_ts": ts("2022-05-02T12:30:00Z")
                }),
            ],
        )
}

fn delivery_api() -> MemoryPageSource {
    MemoryPageSource::new()
        .with_endpoint("/restaurants", vec![json!({ "_id": "r1", "name": "Oak" })])
        .with_endpoint("/couriers", vec![json!({ "_id": "c1", "name": "Ivan" })])
        .with_endpoint(
            "/deliveries",
            vec![
                json!({
                    "order_id": "o1", "order_ts": "2022-05-01 11:50:00", "delivery_id": "d1",
                    "courier_id": "c1", "address": "Main st 1", "delivery_ts": "2022-05-01 12:30:00",
                    "rate": 5, "sum": 250, "tip_sum": 10
                }),
                json!({
                    "order_id": "o2", "order_ts": "2022-05-02 12:20:00", "delivery_id": "d2",
                    "courier_id": "c1", "address": "Main st 2", "delivery_ts": "2022-05-02 13:00:00",
                    "rate": 4, "sum": 100, "tip_sum": 0
                }),
            ],
        )
        .with_sort_alias("id", "_id")
        .with_sort_alias("date", "delivery_ts")
        .with_from_filter("/deliveries", "delivery_ts")
}

fn orchestrator(dir: &Path) -> Orchestrator {
    let bonus = dir.join("bonus.db");
    bonus_database(&bonus);
    let connectors = order_documents(StaticConnectors::new())
        .with_bonus_system(Arc::new(SqliteFactory::new(&bonus)))
        .with_delivery_api(delivery_api());
    let yaml = format!(
        "version: \"1.0\"\nwarehouse: {{ backend: sqlite, connection: {} }}\n",
        dir.join("dwh.db").display()
    );
    Orchestrator::with_connectors(parse_config_str(&yaml).unwrap(), connectors)
}

fn query(dir: &Path, sql: &str) -> Vec<Row> {
    let mut wh = SqliteWarehouse::open(&dir.join("dwh.db"), &settle_engine::schema::LAYERS).unwrap();
    wh.query(sql, &[]).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn start() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2022, 5, 1)
}

#[test]
fn one_round_fills_every_layer() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    orch.init().unwrap();

    let report = orch.run_all(start()).unwrap();
    for (key, status) in &report.results {
        assert!(matches!(status, PipelineStatus::Completed(_)), "{key}: {status:?}");
    }

    // The start date keeps the April event out of staging.
    let events = query(dir.path(), "SELECT MIN(id), COUNT(*) FROM stg.bonussystem_events");
    assert_eq!(events[0].get_i64(0).unwrap(), 2);
    assert_eq!(events[0].get_i64(1).unwrap(), 3);

    let sales = query(dir.path(), "SELECT COUNT(*), SUM(total_sum) FROM dds.fct_product_sales");
    assert_eq!(sales[0].get_i64(0).unwrap(), 3);
    assert!(close(sales[0].get_f64(1).unwrap(), 350.0));

    let report_rows = query(
        dir.path(),
        "SELECT settlement_date, restaurant_name, orders_count, orders_total_sum, orders_bonus_payment_sum, \
         orders_bonus_granted_sum, order_processing_fee, restaurant_reward_sum \
         FROM cdm.dm_settlement_report ORDER BY settlement_date",
    );
    assert_eq!(report_rows.len(), 2);
    let day = &report_rows[0];
    assert_eq!(day.get_string(0).unwrap(), "2022-05-01");
    assert_eq!(day.get_string(1).unwrap(), "Oak");
    assert_eq!(day.get_i64(2).unwrap(), 1);
    assert!(close(day.get_f64(3).unwrap(), 250.0));
    assert!(close(day.get_f64(4).unwrap(), 20.0));
    assert!(close(day.get_f64(5).unwrap(), 15.0));
    assert!(close(day.get_f64(6).unwrap(), 62.5));
    assert!(close(day.get_f64(7).unwrap(), 167.5));
    assert!(close(report_rows[1].get_f64(7).unwrap(), 75.0));

    let ledger = query(
        dir.path(),
        "SELECT courier_name, orders_count, orders_total_sum, rate_avg, courier_order_sum, courier_reward_sum \
         FROM cdm.dm_courier_ledger WHERE settlement_year = 2022 AND settlement_month = 5",
    );
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].get_string(0).unwrap(), "Ivan");
    assert_eq!(ledger[0].get_i64(1).unwrap(), 2);
    assert!(close(ledger[0].get_f64(2).unwrap(), 350.0));
    assert!(close(ledger[0].get_f64(3).unwrap(), 4.5));
    assert!(close(ledger[0].get_f64(4).unwrap(), 350.0));
    assert!(close(ledger[0].get_f64(5).unwrap(), 359.5));

    assert_eq!(orch.checkpoints(None).unwrap().len(), 19);
}

#[test]
fn later_rounds_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path());
    orch.init().unwrap();
    orch.run_all(start()).unwrap();
    let before = query(dir.path(), "SELECT restaurant_reward_sum FROM cdm.dm_settlement_report ORDER BY settlement_date");

    let again = orch.run_all(start()).unwrap();
    assert_eq!(again.failed(), 0);
    match again.status("orders_stg_to_dds_workflow") {
        Some(PipelineStatus::Completed(outcome)) => assert_eq!(outcome.stats.records_read, 0),
        other => panic!("unexpected {other:?}"),
    }
    let after = query(dir.path(), "SELECT restaurant_reward_sum FROM cdm.dm_settlement_report ORDER BY settlement_date");
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert!(close(b.get_f64(0).unwrap(), a.get_f64(0).unwrap()));
    }
    let counts = query(dir.path(), "SELECT COUNT(*) FROM dds.dm_products");
    assert_eq!(counts[0].get_i64(0).unwrap(), 2);
}
