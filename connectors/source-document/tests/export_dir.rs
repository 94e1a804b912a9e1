//! Reading `mongoexport --jsonArray` files through the batch reader.

use serde_json::{json, Value};
use settle_core::{BatchReader, PipelineError, ReadRequest};
use settle_source_document::{DocumentBatchReader, JsonDirCollection};
use settle_state::sqlite::SqliteWarehouse;
use settle_types::checkpoint::Checkpoint;
use settle_types::key::{KeyKind, KeySchema, KeyValue, Watermark};

fn schema() -> KeySchema {
    KeySchema::new([("update_ts", KeyKind::Timestamp), ("_id", KeyKind::ObjectId)])
}

fn write_export(dir: &std::path::Path, docs: &Value) {
    std::fs::write(dir.join("restaurants.json"), serde_json::to_string_pretty(docs).unwrap()).unwrap();
}

fn restaurant(id: &str, ts: &str) -> Value {
    json!({
        "_id": { "$oid": id },
        "name": format!("r-{id}"),
        "update_ts": { "$date": ts },
        "menu": []
    })
}

fn reader(dir: &std::path::Path) -> DocumentBatchReader<(String, Watermark)> {
    DocumentBatchReader::new(JsonDirCollection::new(dir, "restaurants"), schema(), |doc: Value| {
        let id = doc["_id"].as_str().ok_or_else(|| PipelineError::record("no id"))?.to_string();
        let ts = doc["update_ts"].as_str().ok_or_else(|| PipelineError::record("no ts"))?;
        let ts = settle_types::key::parse_timestamp(ts).ok_or_else(|| PipelineError::record("bad ts"))?;
        let key = Watermark::new(vec![KeyValue::Timestamp(ts), KeyValue::Text(id.clone())]);
        Ok((id, key))
    })
}

#[test]
fn pages_through_an_export_by_cursor() {
    let dir = tempfile::tempdir().unwrap();
    write_export(
        dir.path(),
        &json!([
            restaurant("ebfa4c9b8dadfc1da37ab58d", "2022-01-02T00:00:00.000Z"),
            restaurant("a51e4e31ae4602047ec52534", "2022-01-01T12:00:00.000Z"),
            restaurant("626a81cfefa404208fe9abae", "2022-01-02T00:00:00.000Z"),
        ]),
    );
    let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
    let mut reader = reader(dir.path());
    let mut cp = Checkpoint::at(schema().minimum());
    let mut ids = Vec::new();
    loop {
        let batch = reader
            .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 0, limit: 2 })
            .unwrap();
        let Some((_, last)) = batch.last().cloned() else {
            break;
        };
        ids.extend(batch.into_iter().map(|(id, _)| id));
        cp = Checkpoint::at(last);
    }
    assert_eq!(
        ids,
        vec![
            "a51e4e31ae4602047ec52534",
            "626a81cfefa404208fe9abae",
            "ebfa4c9b8dadfc1da37ab58d"
        ]
    );
}

#[test]
fn release_picks_up_a_new_export() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), &json!([restaurant("aa", "2022-01-01T00:00:00Z")]));
    let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
    let mut reader = reader(dir.path());
    let cp = Checkpoint::at(schema().minimum());
    let request = ReadRequest { checkpoint: &cp, offset: 0, limit: 10 };

    assert_eq!(reader.read(&mut wh, &request).unwrap().len(), 1);
    write_export(
        dir.path(),
        &json!([restaurant("aa", "2022-01-01T00:00:00Z"), restaurant("bb", "2022-01-03T00:00:00Z")]),
    );
    assert_eq!(reader.read(&mut wh, &request).unwrap().len(), 1);
    reader.release();
    assert_eq!(reader.read(&mut wh, &request).unwrap().len(), 2);
}

#[test]
fn missing_export_is_a_fatal_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut wh = SqliteWarehouse::in_memory(&[]).unwrap();
    let cp = Checkpoint::at(schema().minimum());
    let err = reader(dir.path())
        .read(&mut wh, &ReadRequest { checkpoint: &cp, offset: 0, limit: 1 })
        .unwrap_err();
    let source = err.as_source_error().unwrap();
    assert_eq!(source.code, "COLLECTION_UNREADABLE");
    assert!(!source.retryable);
}
