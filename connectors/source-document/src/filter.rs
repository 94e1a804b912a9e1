//! Lexicographic cursor filter over document key fields.

use serde_json::{json, Value};
use settle_types::key::{KeyError, KeyKind, KeySchema, KeyValue, Watermark, ISO_TIMESTAMP_FMT};

use crate::collection::normalize;

/// "Key strictly after `after`", for a document key schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorFilter {
    schema: KeySchema,
    after: Watermark,
}

fn extended(kind: KeyKind, value: &KeyValue) -> Value {
    match (kind, value) {
        (KeyKind::ObjectId, KeyValue::Text(oid)) => json!({ "$oid": oid }),
        (_, KeyValue::Timestamp(ts)) => json!({ "$date": format!("{}Z", ts.format(ISO_TIMESTAMP_FMT)) }),
        (_, KeyValue::Date(d)) => json!({ "$date": format!("{}T00:00:00Z", d) }),
        (_, other) => other.to_json(),
    }
}

impl CursorFilter {
    /// # Errors
    ///
    /// Returns a [`KeyError`] if `after` does not conform to `schema`.
    pub fn after(schema: &KeySchema, after: &Watermark) -> Result<Self, KeyError> {
        schema.check(after)?;
        Ok(Self {
            schema: schema.clone(),
            after: after.clone(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    #[must_use]
    pub fn watermark(&self) -> &Watermark {
        &self.after
    }

    /// The filter in `MongoDB` extended-JSON query form:
    /// `{"$or": [{a: {"$gt": x}}, {"$and": [{a: {"$eq": x}}, {b: {"$gt": y}}]}]}`.
    #[must_use]
    pub fn to_mongo(&self) -> Value {
        let fields = self.schema.fields();
        let values = self.after.values();
        let mut branches = Vec::with_capacity(fields.len());
        for i in 0..fields.len() {
            let mut terms: Vec<Value> = (0..i)
                .map(|j| json!({ fields[j].name.clone(): { "$eq": extended(fields[j].kind, &values[j]) } }))
                .collect();
            terms.push(json!({ fields[i].name.clone(): { "$gt": extended(fields[i].kind, &values[i]) } }));
            branches.push(if terms.len() == 1 {
                terms.remove(0)
            } else {
                json!({ "$and": terms })
            });
        }
        json!({ "$or": branches })
    }

    /// Ascending sort over the key fields, most significant first.
    #[must_use]
    pub fn sort(&self) -> Vec<(&str, i32)> {
        self.schema.fields().iter().map(|f| (f.name.as_str(), 1)).collect()
    }

    /// A document's key under this filter's schema.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingField`] or a decode error for documents
    /// without a usable key.
    pub fn key_of(&self, doc: &Value) -> Result<Watermark, KeyError> {
        self.schema
            .fields()
            .iter()
            .map(|field| {
                let raw = doc
                    .get(&field.name)
                    .ok_or_else(|| KeyError::MissingField(field.name.clone()))?;
                KeyValue::from_json(&field.name, field.kind, &normalize(raw.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Watermark::new)
    }

    /// # Errors
    ///
    /// Same as [`CursorFilter::key_of`].
    pub fn matches(&self, doc: &Value) -> Result<bool, KeyError> {
        Ok(self.key_of(doc)? > self.after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_types::key::parse_timestamp;

    fn schema() -> KeySchema {
        KeySchema::new([("update_ts", KeyKind::Timestamp), ("_id", KeyKind::ObjectId)])
    }

    fn cursor(ts: &str, oid: &str) -> CursorFilter {
        CursorFilter::after(
            &schema(),
            &Watermark::new(vec![
                KeyValue::Timestamp(parse_timestamp(ts).unwrap()),
                KeyValue::Text(oid.into()),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn renders_the_mongo_or_filter() {
        let f = cursor("2022-05-01 10:00:00", "626a81cfefa404208fe9abae");
        assert_eq!(
            f.to_mongo(),
            json!({
                "$or": [
                    { "update_ts": { "$gt": { "$date": "2022-05-01T10:00:00Z" } } },
                    { "$and": [
                        { "update_ts": { "$eq": { "$date": "2022-05-01T10:00:00Z" } } },
                        { "_id": { "$gt": { "$oid": "626a81cfefa404208fe9abae" } } }
                    ] }
                ]
            })
        );
        assert_eq!(f.sort(), vec![("update_ts", 1), ("_id", 1)]);
    }

    #[test]
    fn ties_on_timestamp_break_on_id() {
        let f = cursor("2022-05-01 10:00:00", "b0");
        let doc = |ts: &str, id: &str| json!({ "_id": { "$oid": id }, "update_ts": { "$date": ts } });
        assert!(f.matches(&doc("2022-05-01T10:00:00Z", "c0")).unwrap());
        assert!(!f.matches(&doc("2022-05-01T10:00:00Z", "b0")).unwrap());
        assert!(!f.matches(&doc("2022-05-01T10:00:00Z", "a0")).unwrap());
        assert!(f.matches(&doc("2022-05-01T10:00:01Z", "a0")).unwrap());
        assert!(!f.matches(&doc("2022-05-01T09:59:59Z", "z0")).unwrap());
    }

    #[test]
    fn documents_without_key_fields_are_errors() {
        let f = cursor("2022-05-01 10:00:00", "b0");
        let err = f.matches(&json!({ "_id": "x" })).unwrap_err();
        assert_eq!(err, KeyError::MissingField("update_ts".into()));
    }

    #[test]
    fn watermark_must_match_schema() {
        assert!(CursorFilter::after(&schema(), &Watermark::new(vec![KeyValue::Int(1)])).is_err());
    }
}
