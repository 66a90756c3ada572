use crate::document::{Document, FIELD_TIMESTAMP};
use crate::error::DumpError;
use crate::store::DocumentStore;
use crate::timestamp;
use serde_json::Value;
use std::fmt;
use std::io::Write;

/// Fields that change on almost every snapshot.
const DIFF_IGNORED: [&str; 2] = [FIELD_TIMESTAMP, "gps_as_of"];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Changed {
        key: String,
        current: Value,
        previous: Value,
    },
    NewKey(String),
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldChange::Changed {
                key,
                current,
                previous,
            } => write!(f, "different {}: {} vs previous {}", key, current, previous),
            FieldChange::NewKey(key) => write!(f, "found new key: {}", key),
        }
    }
}

/// One JSON line with `_id` removed and the timestamp shown as a date.
pub fn render_line(document: &Document) -> Result<String, serde_json::Error> {
    let mut rendered = document.clone();
    rendered.strip_internal_ids();
    if let Some(ms) = rendered.timestamp_ms() {
        rendered.insert(FIELD_TIMESTAMP, timestamp::format_ms(ms));
    }
    serde_json::to_string(&rendered)
}

pub fn diff_documents(current: &Document, previous: &Document) -> Vec<FieldChange> {
    current
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .filter_map(|(key, value)| match previous.get(key) {
            None => Some(FieldChange::NewKey(key.clone())),
            Some(_) if DIFF_IGNORED.contains(&key.as_str()) => None,
            Some(before) if before != value => Some(FieldChange::Changed {
                key: key.clone(),
                current: value.clone(),
                previous: before.clone(),
            }),
            Some(_) => None,
        })
        .collect()
}

pub async fn dump_collection<W: Write>(
    store: &dyn DocumentStore,
    collection: &str,
    diff: bool,
    out: &mut W,
) -> Result<usize, DumpError> {
    let documents = store.find_all(collection).await?;
    let mut previous: Option<&Document> = None;
    for document in &documents {
        writeln!(out, "{}", render_line(document)?)?;
        if diff {
            if let Some(previous) = previous {
                for change in diff_documents(document, previous) {
                    writeln!(out, "{}", change)?;
                }
            }
        }
        previous = Some(document);
    }
    Ok(documents.len())
}

pub async fn dump_all<W: Write>(
    store: &dyn DocumentStore,
    diff: bool,
    out: &mut W,
) -> Result<usize, DumpError> {
    let mut total = 0;
    for collection in store.list_collections().await? {
        total += dump_collection(store, &collection, diff, out).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{doc, MemoryStore};
    use serde_json::json;

    #[test]
    fn renders_without_internal_id_and_with_a_date() {
        let line = render_line(&doc(json!({"_id": "x", "vin": "V1", "timestamp": 0}))).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"vin": "V1", "timestamp": "Thu, 01 Jan 1970 00:00:00 +0000"})
        );
    }

    #[test]
    fn diff_ignores_volatile_fields_and_reports_new_keys() {
        let previous = doc(json!({"vin": "V1", "timestamp": 1, "gps_as_of": 5, "odometer": 10}));
        let current = doc(json!({"vin": "V1", "timestamp": 2, "gps_as_of": 6, "odometer": 11, "locked": true}));

        let changes = diff_documents(&current, &previous);
        assert_eq!(
            changes,
            vec![
                FieldChange::NewKey("locked".to_string()),
                FieldChange::Changed {
                    key: "odometer".to_string(),
                    current: json!(11),
                    previous: json!(10),
                },
            ]
        );
        assert_eq!(changes[1].to_string(), "different odometer: 11 vs previous 10");
    }

    #[tokio::test]
    async fn dumps_collections_in_store_order() {
        let store = MemoryStore::new("tesla");
        store.seed("vehicle_state", doc(json!({"vin": "V1", "timestamp": 0, "odometer": 1})));
        store.seed("vehicle_state", doc(json!({"vin": "V1", "timestamp": 1000, "odometer": 2})));
        store.seed("charge_state", doc(json!({"vin": "V1", "timestamp": 0})));

        let mut out = Vec::new();
        let count = dump_collection(&store, "vehicle_state", true, &mut out).await.unwrap();
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "different odometer: 2 vs previous 1");

        let mut all = Vec::new();
        assert_eq!(dump_all(&store, false, &mut all).await.unwrap(), 3);
    }
}
