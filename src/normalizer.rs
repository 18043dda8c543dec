use crate::fetcher::FetchOutcome;
use crate::models::{Row, Table};
use serde_json::{Map, Value};

/// Keys under which the API nests its record list, in lookup order.
const CONTAINER_KEYS: [&str; 3] = ["result", "data", "results"];

pub fn normalize(outcome: &FetchOutcome) -> Option<Table> {
    match outcome {
        FetchOutcome::Payload(payload) => normalize_payload(payload),
        FetchOutcome::NoData | FetchOutcome::Failed(_) => None,
    }
}

/// Turn an API payload into a table.
///
/// A container key holding a non-empty list wins, then a bare non-empty list,
/// and anything else is flattened into a single row. Returns `None` when the
/// outcome has no rows or no columns, which is a normal "no measurements" case.
pub fn normalize_payload(payload: &Value) -> Option<Table> {
    let rows = match payload {
        Value::Object(map) => {
            let records = CONTAINER_KEYS.iter().find_map(|key| match map.get(*key) {
                Some(Value::Array(items)) if !items.is_empty() => Some(items),
                _ => None,
            });
            match records {
                Some(items) => records_to_rows(items),
                None => vec![flatten_object(map)],
            }
        }
        Value::Array(items) if !items.is_empty() => records_to_rows(items),
        _ => return None,
    };

    let table = Table::from_rows(rows);
    if table.is_empty() {
        None
    } else {
        Some(table)
    }
}

fn records_to_rows(items: &[Value]) -> Vec<Row> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => flatten_object(map),
            other => {
                let mut row = Row::new();
                row.insert("value".to_string(), other.clone());
                row
            }
        })
        .collect()
}

/// Flatten nested objects into dotted keys; arrays stay as values.
fn flatten_object(map: &Map<String, Value>) -> Row {
    let mut row = Row::new();
    flatten_into(&mut row, None, map);
    row
}

fn flatten_into(row: &mut Row, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let name = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(row, Some(&name), nested),
            other => {
                row.insert(name, other.clone());
            }
        }
    }
}
