//! Dotted-path updates.
//!
//! An update map assigns values to dotted paths. Missing intermediates are
//! created (an array when the following segment is numeric, an object
//! otherwise) and arrays are padded with nulls up to a written index.

use serde_json::{Map, Value};

use crate::errors::DbError;

pub type UpdateMap = Map<String, Value>;

/// Build an update map from `(path, value)` pairs
pub fn update_of<I, K, V>(pairs: I) -> UpdateMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

pub fn apply_update(doc: &mut Value, update: &UpdateMap) -> Result<(), DbError> {
    for (path, value) in update {
        set_path(doc, path, value.clone())?;
    }
    Ok(())
}

pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), DbError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (pos, segment) in segments.iter().enumerate() {
        let last = pos + 1 == segments.len();
        let next_numeric = segments
            .get(pos + 1)
            .map(|s| s.parse::<usize>().is_ok())
            .unwrap_or(false);
        let fresh = || {
            if next_numeric {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        };

        current = match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), value);
                    return Ok(());
                }
                let slot = map.entry(segment.to_string()).or_insert_with(fresh);
                if slot.is_null() {
                    *slot = fresh();
                }
                slot
            }
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| {
                    DbError::backend("update", format!("'{path}': '{segment}' is not an index"))
                })?;
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
                if last {
                    items[index] = value;
                    return Ok(());
                }
                if items[index].is_null() {
                    items[index] = fresh();
                }
                &mut items[index]
            }
            _ => {
                return Err(DbError::backend(
                    "update",
                    format!("'{path}': cannot descend into a scalar at '{segment}'"),
                ))
            }
        };
    }
    Ok(())
}
