//! Materialized event rows.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Column name → value map for a single event.
pub type Row = BTreeMap<String, String>;

/// Reserved column holding the event time (decimal seconds).
pub const TIME_FIELD: &str = "time";

/// Reserved column holding the padded event id.
pub const EID_FIELD: &str = "eid";

/// Serialize a row to a single-line JSON object.
pub fn to_json(row: &Row) -> Result<String> {
    Ok(serde_json::to_string(row)?)
}

/// Decode a row from its stored JSON form.
///
/// Non-string scalar values are accepted and rendered as text; nested
/// objects and arrays are rejected.
pub fn from_json(bytes: &[u8]) -> Result<Row> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let serde_json::Value::Object(map) = value else {
        return Err(Error::InvalidRow("stored row is not a JSON object".to_string()));
    };

    let mut row = Row::new();
    for (key, value) in map {
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            other => {
                return Err(Error::InvalidRow(format!(
                    "column {} has non-scalar value {}",
                    key, other
                )))
            }
        };
        row.insert(key, text);
    }
    Ok(row)
}
