//! Raw change rows delivered by a streaming cursor.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use serde_json::{Map, Value};

/// Column carrying the logical timestamp of a tail row.
pub const TIMESTAMP_COLUMN: &str = "mz_timestamp";
/// Column flagging a progress marker row.
pub const PROGRESS_COLUMN: &str = "mz_progressed";
/// Column carrying the diff of a tail row.
pub const DIFF_COLUMN: &str = "mz_diff";
/// Column holding the entity key.
pub const KEY_COLUMN: &str = "antenna_id";

/// Sign of a row in a differential changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffSign {
    /// The value is asserted (insert or upsert).
    Upsert,
    /// The value is retracted.
    Retract,
}

impl DiffSign {
    /// Converts to the signed diff code (`+1` / `-1`).
    pub fn to_code(&self) -> i64 {
        match self {
            DiffSign::Upsert => 1,
            DiffSign::Retract => -1,
        }
    }

    /// Converts a changelog diff into a sign.
    ///
    /// Multiplicities collapse to their sign; a zero diff has no sign.
    pub fn from_diff(diff: i64) -> Option<Self> {
        match diff.signum() {
            1 => Some(DiffSign::Upsert),
            -1 => Some(DiffSign::Retract),
            _ => None,
        }
    }
}

/// One row delivered by the streaming cursor.
///
/// Rows are immutable once produced; the payload is shared, so cloning a
/// row does not copy the payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeRow {
    /// Key of the entity the row belongs to (empty for progress markers).
    pub entity_key: String,
    /// Encoded entity payload (JSON object bytes, empty for progress markers).
    pub payload: Bytes,
    /// Whether the row asserts or retracts the payload.
    pub diff_sign: DiffSign,
    /// Logical time of the change.
    pub logical_timestamp: u64,
    /// True if all rows before this one are consistent as of its timestamp.
    pub is_progress_marker: bool,
}

impl RawChangeRow {
    /// Creates an upsert row.
    pub fn upsert(entity_key: impl Into<String>, payload: impl Into<Bytes>, timestamp: u64) -> Self {
        Self {
            entity_key: entity_key.into(),
            payload: payload.into(),
            diff_sign: DiffSign::Upsert,
            logical_timestamp: timestamp,
            is_progress_marker: false,
        }
    }

    /// Creates a retraction row.
    pub fn retract(
        entity_key: impl Into<String>,
        payload: impl Into<Bytes>,
        timestamp: u64,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            payload: payload.into(),
            diff_sign: DiffSign::Retract,
            logical_timestamp: timestamp,
            is_progress_marker: false,
        }
    }

    /// Creates a progress marker at the given logical time.
    pub fn progress(timestamp: u64) -> Self {
        Self {
            entity_key: String::new(),
            payload: Bytes::new(),
            diff_sign: DiffSign::Upsert,
            logical_timestamp: timestamp,
            is_progress_marker: true,
        }
    }

    /// Returns true if the row retracts its payload.
    pub fn is_retraction(&self) -> bool {
        self.diff_sign == DiffSign::Retract
    }

    /// Decodes a row from a tail record (one JSON object per row).
    ///
    /// The `mz_*` columns become row metadata; every other column is kept
    /// in the payload, keyed by its column name.
    pub fn from_tail_record(record: &Map<String, Value>) -> ProtocolResult<Self> {
        let timestamp = record
            .get(TIMESTAMP_COLUMN)
            .and_then(as_u64)
            .ok_or_else(|| ProtocolError::invalid_row(format!("missing {TIMESTAMP_COLUMN}")))?;

        let progressed = record
            .get(PROGRESS_COLUMN)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if progressed {
            return Ok(Self::progress(timestamp));
        }

        let diff = record
            .get(DIFF_COLUMN)
            .and_then(as_i64)
            .ok_or_else(|| ProtocolError::invalid_row(format!("missing {DIFF_COLUMN}")))?;
        let diff_sign = DiffSign::from_diff(diff)
            .ok_or_else(|| ProtocolError::invalid_row("zero diff carries no change"))?;

        let entity_key = match record.get(KEY_COLUMN) {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(key)) => key.to_string(),
            _ => return Err(ProtocolError::invalid_row(format!("missing {KEY_COLUMN}"))),
        };

        let payload: Map<String, Value> = record
            .iter()
            .filter(|(column, _)| !column.starts_with("mz_"))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let payload = serde_json::to_vec(&Value::Object(payload))
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        Ok(Self {
            entity_key,
            payload: Bytes::from(payload),
            diff_sign,
            logical_timestamp: timestamp,
            is_progress_marker: false,
        })
    }

    /// Encodes the row back into a tail record.
    pub fn to_tail_record(&self) -> ProtocolResult<Map<String, Value>> {
        let mut record = if self.is_progress_marker {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(&self.payload) {
                Ok(Value::Object(columns)) => columns,
                Ok(_) => {
                    return Err(ProtocolError::payload(
                        self.entity_key.clone(),
                        "payload is not a JSON object",
                    ))
                }
                Err(e) => return Err(ProtocolError::payload(self.entity_key.clone(), e)),
            }
        };

        record.insert(TIMESTAMP_COLUMN.into(), Value::from(self.logical_timestamp));
        record.insert(PROGRESS_COLUMN.into(), Value::Bool(self.is_progress_marker));
        if self.is_progress_marker {
            record.insert(DIFF_COLUMN.into(), Value::Null);
        } else {
            record.insert(DIFF_COLUMN.into(), Value::from(self.diff_sign.to_code()));
            record.insert(KEY_COLUMN.into(), Value::String(self.entity_key.clone()));
        }
        Ok(record)
    }
}

// The SQL interface reports numeric columns as text.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
