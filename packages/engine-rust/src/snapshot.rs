//! Wire format of the persisted snapshot.
//!
//! `{"values": <object>, "savedAt": <integer ms since epoch>}`, stored under
//! the form schema id. Anything else found under that key is treated as "no
//! snapshot" by the caller; [`decode`] only reports what was wrong.
//!
//! Only `values` has to be well formed. `savedAt` is read leniently: a
//! fractional timestamp is truncated to whole milliseconds, while a negative,
//! non-numeric or missing one reads as `0`.

use formsync_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// Timestamped copy of a whole value tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub values: Value,
    pub saved_at: u64,
}

/// Lenient shape used for decoding: both fields may be absent.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default)]
    values: Option<Value>,
    #[serde(default)]
    saved_at: serde_json::Value,
}

/// Whole milliseconds from whatever JSON sits in `savedAt`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_millis(raw: &serde_json::Value) -> u64 {
    if let Some(ms) = raw.as_u64() {
        return ms;
    }
    match raw.as_f64() {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms as u64,
        _ => 0,
    }
}

impl PersistedSnapshot {
    #[must_use]
    pub fn new(values: Value, saved_at: u64) -> Self {
        Self { values, saved_at }
    }

    /// Serializes to the stored JSON text.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the tree cannot be serialized.
    pub fn encode(&self) -> Result<String, SnapshotError> {
        encode(&self.values, self.saved_at)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    values: &'a Value,
    saved_at: u64,
}

/// Serializes a borrowed tree without copying it into a snapshot first.
///
/// # Errors
///
/// Returns the `serde_json` error if the tree cannot be serialized.
pub fn encode(values: &Value, saved_at: u64) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string(&SnapshotRef { values, saved_at })?)
}

/// Parses stored JSON text into a snapshot.
///
/// A missing or unusable `savedAt` reads as `0`.
///
/// # Errors
///
/// [`SnapshotError::Json`] for text that is not a JSON object of the right
/// shape, [`SnapshotError::MissingValues`] when `values` is absent or null,
/// [`SnapshotError::NotAnObject`] when `values` is not an object.
pub fn decode(raw: &str) -> Result<PersistedSnapshot, SnapshotError> {
    let parsed: RawSnapshot = serde_json::from_str(raw)?;
    match parsed.values {
        None | Some(Value::Null) => Err(SnapshotError::MissingValues),
        Some(values @ Value::Map(_)) => Ok(PersistedSnapshot {
            values,
            saved_at: lenient_millis(&parsed.saved_at),
        }),
        Some(other) => Err(SnapshotError::NotAnObject { kind: other.kind() }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encodes_wire_format() {
        let snapshot = PersistedSnapshot::new(Value::from(json!({"a": 1})), 100);
        let text = snapshot.encode().unwrap();
        assert_eq!(text, r#"{"values":{"a":1},"savedAt":100}"#);
    }

    #[test]
    fn decodes_wire_format() {
        let snapshot = decode(r#"{"values":{"name":"Ada","tags":["x"]},"savedAt":1700000000000}"#).unwrap();
        assert_eq!(snapshot.saved_at, 1_700_000_000_000);
        assert_eq!(snapshot.values, Value::from(json!({"name": "Ada", "tags": ["x"]})));
    }

    #[test]
    fn missing_saved_at_reads_as_zero() {
        let snapshot = decode(r#"{"values":{}}"#).unwrap();
        assert_eq!(snapshot.saved_at, 0);
    }

    #[test]
    fn odd_saved_at_does_not_reject_the_snapshot() {
        assert_eq!(decode(r#"{"values":{},"savedAt":1500.75}"#).unwrap().saved_at, 1500);
        assert_eq!(decode(r#"{"values":{},"savedAt":-3}"#).unwrap().saved_at, 0);
        assert_eq!(decode(r#"{"values":{},"savedAt":"soon"}"#).unwrap().saved_at, 0);
        assert_eq!(decode(r#"{"values":{},"savedAt":null}"#).unwrap().saved_at, 0);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(decode("not json"), Err(SnapshotError::Json(_))));
        assert!(matches!(decode("42"), Err(SnapshotError::Json(_))));
    }

    #[test]
    fn rejects_missing_or_null_values() {
        assert!(matches!(decode(r#"{"savedAt":5}"#), Err(SnapshotError::MissingValues)));
        assert!(matches!(decode(r#"{"values":null,"savedAt":5}"#), Err(SnapshotError::MissingValues)));
    }

    #[test]
    fn rejects_non_object_values() {
        assert!(matches!(
            decode(r#"{"values":[1,2],"savedAt":5}"#),
            Err(SnapshotError::NotAnObject { kind: "array" })
        ));
    }
}
