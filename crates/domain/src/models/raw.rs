//! The loosely-typed shape accepted at the ingestion boundary.
//!
//! Sources disagree on field names and on whether numbers travel as JSON
//! numbers or as strings. `RawPosition` accepts both and defers all
//! semantic validation to the processor.

use serde::Deserialize;
use serde_json::{Map, Value};

/// A coordinate or other numeric field that may arrive as a JSON number or
/// as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    pub fn as_f64(&self) -> Result<f64, String> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("{:?} is not a valid number", s)),
        }
    }
}

/// A timestamp that may arrive as epoch milliseconds or as an RFC 3339
/// string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    EpochMillis(i64),
    Text(String),
}

/// Raw, unvalidated position data as received from an ingestion source.
///
/// Any top-level field not named here (`speed`, `heading`, `accuracy`,
/// arbitrary caller-defined keys, and even a nested `metadata` object) is
/// captured by `extra` and folded into the resulting [`Position`]'s
/// metadata verbatim.
///
/// [`Position`]: super::Position
#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    #[serde(alias = "id")]
    pub device_id: Option<String>,
    #[serde(alias = "latitude")]
    pub lat: Option<NumberOrString>,
    #[serde(alias = "longitude")]
    pub lng: Option<NumberOrString>,
    pub timestamp: Option<TimestampValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_numeric_coordinates() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"device_id":"d1","lat":1.5,"lng":2.5,"timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(raw.device_id.as_deref(), Some("d1"));
        assert_eq!(raw.lat.unwrap().as_f64().unwrap(), 1.5);
    }

    #[test]
    fn accepts_string_coordinates_and_aliases() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"id":"d1","latitude":"1.5","longitude":"2.5","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(raw.device_id.as_deref(), Some("d1"));
        assert_eq!(raw.lat.unwrap().as_f64().unwrap(), 1.5);
        assert_eq!(raw.lng.unwrap().as_f64().unwrap(), 2.5);
    }

    #[test]
    fn captures_unrecognized_fields_as_extra() {
        let raw: RawPosition = serde_json::from_str(
            r#"{"device_id":"d1","lat":1.0,"lng":2.0,"speed":5.4,"custom":"x"}"#,
        )
        .unwrap();
        assert_eq!(raw.extra.get("speed").unwrap(), 5.4);
        assert_eq!(raw.extra.get("custom").unwrap(), "x");
    }

    #[test]
    fn number_or_string_rejects_non_numeric_text() {
        let v = NumberOrString::Text("not-a-number".to_string());
        assert!(v.as_f64().is_err());
    }
}
