//! Readings: the coerced value submitted by a node and the documents kept in its log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A validated measurement. At least one field is present once parsed from a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }

    /// Parse a submission body such as `{"temperature":"23.5","humidity":55}`.
    pub fn from_json(body: &str) -> Result<Self> {
        let de = &mut serde_json::Deserializer::from_str(body);
        let raw: RawReading = serde_path_to_error::deserialize(de)?;
        raw.coerce()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawReading = serde_path_to_error::deserialize(value)?;
        raw.coerce()
    }
}

/// Loosely typed payload as it arrives from a client.
#[derive(Debug, Default, Deserialize)]
struct RawReading {
    #[serde(default)]
    temperature: Option<Value>,
    #[serde(default)]
    humidity: Option<Value>,
}

impl RawReading {
    /// Numbers pass through, numeric strings are parsed, anything else is dropped.
    /// Fails only when neither field survives.
    fn coerce(self) -> Result<Reading> {
        let reading = Reading {
            temperature: self.temperature.as_ref().and_then(coerce_number),
            humidity: self.humidity.as_ref().and_then(coerce_number),
        };
        if reading.is_empty() {
            return Err(Error::Validation(
                "reading has no usable temperature or humidity".to_string(),
            ));
        }
        Ok(reading)
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Longest leading float in `s` after surrounding whitespace, e.g. `"23.5°C"` is 23.5.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .unwrap_or(s.len());
    let candidate = &s[..end];
    (1..=candidate.len()).rev().find_map(|i| candidate[..i].parse::<f64>().ok())
}

/// A reading as stored in a node's log partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReading {
    #[serde(rename = "_id")]
    pub doc_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl StoredReading {
    pub fn reading(&self) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

/// History projection: `{temperature, humidity, createdAt}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_strings_are_coerced() {
        let reading = Reading::from_json(r#"{"temperature":"23.5","humidity":55}"#).unwrap();
        assert_eq!(reading, Reading::new(23.5, 55.0));
    }

    #[test]
    fn unparsable_fields_are_dropped() {
        let reading = Reading::from_value(json!({"temperature": "warm", "humidity": "40%"})).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, Some(40.0));

        let reading = Reading::from_value(json!({"temperature": [1], "humidity": " -3.25e1 "})).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, Some(-32.5));
    }

    #[test]
    fn unusable_payloads_are_rejected() {
        assert!(matches!(Reading::from_json("{}"), Err(Error::Validation(_))));
        assert!(matches!(
            Reading::from_value(json!({"temperature": null, "humidity": "n/a"})),
            Err(Error::Validation(_))
        ));
        assert!(matches!(Reading::from_json("42"), Err(Error::Validation(_))));
        assert!(matches!(Reading::from_json("not json"), Err(Error::Validation(_))));
    }

    #[test]
    fn float_prefix_matches_lenient_parsing() {
        assert_eq!(parse_float_prefix("23.5°C"), Some(23.5));
        assert_eq!(parse_float_prefix("1e3x"), Some(1000.0));
        assert_eq!(parse_float_prefix("12e"), Some(12.0));
        assert_eq!(parse_float_prefix(".5"), Some(0.5));
        assert_eq!(parse_float_prefix("abc"), None);
        assert_eq!(parse_float_prefix(""), None);
    }
}
