// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// Values as callers see them. Storage keeps every value as a string; reads
// decode it into a typed StatValue with an int, then float, then text policy.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::constants::{MAX_TIMESTAMP_MS, MIN_TIMESTAMP_MS};
use crate::error::StatsError;

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// Current wall-clock time in milliseconds since the Unix epoch.
#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Read a millisecond timestamp out of a JSON payload field.
///
/// Integers are taken as-is, floats are truncated and strings must hold a
/// decimal integer. Anything outside the accepted timestamp range is `None`.
pub fn json_timestamp(value: &JsonValue) -> Option<i64> {
    let ts = match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    timestamp_in_range(ts).then_some(ts)
}

#[inline]
pub fn timestamp_in_range(ts: i64) -> bool {
    (MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&ts)
}

/// Render a JSON payload value the way it is persisted in a column.
///
/// Floats always keep a fractional part so they decode back as floats.
pub fn stringify_json(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => format_float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::Bool(true) => "True".to_string(),
        JsonValue::Bool(false) => "False".to_string(),
        JsonValue::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    // Debug keeps the trailing ".0" that Display drops.
    format!("{:?}", f)
}

// ----------------------------------------------------------------------------
// Stat Values
// ----------------------------------------------------------------------------

/// A decoded stat value.
///
/// Non-finite floats have no JSON number form and serialize as the strings
/// `"Infinity"`, `"-Infinity"` and `"NaN"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl StatValue {
    /// Decode a stored string: integer first, then float, else opaque text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return StatValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return StatValue::Float(f);
        }
        StatValue::Text(raw.to_string())
    }

    /// Numeric view of the value; `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Int(i) => Some(*i as f64),
            StatValue::Float(f) => Some(*f),
            StatValue::Text(_) => None,
        }
    }
}

impl Serialize for StatValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StatValue::Int(i) => serializer.serialize_i64(*i),
            StatValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            StatValue::Float(f) if f.is_nan() => serializer.serialize_str("NaN"),
            StatValue::Float(f) if *f > 0.0 => serializer.serialize_str("Infinity"),
            StatValue::Float(_) => serializer.serialize_str("-Infinity"),
            StatValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl Display for StatValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(i) => write!(f, "{}", i),
            StatValue::Float(v) => write!(f, "{}", format_float(*v)),
            StatValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Int(v)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

/// One `(timestamp, value)` pair of a query result. Serializes as a
/// two-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatPoint(pub i64, pub StatValue);

impl StatPoint {
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn value(&self) -> &StatValue {
        &self.1
    }
}

/// A raw sample as read from storage, value still undecoded.
pub type RawSample = (i64, String);

// ----------------------------------------------------------------------------
// Data Format
// ----------------------------------------------------------------------------

/// How each returned point's value is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Raw value, or windowed average when sampling
    #[default]
    Value,
    /// Slope between the first and last point of the window
    Rate,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Value => "value",
            DataFormat::Rate => "rate",
        }
    }
}

impl FromStr for DataFormat {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(DataFormat::Value),
            "rate" => Ok(DataFormat::Rate),
            other => Err(StatsError::InvalidDataFormat(other.to_string())),
        }
    }
}

impl Display for DataFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("42", StatValue::Int(42))]
    #[case(" -7 ", StatValue::Int(-7))]
    #[case("2.5", StatValue::Float(2.5))]
    #[case("2.0", StatValue::Float(2.0))]
    #[case("1e3", StatValue::Float(1000.0))]
    #[case("up", StatValue::Text("up".into()))]
    fn test_value_decoding(#[case] raw: &str, #[case] expected: StatValue) {
        assert_eq!(StatValue::parse(raw), expected);
    }

    #[test]
    fn test_stringify_keeps_float_marker() {
        assert_eq!(stringify_json(&json!(1)), "1");
        assert_eq!(stringify_json(&json!(2.0)), "2.0");
        assert_eq!(stringify_json(&json!(0.25)), "0.25");
        assert_eq!(stringify_json(&json!("Error")), "Error");
        assert_eq!(stringify_json(&json!(true)), "True");
        assert_eq!(StatValue::parse(&stringify_json(&json!(2.0))), StatValue::Float(2.0));
    }

    #[test]
    fn test_json_timestamp() {
        assert_eq!(json_timestamp(&json!(1297278987000i64)), Some(1297278987000));
        assert_eq!(json_timestamp(&json!(12.9)), Some(12));
        assert_eq!(json_timestamp(&json!("15")), Some(15));
        assert_eq!(json_timestamp(&json!(null)), None);
        assert_eq!(json_timestamp(&json!("soon")), None);
    }

    #[test]
    fn test_json_timestamp_rejects_out_of_range() {
        assert_eq!(json_timestamp(&json!(MAX_TIMESTAMP_MS)), Some(MAX_TIMESTAMP_MS));
        assert_eq!(json_timestamp(&json!(10_000_000_000_000_000i64)), None);
        assert_eq!(json_timestamp(&json!(i64::MIN)), None);
        assert_eq!(json_timestamp(&json!(1e300)), None);
        assert_eq!(json_timestamp(&json!(u64::MAX)), None);
    }

    #[test]
    fn test_non_finite_values_serialize_as_strings() {
        let points = vec![
            StatPoint(1, StatValue::Float(f64::INFINITY)),
            StatPoint(2, StatValue::Float(f64::NEG_INFINITY)),
            StatPoint(3, StatValue::Float(f64::NAN)),
            StatPoint(4, StatValue::Float(0.5)),
        ];
        assert_eq!(
            serde_json::to_value(&points).unwrap(),
            json!([[1, "Infinity"], [2, "-Infinity"], [3, "NaN"], [4, 0.5]])
        );
    }

    #[test]
    fn test_stat_point_serializes_as_pair() {
        let point = StatPoint(1297278987000, StatValue::Int(1));
        assert_eq!(serde_json::to_string(&point).unwrap(), "[1297278987000,1]");
    }

    #[test]
    fn test_data_format_parse() {
        assert_eq!("rate".parse::<DataFormat>().unwrap(), DataFormat::Rate);
        assert!(matches!(
            "median".parse::<DataFormat>(),
            Err(StatsError::InvalidDataFormat(_))
        ));
    }
}
