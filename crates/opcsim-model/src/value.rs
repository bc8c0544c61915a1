//! ---
//! opcsim_section: "02-value-model"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Typed value conversion and canonical formatting."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ModelError, Result};

/// Declared data type of a node value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Double,
    Float,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Boolean,
    String,
    DateTime,
    ByteString,
    Array,
}

impl DataType {
    /// Whether the type stores an integral value.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int32
                | DataType::Int64
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    /// Whether the waveform engine can drive values of this type.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, DataType::Double | DataType::Float)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Double => "double",
            DataType::Float => "float",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Boolean => "boolean",
            DataType::String => "string",
            DataType::DateTime => "datetime",
            DataType::ByteString => "bytestring",
            DataType::Array => "array",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "double" => Ok(DataType::Double),
            "float" => Ok(DataType::Float),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "uint16" => Ok(DataType::UInt16),
            "uint32" => Ok(DataType::UInt32),
            "uint64" => Ok(DataType::UInt64),
            "boolean" => Ok(DataType::Boolean),
            "string" => Ok(DataType::String),
            "datetime" => Ok(DataType::DateTime),
            "bytestring" => Ok(DataType::ByteString),
            "array" => Ok(DataType::Array),
            other => Err(format!("unknown data type: {}", other)),
        }
    }
}

/// A runtime value carried through the address space.
///
/// Node records persist values as canonical strings; this enum is the typed
/// form the adapter and the waveform engine operate on.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Text(String),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
    Int16Array(Vec<i16>),
}

/// Every element of an int16 array must stay within this range.
pub const INT16_RANGE: std::ops::RangeInclusive<i64> = -32768..=32767;

fn conversion(raw: &str, data_type: DataType) -> ModelError {
    ModelError::Conversion {
        value: raw.to_owned(),
        data_type,
    }
}

impl TypedValue {
    /// Parse a raw string into a typed value according to the declared type.
    ///
    /// Numeric parsing is locale independent. Booleans accept a
    /// case-insensitive {true, 1, yes, on} as true and anything else as
    /// false. Datetimes accept RFC 3339 or a naive ISO-8601 timestamp
    /// interpreted as UTC. Int16 arrays are JSON lists whose elements must
    /// fit the int16 range. Failures return [`ModelError::Conversion`];
    /// this function is never used for control flow.
    pub fn convert(raw: &str, data_type: DataType) -> Result<TypedValue> {
        let raw = raw.trim();
        match data_type {
            DataType::Double => raw
                .parse::<f64>()
                .map(TypedValue::Double)
                .map_err(|_| conversion(raw, data_type)),
            DataType::Float => raw
                .parse::<f32>()
                .map(TypedValue::Float)
                .map_err(|_| conversion(raw, data_type)),
            DataType::Int32 => raw
                .parse::<i32>()
                .map(TypedValue::Int32)
                .map_err(|_| conversion(raw, data_type)),
            DataType::Int64 => raw
                .parse::<i64>()
                .map(TypedValue::Int64)
                .map_err(|_| conversion(raw, data_type)),
            DataType::UInt16 => raw
                .parse::<u16>()
                .map(TypedValue::UInt16)
                .map_err(|_| conversion(raw, data_type)),
            DataType::UInt32 => raw
                .parse::<u32>()
                .map(TypedValue::UInt32)
                .map_err(|_| conversion(raw, data_type)),
            DataType::UInt64 => raw
                .parse::<u64>()
                .map(TypedValue::UInt64)
                .map_err(|_| conversion(raw, data_type)),
            DataType::Boolean => {
                let truthy = matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
                Ok(TypedValue::Bool(truthy))
            }
            DataType::String => Ok(TypedValue::Text(raw.to_owned())),
            DataType::DateTime => parse_datetime(raw)
                .map(TypedValue::DateTime)
                .ok_or_else(|| conversion(raw, data_type)),
            DataType::ByteString => BASE64
                .decode(raw)
                .map(TypedValue::Bytes)
                .map_err(|_| conversion(raw, data_type)),
            DataType::Array => {
                let elements: Vec<i64> =
                    serde_json::from_str(raw).map_err(|_| conversion(raw, data_type))?;
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    if !INT16_RANGE.contains(&element) {
                        return Err(conversion(raw, data_type));
                    }
                    out.push(element as i16);
                }
                Ok(TypedValue::Int16Array(out))
            }
        }
    }

    /// Default value used when a node has no stored value yet.
    pub fn default_for(data_type: DataType) -> TypedValue {
        match data_type {
            DataType::Double => TypedValue::Double(0.0),
            DataType::Float => TypedValue::Float(0.0),
            DataType::Int32 => TypedValue::Int32(0),
            DataType::Int64 => TypedValue::Int64(0),
            DataType::UInt16 => TypedValue::UInt16(0),
            DataType::UInt32 => TypedValue::UInt32(0),
            DataType::UInt64 => TypedValue::UInt64(0),
            DataType::Boolean => TypedValue::Bool(false),
            DataType::String => TypedValue::Text(String::new()),
            DataType::DateTime => TypedValue::DateTime(Utc::now()),
            DataType::ByteString => TypedValue::Bytes(Vec::new()),
            DataType::Array => TypedValue::Int16Array(Vec::new()),
        }
    }

    /// The declared data type this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::Double(_) => DataType::Double,
            TypedValue::Float(_) => DataType::Float,
            TypedValue::Int32(_) => DataType::Int32,
            TypedValue::Int64(_) => DataType::Int64,
            TypedValue::UInt16(_) => DataType::UInt16,
            TypedValue::UInt32(_) => DataType::UInt32,
            TypedValue::UInt64(_) => DataType::UInt64,
            TypedValue::Bool(_) => DataType::Boolean,
            TypedValue::Text(_) => DataType::String,
            TypedValue::DateTime(_) => DataType::DateTime,
            TypedValue::Bytes(_) => DataType::ByteString,
            TypedValue::Int16Array(_) => DataType::Array,
        }
    }

    /// Canonical string form persisted in the node record.
    pub fn canonical(&self) -> String {
        match self {
            TypedValue::Double(v) => format!("{}", v),
            TypedValue::Float(v) => format!("{}", v),
            TypedValue::Int32(v) => v.to_string(),
            TypedValue::Int64(v) => v.to_string(),
            TypedValue::UInt16(v) => v.to_string(),
            TypedValue::UInt32(v) => v.to_string(),
            TypedValue::UInt64(v) => v.to_string(),
            TypedValue::Bool(v) => v.to_string(),
            TypedValue::Text(v) => v.clone(),
            TypedValue::DateTime(v) => v.to_rfc3339(),
            TypedValue::Bytes(v) => BASE64.encode(v),
            TypedValue::Int16Array(v) => {
                let joined = v
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("[{}]", joined)
            }
        }
    }

    /// Numeric view used by the waveform engine; `None` for non-numeric
    /// values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Double(v) => Some(*v),
            TypedValue::Float(v) => Some(f64::from(*v)),
            TypedValue::Int32(v) => Some(f64::from(*v)),
            TypedValue::Int64(v) => Some(*v as f64),
            TypedValue::UInt16(v) => Some(f64::from(*v)),
            TypedValue::UInt32(v) => Some(f64::from(*v)),
            TypedValue::UInt64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Build a typed numeric value from a waveform sample.
    ///
    /// Integer types round to the nearest integer and reject samples outside
    /// their domain; floating types round to `decimal_places`.
    pub fn from_f64(data_type: DataType, sample: f64, decimal_places: u8) -> Result<TypedValue> {
        let not_representable = || ModelError::NotRepresentable {
            value: sample,
            data_type,
        };
        if !sample.is_finite() {
            return Err(not_representable());
        }
        match data_type {
            DataType::Double => Ok(TypedValue::Double(round_decimals(sample, decimal_places))),
            DataType::Float => Ok(TypedValue::Float(
                round_decimals(sample, decimal_places) as f32
            )),
            DataType::Int32 => {
                let rounded = sample.round();
                if rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
                    return Err(not_representable());
                }
                Ok(TypedValue::Int32(rounded as i32))
            }
            DataType::Int64 => {
                let rounded = sample.round();
                if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
                    return Err(not_representable());
                }
                Ok(TypedValue::Int64(rounded as i64))
            }
            DataType::UInt16 => {
                let rounded = sample.round();
                if rounded < 0.0 || rounded > f64::from(u16::MAX) {
                    return Err(not_representable());
                }
                Ok(TypedValue::UInt16(rounded as u16))
            }
            DataType::UInt32 => {
                let rounded = sample.round();
                if rounded < 0.0 || rounded > f64::from(u32::MAX) {
                    return Err(not_representable());
                }
                Ok(TypedValue::UInt32(rounded as u32))
            }
            DataType::UInt64 => {
                let rounded = sample.round();
                if rounded < 0.0 || rounded > u64::MAX as f64 {
                    return Err(not_representable());
                }
                Ok(TypedValue::UInt64(rounded as u64))
            }
            _ => Err(not_representable()),
        }
    }
}

/// Round to a fixed number of decimal places.
pub fn round_decimals(value: f64, decimal_places: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimal_places));
    (value * factor).round() / factor
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_unsigned_in_range() {
        let value = TypedValue::convert("123", DataType::UInt16).unwrap();
        assert_eq!(value, TypedValue::UInt16(123));
    }

    #[test]
    fn rejects_negative_unsigned() {
        let err = TypedValue::convert("-5", DataType::UInt16).unwrap_err();
        assert!(matches!(err, ModelError::Conversion { .. }));
    }

    #[test]
    fn boolean_accepts_truthy_aliases() {
        for raw in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(
                TypedValue::convert(raw, DataType::Boolean).unwrap(),
                TypedValue::Bool(true),
                "{raw} should be truthy"
            );
        }
        assert_eq!(
            TypedValue::convert("off", DataType::Boolean).unwrap(),
            TypedValue::Bool(false)
        );
    }

    #[test]
    fn array_elements_must_fit_int16() {
        let ok = TypedValue::convert("[1, -40, 32767]", DataType::Array).unwrap();
        assert_eq!(ok, TypedValue::Int16Array(vec![1, -40, 32767]));

        let err = TypedValue::convert("[1, 40000]", DataType::Array).unwrap_err();
        assert!(matches!(err, ModelError::Conversion { .. }));
    }

    #[test]
    fn datetime_accepts_rfc3339_and_naive_iso() {
        let rfc = TypedValue::convert("2024-05-01T12:30:00Z", DataType::DateTime).unwrap();
        let naive = TypedValue::convert("2024-05-01T12:30:00", DataType::DateTime).unwrap();
        assert_eq!(rfc, naive);
    }

    #[test]
    fn bytestring_round_trips_base64() {
        let value = TypedValue::convert("aGVsbG8=", DataType::ByteString).unwrap();
        assert_eq!(value, TypedValue::Bytes(b"hello".to_vec()));
        assert_eq!(value.canonical(), "aGVsbG8=");
    }

    #[test]
    fn defaults_match_declared_type() {
        assert_eq!(
            TypedValue::default_for(DataType::Double),
            TypedValue::Double(0.0)
        );
        assert_eq!(
            TypedValue::default_for(DataType::String),
            TypedValue::Text(String::new())
        );
        assert_eq!(
            TypedValue::default_for(DataType::Array),
            TypedValue::Int16Array(Vec::new())
        );
        assert_eq!(
            TypedValue::default_for(DataType::DateTime).data_type(),
            DataType::DateTime
        );
    }

    #[test]
    fn from_f64_rounds_integers_and_checks_domain() {
        assert_eq!(
            TypedValue::from_f64(DataType::Int32, 41.6, 2).unwrap(),
            TypedValue::Int32(42)
        );
        assert_eq!(
            TypedValue::from_f64(DataType::Double, 1.23456, 2).unwrap(),
            TypedValue::Double(1.23)
        );
        assert!(TypedValue::from_f64(DataType::UInt16, -1.0, 0).is_err());
        assert!(TypedValue::from_f64(DataType::UInt16, 70000.0, 0).is_err());
    }

    #[test]
    fn canonical_values_reparse() {
        let cases = [
            TypedValue::Double(3.25),
            TypedValue::Int64(-12),
            TypedValue::UInt32(9),
            TypedValue::Bool(true),
            TypedValue::Int16Array(vec![1, 2, 3]),
        ];
        for value in cases {
            let reparsed = TypedValue::convert(&value.canonical(), value.data_type()).unwrap();
            assert_eq!(reparsed, value);
        }
    }
}
