//! Column and parameter values.
//!
//! [`Value`] is the driver-independent representation of one SQL value. It is
//! used both for bound statement parameters and for decoded result columns.

use serde::{Deserialize, Serialize};

/// A single SQL value.
///
/// In JSON, bytes are written as a base64 string. Reading JSON never yields
/// [`Value::Bytes`]: every string deserializes as [`Value::Text`], so bytes do
/// not survive a JSON round trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value, used in mapping errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a column [`Value`] into a record field type.
///
/// On mismatch the original value is handed back so the caller can report
/// its type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Value>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(v as i64),
            other => Err(other),
        }
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($t:ty),+) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, Value> {
                    match value {
                        Value::Int(v) => <$t>::try_from(v).map_err(|_| Value::Int(v)),
                        Value::Bool(v) => Ok(v as $t),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

impl_from_value_narrow_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(other),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, Value> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bool(v) => Ok(v),
            // SQLite and MySQL store booleans as integers
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Text(s) => match chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(date) => Ok(date),
                Err(_) => Err(Value::Text(s)),
            },
            other => Err(other),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Text(s) => {
                let parsed = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f"));
                parsed.map_err(|_| Value::Text(s))
            }
            other => Err(other),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Text("a".into()).type_name(), "text");
        assert_eq!(Value::Bytes(vec![1]).type_name(), "bytes");
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(i64::from_value(Value::Int(42)), Ok(42));
        assert_eq!(i32::from_value(Value::Int(-7)), Ok(-7));
        assert_eq!(
            i32::from_value(Value::Int(i64::MAX)),
            Err(Value::Int(i64::MAX))
        );
        assert_eq!(u32::from_value(Value::Int(-1)), Err(Value::Int(-1)));
        assert_eq!(
            i64::from_value(Value::Text("1".into())),
            Err(Value::Text("1".into()))
        );
    }

    #[test]
    fn test_bool_accepts_integer_storage() {
        assert_eq!(bool::from_value(Value::Int(1)), Ok(true));
        assert_eq!(bool::from_value(Value::Int(0)), Ok(false));
        assert_eq!(bool::from_value(Value::Int(2)), Err(Value::Int(2)));
    }

    #[test]
    fn test_float_widens_integers() {
        assert_eq!(f64::from_value(Value::Int(3)), Ok(3.0));
        assert_eq!(f64::from_value(Value::Float(2.5)), Ok(2.5));
    }

    #[test]
    fn test_option_maps_null_to_none() {
        assert_eq!(Option::<String>::from_value(Value::Null), Ok(None));
        assert_eq!(
            Option::<String>::from_value(Value::Text("x".into())),
            Ok(Some("x".to_string()))
        );
    }

    #[test]
    fn test_chrono_parsing() {
        let date = chrono::NaiveDate::from_value(Value::Text("2024-02-29".into())).unwrap();
        assert_eq!(date.to_string(), "2024-02-29");

        let ts =
            chrono::NaiveDateTime::from_value(Value::Text("2024-02-29 10:11:12".into())).unwrap();
        assert_eq!(ts.to_string(), "2024-02-29 10:11:12");

        assert!(chrono::NaiveDate::from_value(Value::Text("yesterday".into())).is_err());
    }

    #[test]
    fn test_json_round_trip_uses_base64_for_bytes() {
        let json = serde_json::to_string(&Value::Bytes(b"hello".to_vec())).unwrap();
        assert_eq!(json, "\"aGVsbG8=\"");
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::Int(5)).unwrap(), "5");
    }

    #[test]
    fn test_json_strings_deserialize_as_text() {
        let value: Value = serde_json::from_str("\"aGVsbG8=\"").unwrap();
        assert_eq!(value, Value::Text("aGVsbG8=".into()));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }
}
