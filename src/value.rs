/// LiveGrid cell values
///
/// A Row is an ordered sequence of typed cell values in schema order. Every
/// derived structure (sort order, filter set, group tree) refers to rows by
/// table position; only the Table owns `Row` values.

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int32,
    Int64,
    Float64,
    String,
    Bool,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int32 | ColumnType::Int64 | ColumnType::Float64)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Column value enum to support multiple types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Null,
}

/// One record, fixed column order
pub type Row = Vec<ColumnValue>;

/// Primary key value in its string form
pub type RowKey = String;

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, ColumnValue::Float64(f) if f.is_nan())
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            ColumnValue::Int32(_) => Some(ColumnType::Int32),
            ColumnValue::Int64(_) => Some(ColumnType::Int64),
            ColumnValue::Float64(_) => Some(ColumnType::Float64),
            ColumnValue::String(_) => Some(ColumnType::String),
            ColumnValue::Bool(_) => Some(ColumnType::Bool),
            ColumnValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int32(v) => Some(*v as i64),
            ColumnValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; None for strings, bools and nulls.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Int32(n) => Some(*n as f64),
            ColumnValue::Int64(n) => Some(*n as f64),
            ColumnValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// String form used for primary keys, group keys and tree paths.
    pub fn to_key(&self) -> RowKey {
        match self {
            ColumnValue::String(s) => s.clone(),
            ColumnValue::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Convert a JSON scalar into a cell value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(ColumnValue::Null),
            serde_json::Value::Bool(b) => Ok(ColumnValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ColumnValue::Int64(i))
                } else {
                    n.as_f64()
                        .map(ColumnValue::Float64)
                        .ok_or_else(|| format!("Unrepresentable number: {}", n))
                }
            }
            serde_json::Value::String(s) => Ok(ColumnValue::String(s.clone())),
            other => Err(format!("Expected a scalar value, got {}", other)),
        }
    }

    /// Coerce a value into the given column type where the conversion is lossless
    /// (JSON numbers arrive as Int64/Float64).
    pub fn coerce(self, target: ColumnType) -> Self {
        match (self, target) {
            (ColumnValue::Int64(n), ColumnType::Int32) if i32::try_from(n).is_ok() => {
                ColumnValue::Int32(n as i32)
            }
            (ColumnValue::Int32(n), ColumnType::Int64) => ColumnValue::Int64(n as i64),
            (ColumnValue::Int32(n), ColumnType::Float64) => ColumnValue::Float64(n as f64),
            (ColumnValue::Int64(n), ColumnType::Float64) => ColumnValue::Float64(n as f64),
            (value, _) => value,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ColumnValue::Bool(_) => 0,
            ColumnValue::Int32(_) | ColumnValue::Int64(_) | ColumnValue::Float64(_) => 1,
            ColumnValue::String(_) => 2,
            ColumnValue::Null => 3,
        }
    }
}

impl<'de> Deserialize<'de> for ColumnValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        ColumnValue::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int32(v) => write!(f, "{}", v),
            ColumnValue::Int64(v) => write!(f, "{}", v),
            ColumnValue::Float64(v) => write!(f, "{}", v),
            ColumnValue::String(v) => f.write_str(v),
            ColumnValue::Bool(v) => write!(f, "{}", v),
            ColumnValue::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        ColumnValue::String(s.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(s: String) -> Self {
        ColumnValue::String(s)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int32(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int64(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float64(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}

/// Total ordering used by sorting and grouping. Numbers compare across widths,
/// NaN sorts after every number, NULLs sort last, mixed types order by type.
pub fn compare_values(a: &ColumnValue, b: &ColumnValue) -> Ordering {
    match (a, b) {
        (ColumnValue::Null, ColumnValue::Null) => Ordering::Equal,
        (ColumnValue::Null, _) => Ordering::Greater,
        (_, ColumnValue::Null) => Ordering::Less,
        (ColumnValue::Int32(x), ColumnValue::Int32(y)) => x.cmp(y),
        (ColumnValue::Int64(x), ColumnValue::Int64(y)) => x.cmp(y),
        (ColumnValue::String(x), ColumnValue::String(y)) => x.cmp(y),
        (ColumnValue::Bool(x), ColumnValue::Bool(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match (x.is_nan(), y.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            },
            _ => a.type_rank().cmp(&b.type_rank()),
        },
    }
}

/// Equality that treats numbers of different widths as equal when their values are.
pub fn values_equal(a: &ColumnValue, b: &ColumnValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
