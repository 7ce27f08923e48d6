//! Typed property values.
//!
//! Every invoker reports a declared [`ValueType`] and reads/writes [`Value`]s.
//! The engine never inspects entity fields directly, so this module is the one
//! place that knows how to convert, order, and print values:
//!
//! - [`Value::convert`] is the shared type-conversion helper used by key
//!   coercion and query parameter parsing
//! - [`Value::compare`] is the ordering capability required by range operators
//! - [`Value::format_literal`] renders values for `Query::format`

use crate::error::{Result, SieveError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Accepted textual date layouts, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"];

/// Accepted textual date-time layouts, tried in order.
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M",
];

/// The declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Date,
    DateTime,
    Bytes,
}

impl ValueType {
    /// Whether values of this type support range comparisons.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ValueType::Bytes)
    }

    /// The default value of this type (treated as null by indexes).
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Text => Value::Text(String::new()),
            ValueType::Date => Value::Date(epoch_date()),
            ValueType::DateTime => Value::DateTime(epoch_date().and_time(NaiveTime::MIN)),
            ValueType::Bytes => Value::Bytes(Vec::new()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Date => "date",
            ValueType::DateTime => "datetime",
            ValueType::Bytes => "bytes",
        };
        f.pad(name)
    }
}

impl FromStr for ValueType {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bool" | "boolean" => Ok(ValueType::Bool),
            "int" | "integer" | "long" => Ok(ValueType::Int),
            "float" | "double" | "real" => Ok(ValueType::Float),
            "text" | "string" => Ok(ValueType::Text),
            "date" => Ok(ValueType::Date),
            "datetime" | "timestamp" => Ok(ValueType::DateTime),
            "bytes" | "binary" => Ok(ValueType::Bytes),
            _ => Err(SieveError::invalid_argument(
                "value type",
                format!("unknown type name {:?}", s),
            )),
        }
    }
}

/// A dynamically typed property value.
///
/// `List` and `Range` only appear as comparison arguments (`In` and
/// `Between`); invokers never return them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Range(Box<Value>, Box<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Build a membership argument for `In`.
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(values.into_iter().map(Into::into).collect())
    }

    /// Build a range argument for `Between`.
    pub fn range(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Value::Range(Box::new(min.into()), Box::new(max.into()))
    }

    /// The scalar type of this value, if it has one.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Text(_) => Some(ValueType::Text),
            Value::Date(_) => Some(ValueType::Date),
            Value::DateTime(_) => Some(ValueType::DateTime),
            Value::Bytes(_) => Some(ValueType::Bytes),
            Value::Null | Value::List(_) | Value::Range(..) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value equals the default of its own type.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Date(d) => *d == epoch_date(),
            Value::DateTime(dt) => *dt == epoch_date().and_time(NaiveTime::MIN),
            Value::Bytes(b) => b.is_empty(),
            Value::Null | Value::List(_) | Value::Range(..) => false,
        }
    }

    /// Whether this value equals the null sentinel its index key type uses.
    ///
    /// Such values share the null bucket, so they count as null everywhere.
    pub fn is_sentinel(&self) -> bool {
        match self {
            Value::Int(i) => *i == i64::MIN,
            Value::Float(f) => *f == f64::MIN,
            Value::Date(d) => *d == NaiveDate::MIN,
            Value::DateTime(dt) => *dt == NaiveDateTime::MIN,
            _ => false,
        }
    }

    /// Collapse defaults and sentinel values to `Null`, the way indexes store
    /// them.
    pub fn normalized(self) -> Value {
        if self.is_default() || self.is_sentinel() {
            Value::Null
        } else {
            self
        }
    }

    /// Whether a query parameter holding this value should be skipped.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Convert this value to `target`.
    ///
    /// `Null` converts to `Null` for every target. Lists and ranges are not
    /// scalar and never convert.
    pub fn convert(&self, target: ValueType) -> Result<Value> {
        if self.is_null() || self.value_type() == Some(target) {
            return Ok(self.clone());
        }
        let fail = || SieveError::conversion(self.to_text(), target);

        let converted = match (self, target) {
            (Value::List(_) | Value::Range(..), _) => return Err(fail()),

            (_, ValueType::Text) => Value::Text(self.to_text()),

            (Value::Int(i), ValueType::Bool) => Value::Bool(*i != 0),
            (Value::Text(s), ValueType::Bool) => Value::Bool(parse_bool(s).ok_or_else(fail)?),

            (Value::Bool(b), ValueType::Int) => Value::Int(i64::from(*b)),
            (Value::Float(f), ValueType::Int) => Value::Int(float_to_int(*f).ok_or_else(fail)?),
            (Value::Text(s), ValueType::Int) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => {
                        let f = s.parse::<f64>().map_err(|_| fail())?;
                        Value::Int(float_to_int(f).ok_or_else(fail)?)
                    }
                }
            }

            (Value::Bool(b), ValueType::Float) => Value::Float(if *b { 1.0 } else { 0.0 }),
            (Value::Int(i), ValueType::Float) => Value::Float(*i as f64),
            (Value::Text(s), ValueType::Float) => {
                Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?)
            }

            (Value::DateTime(dt), ValueType::Date) => Value::Date(dt.date()),
            (Value::Text(s), ValueType::Date) => Value::Date(parse_date(s).ok_or_else(fail)?),

            (Value::Date(d), ValueType::DateTime) => Value::DateTime(d.and_time(NaiveTime::MIN)),
            (Value::Text(s), ValueType::DateTime) => {
                Value::DateTime(parse_date_time(s).ok_or_else(fail)?)
            }

            (Value::Text(s), ValueType::Bytes) => Value::Bytes(parse_bytes(s)),

            _ => return Err(fail()),
        };
        Ok(converted)
    }

    /// Ordering capability. `None` when the values are not mutually ordered.
    ///
    /// Ints and floats compare numerically; dates compare with date-times at
    /// midnight. Bytes and lists are never ordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, unordered pairs tie.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Equality as used by `Equal` and `In`: numeric kinds compare by value.
    pub fn matches(&self, other: &Value) -> bool {
        self == other || self.compare(other) == Some(Ordering::Equal)
    }

    /// Unquoted text form, used for `Like` matching and display.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y.%m.%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y.%m.%d %H:%M:%S").to_string(),
            Value::Bytes(b) => to_hex(b),
            Value::List(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Range(min, max) => format!("{} and {}", min.to_text(), max.to_text()),
        }
    }

    /// Literal form for query formatting: strings and dates quoted, lists
    /// parenthesized.
    pub fn format_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Date(_) | Value::DateTime(_) => format!("'{}'", self.to_text()),
            Value::List(items) => format!(
                "({})",
                items
                    .iter()
                    .map(Value::format_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Range(min, max) => {
                format!("{} and {}", min.format_literal(), max.format_literal())
            }
            _ => self.to_text(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

pub(crate) fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn float_to_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date_time(s).map(|dt| dt.date()))
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn parse_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        // Slicing by byte offset needs single-byte characters.
        if hex.is_ascii() && hex.len() % 2 == 0 {
            let decoded: Option<Vec<u8>> = (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
                .collect();
            if let Some(bytes) = decoded {
                return bytes;
            }
        }
    }
    s.as_bytes().to_vec()
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
