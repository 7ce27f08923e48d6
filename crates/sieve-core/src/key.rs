//! Key types that secondary indexes can be built over.
//!
//! Each supported key type implements [`IndexKey`]. The index factory picks the
//! implementation from an invoker's declared [`ValueType`], so the set of key
//! types is closed at compile time.

use crate::error::{Result, SieveError};
use crate::nulls::null_key;
use crate::value::{epoch_date, Value, ValueType};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A hashable key type for secondary index buckets.
pub trait IndexKey: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {
    /// The declared value type this key represents.
    const VALUE_TYPE: ValueType;

    /// Build the null sentinel. Only the null-key registry calls this.
    fn make_null() -> Self;

    /// Whether this key equals the default of its type.
    fn is_default(&self) -> bool;

    /// Extract a key from a non-null value already converted to `VALUE_TYPE`.
    fn from_scalar(value: Value) -> Option<Self>;

    fn to_value(&self) -> Value;

    /// Ordering between keys, `None` if the key type is unordered or either
    /// key is not comparable (NaN).
    fn compare_key(&self, other: &Self) -> Option<Ordering>;

    /// Total order used only to arrange buckets in scan output.
    fn sort_key(&self, other: &Self) -> Ordering {
        self.compare_key(other).unwrap_or(Ordering::Equal)
    }
}

/// Normalize an untyped value to a canonical bucket key.
///
/// Converts through the shared conversion helper and substitutes the null
/// sentinel for null and default values. Conversion failures propagate: a
/// wrong bucket would silently corrupt later scans.
pub fn check_null<K: IndexKey>(value: &Value) -> Result<K> {
    let converted = value.convert(K::VALUE_TYPE)?;
    if converted.is_null() {
        return Ok(null_key::<K>());
    }
    let key = K::from_scalar(converted)
        .ok_or_else(|| SieveError::conversion(value.to_text(), K::VALUE_TYPE))?;
    Ok(normalize(key))
}

/// Substitute the null sentinel for a default key.
pub fn normalize<K: IndexKey>(key: K) -> K {
    if key.is_default() {
        null_key::<K>()
    } else {
        key
    }
}

impl IndexKey for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;

    fn make_null() -> Self {
        false
    }

    fn is_default(&self) -> bool {
        !*self
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl IndexKey for i64 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn make_null() -> Self {
        i64::MIN
    }

    fn is_default(&self) -> bool {
        *self == 0
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A float key with bitwise hashing.
///
/// `-0.0` and `0.0` are the same key, and all NaNs are one key. NaN never
/// satisfies a comparison, but sorts after every number in scan output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Real(pub f64);

impl Real {
    fn canonical_bits(&self) -> u64 {
        if self.0.is_nan() {
            f64::NAN.to_bits()
        } else if self.0 == 0.0 {
            0.0f64.to_bits()
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bits() == other.canonical_bits()
    }
}

impl Eq for Real {}

impl Hash for Real {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bits().hash(state);
    }
}

impl IndexKey for Real {
    const VALUE_TYPE: ValueType = ValueType::Float;

    fn make_null() -> Self {
        Real(f64::MIN)
    }

    fn is_default(&self) -> bool {
        self.0 == 0.0
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(Real(f)),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Float(self.0)
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }

    fn sort_key(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl IndexKey for String {
    const VALUE_TYPE: ValueType = ValueType::Text;

    fn make_null() -> Self {
        String::new()
    }

    fn is_default(&self) -> bool {
        self.is_empty()
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl IndexKey for NaiveDate {
    const VALUE_TYPE: ValueType = ValueType::Date;

    fn make_null() -> Self {
        NaiveDate::MIN
    }

    fn is_default(&self) -> bool {
        *self == epoch_date()
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl IndexKey for NaiveDateTime {
    const VALUE_TYPE: ValueType = ValueType::DateTime;

    fn make_null() -> Self {
        NaiveDateTime::MIN
    }

    fn is_default(&self) -> bool {
        *self == epoch_date().and_time(NaiveTime::MIN)
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn compare_key(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl IndexKey for Vec<u8> {
    const VALUE_TYPE: ValueType = ValueType::Bytes;

    fn make_null() -> Self {
        Vec::new()
    }

    fn is_default(&self) -> bool {
        self.is_empty()
    }

    fn from_scalar(value: Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    // Binary keys are hash-only.
    fn compare_key(&self, _other: &Self) -> Option<Ordering> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_null_substitutes_sentinel() {
        assert_eq!(check_null::<i64>(&Value::Null).unwrap(), i64::MIN);
        assert_eq!(check_null::<i64>(&Value::Int(0)).unwrap(), i64::MIN);
        assert_eq!(check_null::<i64>(&Value::Int(5)).unwrap(), 5);
        assert_eq!(check_null::<String>(&Value::from("")).unwrap(), "");
    }

    #[test]
    fn test_check_null_parses_untyped() {
        assert_eq!(check_null::<i64>(&Value::from("17")).unwrap(), 17);
        let date = check_null::<NaiveDate>(&Value::from("2020-02-29")).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 2, 29).unwrap());
    }

    #[test]
    fn test_check_null_propagates_failure() {
        let err = check_null::<i64>(&Value::from("seventeen")).unwrap_err();
        assert!(matches!(err, SieveError::Conversion { .. }));
    }

    #[test]
    fn test_real_key_identity() {
        assert_eq!(Real(-0.0), Real(0.0));
        assert_eq!(Real(f64::NAN), Real(f64::NAN));
        assert_ne!(Real(1.0), Real(1.5));
        assert_eq!(Real(1.0).compare_key(&Real(2.0)), Some(Ordering::Less));
    }

    #[test]
    fn test_nan_fails_closed() {
        assert_eq!(Real(f64::NAN).compare_key(&Real(1.0)), None);
        assert_eq!(Real(1.0).compare_key(&Real(f64::NAN)), None);
        assert_eq!(Real(f64::NAN).sort_key(&Real(1.0)), Ordering::Greater);
    }

    #[test]
    fn test_bytes_unordered() {
        assert_eq!(vec![1u8].compare_key(&vec![2u8]), None);
    }
}
