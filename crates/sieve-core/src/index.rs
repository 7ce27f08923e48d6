//! Secondary indexes over a collection.
//!
//! A [`ListIndex`] maps each value of one property to the items holding that
//! value. Null and default values are stored under the key type's null
//! sentinel, so every item sits in exactly one bucket.
//!
//! ## Architecture
//!
//! - [`ItemIndex`] is the type-erased surface the registry and query evaluator
//!   work with
//! - [`ListIndex<T, K>`] is the implementation for one concrete key type
//! - [`for_invoker`] picks `K` from the invoker's declared value type
//!
//! Buckets live either in one `RwLock<HashMap>` (plain mode) or in a sharded
//! `DashMap` (concurrent mode). Range and pattern scans walk every bucket key:
//! the map has no ordering, so their cost is linear in key cardinality.

use crate::compare::{like_needle, membership, CompareKind, CompareType};
use crate::error::{Result, SieveError};
use crate::invoker::SharedInvoker;
use crate::key::{check_null, IndexKey, Real};
use crate::nulls::null_key;
use crate::parameter::QueryParameter;
use crate::value::{Value, ValueType};
use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Type-erased secondary index over items of type `T`.
pub trait ItemIndex<T>: Send + Sync {
    /// Name of the indexed property.
    fn property(&self) -> &str;

    fn value_type(&self) -> ValueType;

    /// Whether buckets are backed by a concurrent map.
    fn is_concurrent(&self) -> bool;

    /// Index `item` under its current property value.
    fn add(&self, item: &Arc<T>) -> Result<()>;

    /// Index `item` under an explicit key.
    fn add_with_key(&self, item: &Arc<T>, key: &Value) -> Result<()>;

    /// Remove `item`, looking in the bucket of its current value first.
    ///
    /// Returns false if the item was not indexed.
    fn remove(&self, item: &Arc<T>) -> Result<bool>;

    /// Remove `item` from the bucket of `key`, falling back to a full scan.
    fn remove_with_key(&self, item: &Arc<T>, key: &Value) -> Result<bool>;

    /// Re-index one item whose value changed.
    fn refresh_item(&self, item: &Arc<T>) -> Result<()> {
        self.remove(item)?;
        self.add(item)
    }

    /// Rebuild the whole index from `items`.
    fn refresh(&self, items: &[Arc<T>]) -> Result<()>;

    fn clear(&self);

    /// First item indexed under `key`.
    fn select_one(&self, key: &Value) -> Result<Option<Arc<T>>>;

    /// Items whose value satisfies `compare` against `value`.
    fn scan(&self, compare: CompareType, value: &Value) -> Result<Vec<Arc<T>>>;

    /// Scan using a query parameter's operator and typed value.
    fn scan_parameter(&self, parameter: &QueryParameter<T>) -> Result<Vec<Arc<T>>> {
        self.scan(parameter.compare(), parameter.typed_value())
    }

    /// Number of distinct keys.
    fn bucket_count(&self) -> usize;

    /// Number of indexed items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the index matching the invoker's declared value type.
pub fn for_invoker<T>(invoker: SharedInvoker<T>, concurrent: bool) -> Arc<dyn ItemIndex<T>>
where
    T: Send + Sync + 'static,
{
    match invoker.value_type() {
        ValueType::Bool => Arc::new(ListIndex::<T, bool>::new(invoker, concurrent)),
        ValueType::Int => Arc::new(ListIndex::<T, i64>::new(invoker, concurrent)),
        ValueType::Float => Arc::new(ListIndex::<T, Real>::new(invoker, concurrent)),
        ValueType::Text => Arc::new(ListIndex::<T, String>::new(invoker, concurrent)),
        ValueType::Date => Arc::new(ListIndex::<T, NaiveDate>::new(invoker, concurrent)),
        ValueType::DateTime => Arc::new(ListIndex::<T, NaiveDateTime>::new(invoker, concurrent)),
        ValueType::Bytes => Arc::new(ListIndex::<T, Vec<u8>>::new(invoker, concurrent)),
    }
}

/// Bucket storage: key -> items, in insertion order within a bucket.
enum Buckets<K, T> {
    Plain(RwLock<HashMap<K, Vec<Arc<T>>>>),
    Concurrent(DashMap<K, Vec<Arc<T>>>),
}

impl<K: IndexKey, T> Buckets<K, T> {
    fn new(concurrent: bool) -> Self {
        if concurrent {
            Buckets::Concurrent(DashMap::new())
        } else {
            Buckets::Plain(RwLock::new(HashMap::new()))
        }
    }

    fn push(&self, key: K, item: Arc<T>) {
        match self {
            Buckets::Plain(map) => map.write().entry(key).or_default().push(item),
            Buckets::Concurrent(map) => map.entry(key).or_default().push(item),
        }
    }

    /// Remove `item` from the bucket of `key`. Empty buckets are deleted.
    fn remove_from(&self, key: &K, item: &Arc<T>) -> bool {
        match self {
            Buckets::Plain(map) => {
                let mut map = map.write();
                let Some(bucket) = map.get_mut(key) else {
                    return false;
                };
                if !remove_item(bucket, item) {
                    return false;
                }
                if bucket.is_empty() {
                    map.remove(key);
                }
                true
            }
            Buckets::Concurrent(map) => {
                let removed = match map.get_mut(key) {
                    Some(mut bucket) => remove_item(&mut bucket, item),
                    None => false,
                };
                if removed {
                    map.remove_if(key, |_, bucket| bucket.is_empty());
                }
                removed
            }
        }
    }

    /// Remove `item` from whichever bucket holds it.
    fn remove_anywhere(&self, item: &Arc<T>) -> bool {
        let mut emptied = None;
        let mut found = false;
        match self {
            Buckets::Plain(map) => {
                let mut map = map.write();
                for (key, bucket) in map.iter_mut() {
                    if remove_item(bucket, item) {
                        found = true;
                        if bucket.is_empty() {
                            emptied = Some(key.clone());
                        }
                        break;
                    }
                }
                if let Some(key) = emptied {
                    map.remove(&key);
                }
            }
            Buckets::Concurrent(map) => {
                for mut entry in map.iter_mut() {
                    if remove_item(entry.value_mut(), item) {
                        found = true;
                        if entry.value().is_empty() {
                            emptied = Some(entry.key().clone());
                        }
                        break;
                    }
                }
                if let Some(key) = emptied {
                    map.remove_if(&key, |_, bucket| bucket.is_empty());
                }
            }
        }
        found
    }

    fn get(&self, key: &K) -> Vec<Arc<T>> {
        match self {
            Buckets::Plain(map) => map.read().get(key).cloned().unwrap_or_default(),
            Buckets::Concurrent(map) => map.get(key).map(|b| b.value().clone()).unwrap_or_default(),
        }
    }

    fn first(&self, key: &K) -> Option<Arc<T>> {
        match self {
            Buckets::Plain(map) => map.read().get(key).and_then(|b| b.first().cloned()),
            Buckets::Concurrent(map) => map.get(key).and_then(|b| b.first().cloned()),
        }
    }

    /// Snapshot of the buckets whose key passes `filter`.
    fn collect<F>(&self, filter: F) -> Vec<(K, Vec<Arc<T>>)>
    where
        F: Fn(&K) -> bool,
    {
        match self {
            Buckets::Plain(map) => map
                .read()
                .iter()
                .filter(|(key, _)| filter(key))
                .map(|(key, bucket)| (key.clone(), bucket.clone()))
                .collect(),
            Buckets::Concurrent(map) => map
                .iter()
                .filter(|entry| filter(entry.key()))
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    fn keys(&self) -> Vec<K> {
        match self {
            Buckets::Plain(map) => map.read().keys().cloned().collect(),
            Buckets::Concurrent(map) => map.iter().map(|e| e.key().clone()).collect(),
        }
    }

    fn clear(&self) {
        match self {
            Buckets::Plain(map) => map.write().clear(),
            Buckets::Concurrent(map) => map.clear(),
        }
    }

    fn bucket_count(&self) -> usize {
        match self {
            Buckets::Plain(map) => map.read().len(),
            Buckets::Concurrent(map) => map.len(),
        }
    }

    fn item_count(&self) -> usize {
        match self {
            Buckets::Plain(map) => map.read().values().map(Vec::len).sum(),
            Buckets::Concurrent(map) => map.iter().map(|e| e.value().len()).sum(),
        }
    }
}

fn remove_item<T>(bucket: &mut Vec<Arc<T>>, item: &Arc<T>) -> bool {
    match bucket.iter().position(|x| Arc::ptr_eq(x, item)) {
        Some(pos) => {
            bucket.remove(pos);
            true
        }
        None => false,
    }
}

/// Convert a range bound to a key without sentinel substitution.
///
/// `None` for a null bound: nothing compares against null.
pub(crate) fn bound_key<K: IndexKey>(value: &Value) -> Result<Option<K>> {
    let converted = value.convert(K::VALUE_TYPE)?;
    if converted.is_null() {
        return Ok(None);
    }
    K::from_scalar(converted)
        .map(Some)
        .ok_or_else(|| SieveError::conversion(value.to_text(), K::VALUE_TYPE))
}

/// Flatten matched buckets, ordering buckets by key when the key type is
/// ordered.
pub(crate) fn flatten<K: IndexKey, T>(mut buckets: Vec<(K, Vec<Arc<T>>)>) -> Vec<Arc<T>> {
    if K::VALUE_TYPE.is_ordered() {
        buckets.sort_by(|a, b| a.0.sort_key(&b.0));
    }
    buckets.into_iter().flat_map(|(_, items)| items).collect()
}

/// Hash index from the values of one property to the items holding them.
pub struct ListIndex<T, K: IndexKey> {
    invoker: SharedInvoker<T>,
    buckets: Buckets<K, T>,
    null_key: K,
}

impl<T, K> ListIndex<T, K>
where
    T: Send + Sync + 'static,
    K: IndexKey,
{
    /// Create an empty index over `invoker`.
    pub fn new(invoker: SharedInvoker<T>, concurrent: bool) -> Self {
        ListIndex {
            invoker,
            buckets: Buckets::new(concurrent),
            null_key: null_key::<K>(),
        }
    }

    /// The canonical key of `item`.
    pub fn key_of(&self, item: &T) -> Result<K> {
        check_null::<K>(&self.invoker.get_value(item))
    }

    /// Items in the bucket of `key`, in insertion order.
    pub fn bucket(&self, key: &K) -> Vec<Arc<T>> {
        self.buckets.get(key)
    }

    /// All bucket keys, including the null sentinel if any item is null.
    pub fn keys(&self) -> Vec<K> {
        self.buckets.keys()
    }

    pub fn null_key(&self) -> &K {
        &self.null_key
    }

    fn is_null(&self, key: &K) -> bool {
        *key == self.null_key
    }
}

impl<T, K> ItemIndex<T> for ListIndex<T, K>
where
    T: Send + Sync + 'static,
    K: IndexKey,
{
    fn property(&self) -> &str {
        self.invoker.name()
    }

    fn value_type(&self) -> ValueType {
        K::VALUE_TYPE
    }

    fn is_concurrent(&self) -> bool {
        matches!(self.buckets, Buckets::Concurrent(_))
    }

    fn add(&self, item: &Arc<T>) -> Result<()> {
        let key = self.key_of(item)?;
        self.buckets.push(key, item.clone());
        Ok(())
    }

    fn add_with_key(&self, item: &Arc<T>, key: &Value) -> Result<()> {
        let key = check_null::<K>(key)?;
        self.buckets.push(key, item.clone());
        Ok(())
    }

    fn remove(&self, item: &Arc<T>) -> Result<bool> {
        let key = self.key_of(item)?;
        Ok(self.remove_keyed(item, &key))
    }

    fn remove_with_key(&self, item: &Arc<T>, key: &Value) -> Result<bool> {
        let key = check_null::<K>(key)?;
        Ok(self.remove_keyed(item, &key))
    }

    fn refresh(&self, items: &[Arc<T>]) -> Result<()> {
        self.buckets.clear();
        for item in items {
            self.add(item)?;
        }
        debug!(
            property = %self.property(),
            items = items.len(),
            buckets = self.buckets.bucket_count(),
            "Index refreshed"
        );
        Ok(())
    }

    fn clear(&self) {
        self.buckets.clear();
    }

    fn select_one(&self, key: &Value) -> Result<Option<Arc<T>>> {
        let key = check_null::<K>(key)?;
        Ok(self.buckets.first(&key))
    }

    fn scan(&self, compare: CompareType, value: &Value) -> Result<Vec<Arc<T>>> {
        let not = compare.is_not();
        let matched = match compare.kind() {
            CompareKind::Equal => {
                let key = check_null::<K>(value)?;
                if !not {
                    return Ok(self.buckets.get(&key));
                }
                self.buckets.collect(|k| *k != key)
            }
            CompareKind::Is => {
                if !not {
                    return Ok(self.buckets.get(&self.null_key));
                }
                self.buckets.collect(|k| !self.is_null(k))
            }
            CompareKind::Greater
            | CompareKind::GreaterOrEqual
            | CompareKind::Less
            | CompareKind::LessOrEqual => {
                let Some(bound) = bound_key::<K>(value)? else {
                    return Ok(Vec::new());
                };
                self.buckets.collect(|k| {
                    !self.is_null(k)
                        && k.compare_key(&bound)
                            .map_or(false, |ordering| compare.accepts(ordering))
                })
            }
            CompareKind::Like => {
                let needle = like_needle(value);
                self.buckets.collect(|k| {
                    !self.is_null(k)
                        && k.to_value().to_text().to_lowercase().contains(&needle) != not
                })
            }
            CompareKind::In => {
                let mut keys = Vec::new();
                for candidate in membership(value) {
                    let key = check_null::<K>(&candidate)?;
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                if !not {
                    return Ok(keys.iter().flat_map(|k| self.buckets.get(k)).collect());
                }
                let excluded: HashSet<K> = keys.into_iter().collect();
                self.buckets.collect(|k| !excluded.contains(k))
            }
            CompareKind::Between => {
                let Value::Range(min, max) = value else {
                    return Err(SieveError::invalid_argument(
                        "between",
                        format!("expected a range, got {}", value.format_literal()),
                    ));
                };
                let (Some(min), Some(max)) = (bound_key::<K>(min)?, bound_key::<K>(max)?) else {
                    return Ok(Vec::new());
                };
                self.buckets.collect(|k| {
                    if self.is_null(k) {
                        return false;
                    }
                    match (k.compare_key(&min), k.compare_key(&max)) {
                        (Some(lo), Some(hi)) => {
                            (lo != Ordering::Less && hi != Ordering::Greater) != not
                        }
                        _ => false,
                    }
                })
            }
        };
        Ok(flatten(matched))
    }

    fn bucket_count(&self) -> usize {
        self.buckets.bucket_count()
    }

    fn len(&self) -> usize {
        self.buckets.item_count()
    }
}

impl<T, K> ListIndex<T, K>
where
    T: Send + Sync + 'static,
    K: IndexKey,
{
    fn remove_keyed(&self, item: &Arc<T>, key: &K) -> bool {
        if self.buckets.remove_from(key, item) {
            return true;
        }
        let found = self.buckets.remove_anywhere(item);
        if found {
            warn!(
                property = %self.property(),
                key = ?key,
                "Stale index key, item removed by full bucket scan"
            );
        }
        found
    }
}

impl<T, K: IndexKey> fmt::Debug for ListIndex<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListIndex")
            .field("property", &self.invoker.name())
            .field("key_type", &K::VALUE_TYPE)
            .field("concurrent", &matches!(self.buckets, Buckets::Concurrent(_)))
            .finish()
    }
}
