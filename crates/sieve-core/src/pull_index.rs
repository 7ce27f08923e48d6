//! Secondary index over a [`Pull`] column.
//!
//! Items know their row position in the column ([`PullItem`]); the index reads
//! each item's key from the column and keeps every bucket sorted by an item
//! comparer, so scans return items in a deterministic order within a key.
//!
//! Unlike [`ListIndex`](crate::index::ListIndex), every mutation holds one
//! exclusive lock over the bucket map for the whole lookup, binary search and
//! insert or removal.
//!
//! [`PullIndex::select`] treats `Like` as an anchored pattern (`%` any run,
//! `_` one character). When the index answers a query parameter it uses the
//! substring match every other evaluation path uses.
//!
//! `Between` returns the inclusive range `min <= key <= max`, the same set a
//! `ListIndex` or a linear test returns. Buckets come back in key order.

use crate::compare::{like_needle, membership, CompareKind, CompareType};
use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::index::{bound_key, flatten, ItemIndex};
use crate::key::{check_null, normalize, IndexKey};
use crate::nulls::null_key;
use crate::parameter::QueryParameter;
use crate::pull::Pull;
use crate::query::ItemComparer;
use crate::value::{Value, ValueType};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// An item stored at a fixed row of a column.
pub trait PullItem: Send + Sync {
    fn pull_index(&self) -> u32;
}

/// Sorted hash index over the values of one [`Pull`] column.
pub struct PullIndex<T, K: IndexKey> {
    name: String,
    column: Arc<RwLock<Pull<K>>>,
    buckets: Mutex<HashMap<K, Vec<Arc<T>>>>,
    comparer: ItemComparer<T>,
    null_key: K,
}

impl<T, K> PullIndex<T, K>
where
    T: PullItem + 'static,
    K: IndexKey + Default,
{
    /// Create an index whose buckets are ordered by row position.
    pub fn new(name: impl Into<String>, column: Arc<RwLock<Pull<K>>>) -> Self {
        Self::with_comparer(
            name,
            column,
            Arc::new(|a: &T, b: &T| a.pull_index().cmp(&b.pull_index())),
        )
    }

    /// Create an index whose buckets are ordered by `comparer`.
    pub fn with_comparer(
        name: impl Into<String>,
        column: Arc<RwLock<Pull<K>>>,
        comparer: ItemComparer<T>,
    ) -> Self {
        PullIndex {
            name: name.into(),
            column,
            buckets: Mutex::new(HashMap::new()),
            comparer,
            null_key: null_key::<K>(),
        }
    }

    /// Create an index over a new, empty column sized by `[pull] block_size`.
    pub fn from_config(name: impl Into<String>, config: &Config) -> Result<Self> {
        let column = Pull::from_config(config)?;
        Ok(Self::new(name, Arc::new(RwLock::new(column))))
    }

    pub fn column(&self) -> &Arc<RwLock<Pull<K>>> {
        &self.column
    }

    /// The canonical key of `item`, read from its column row.
    pub fn key_of(&self, item: &T) -> K {
        normalize(self.column.read().get(item.pull_index()))
    }

    /// Items under `key`, in comparer order.
    pub fn bucket(&self, key: &K) -> Vec<Arc<T>> {
        self.buckets.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<K> {
        self.buckets.lock().keys().cloned().collect()
    }

    /// Items whose key satisfies `compare` against `value`.
    pub fn select(&self, compare: CompareType, value: &Value) -> Result<Vec<Arc<T>>> {
        self.scan(compare, value)
    }

    fn insert(&self, key: K, item: &Arc<T>) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        let pos = bucket.partition_point(|x| (self.comparer)(x, item) != Ordering::Greater);
        bucket.insert(pos, item.clone());
    }

    fn remove_keyed(&self, item: &Arc<T>, key: &K) -> bool {
        let mut buckets = self.buckets.lock();
        if remove_from(&mut buckets, key, item) {
            return true;
        }

        let holder = buckets
            .iter()
            .find(|(_, bucket)| bucket.iter().any(|x| Arc::ptr_eq(x, item)))
            .map(|(k, _)| k.clone());
        match holder {
            Some(stale) => {
                warn!(
                    property = %self.name,
                    key = ?key,
                    found = ?stale,
                    "Stale column key, item removed by full bucket scan"
                );
                remove_from(&mut buckets, &stale, item)
            }
            None => false,
        }
    }

    /// Snapshot of the buckets whose key passes `filter`.
    fn collect<F>(&self, filter: F) -> Vec<(K, Vec<Arc<T>>)>
    where
        F: Fn(&K) -> bool,
    {
        self.buckets
            .lock()
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(key, bucket)| (key.clone(), bucket.clone()))
            .collect()
    }

    fn is_null(&self, key: &K) -> bool {
        *key == self.null_key
    }
}

fn remove_from<K: IndexKey, T>(buckets: &mut HashMap<K, Vec<Arc<T>>>, key: &K, item: &Arc<T>) -> bool {
    let Some(bucket) = buckets.get_mut(key) else {
        return false;
    };
    let Some(pos) = bucket.iter().position(|x| Arc::ptr_eq(x, item)) else {
        return false;
    };
    bucket.remove(pos);
    if bucket.is_empty() {
        buckets.remove(key);
    }
    true
}

/// Compile a `like` pattern: `%` is any run, `_` any one character.
pub fn like_regex(pattern: &str) -> Result<Regex> {
    let mut regex_pattern = String::with_capacity(pattern.len() * 2 + 8);
    regex_pattern.push_str("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            c => regex_pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    regex_pattern.push('$');

    Regex::new(&regex_pattern).map_err(|e| SieveError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl<T, K> ItemIndex<T> for PullIndex<T, K>
where
    T: PullItem + 'static,
    K: IndexKey + Default,
{
    fn property(&self) -> &str {
        &self.name
    }

    fn value_type(&self) -> ValueType {
        K::VALUE_TYPE
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn add(&self, item: &Arc<T>) -> Result<()> {
        let key = self.key_of(item);
        self.insert(key, item);
        Ok(())
    }

    fn add_with_key(&self, item: &Arc<T>, key: &Value) -> Result<()> {
        let key = check_null::<K>(key)?;
        self.insert(key, item);
        Ok(())
    }

    fn remove(&self, item: &Arc<T>) -> Result<bool> {
        let key = self.key_of(item);
        Ok(self.remove_keyed(item, &key))
    }

    fn remove_with_key(&self, item: &Arc<T>, key: &Value) -> Result<bool> {
        let key = check_null::<K>(key)?;
        Ok(self.remove_keyed(item, &key))
    }

    #[instrument(skip_all, fields(property = %self.name, items = items.len()))]
    fn refresh(&self, items: &[Arc<T>]) -> Result<()> {
        // Read every key first so the column lock is never held with the bucket lock.
        let keyed: Vec<(K, &Arc<T>)> = {
            let column = self.column.read();
            items
                .iter()
                .map(|item| (normalize(column.get(item.pull_index())), item))
                .collect()
        };

        let mut buckets = self.buckets.lock();
        buckets.clear();
        for (key, item) in keyed {
            buckets.entry(key).or_default().push(item.clone());
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| (self.comparer)(a, b));
        }
        debug!(buckets = buckets.len(), "Column index refreshed");
        Ok(())
    }

    fn clear(&self) {
        self.buckets.lock().clear();
    }

    fn select_one(&self, key: &Value) -> Result<Option<Arc<T>>> {
        let key = check_null::<K>(key)?;
        Ok(self
            .buckets
            .lock()
            .get(&key)
            .and_then(|bucket| bucket.first().cloned()))
    }

    fn scan(&self, compare: CompareType, value: &Value) -> Result<Vec<Arc<T>>> {
        let not = compare.is_not();
        let matched = match compare.kind() {
            CompareKind::Equal => {
                let key = check_null::<K>(value)?;
                if !not {
                    return Ok(self.bucket(&key));
                }
                self.collect(|k| *k != key)
            }
            CompareKind::Is => {
                if !not {
                    return Ok(self.bucket(&self.null_key));
                }
                self.collect(|k| !self.is_null(k))
            }
            CompareKind::Greater
            | CompareKind::GreaterOrEqual
            | CompareKind::Less
            | CompareKind::LessOrEqual => {
                let Some(bound) = bound_key::<K>(value)? else {
                    return Ok(Vec::new());
                };
                self.collect(|k| {
                    !self.is_null(k)
                        && k.compare_key(&bound)
                            .map_or(false, |ordering| compare.accepts(ordering))
                })
            }
            CompareKind::Like => {
                let regex = like_regex(&value.to_text())?;
                self.collect(|k| !self.is_null(k) && regex.is_match(&k.to_value().to_text()) != not)
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
                    let buckets = self.buckets.lock();
                    return Ok(keys
                        .iter()
                        .filter_map(|k| buckets.get(k))
                        .flat_map(|bucket| bucket.iter().cloned())
                        .collect());
                }
                let excluded: HashSet<K> = keys.into_iter().collect();
                self.collect(|k| !excluded.contains(k))
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
                self.collect(|k| {
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

    /// Query evaluation matches `Like` by substring, as the linear test does.
    fn scan_parameter(&self, parameter: &QueryParameter<T>) -> Result<Vec<Arc<T>>> {
        let compare = parameter.compare();
        if compare.kind() != CompareKind::Like {
            return self.scan(compare, parameter.typed_value());
        }
        let needle = like_needle(parameter.typed_value());
        let not = compare.is_not();
        Ok(flatten(self.collect(|k| {
            !self.is_null(k) && k.to_value().to_text().to_lowercase().contains(&needle) != not
        })))
    }

    fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    fn len(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }
}

impl<T, K: IndexKey> fmt::Debug for PullIndex<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullIndex")
            .field("property", &self.name)
            .field("key_type", &K::VALUE_TYPE)
            .field("buckets", &self.buckets.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Row {
        row: u32,
        label: &'static str,
    }

    impl PullItem for Row {
        fn pull_index(&self) -> u32 {
            self.row
        }
    }

    fn rows(labels: &[&'static str]) -> Vec<Arc<Row>> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| Arc::new(Row { row: i as u32, label }))
            .collect()
    }

    fn labels(items: &[Arc<Row>]) -> Vec<&'static str> {
        items.iter().map(|r| r.label).collect()
    }

    fn int_column(values: &[i64]) -> Arc<RwLock<Pull<i64>>> {
        let mut pull = Pull::with_block_size(4).unwrap();
        for (i, v) in values.iter().enumerate() {
            pull.set(i as u32, *v);
        }
        Arc::new(RwLock::new(pull))
    }

    fn text_column(values: &[&str]) -> Arc<RwLock<Pull<String>>> {
        let mut pull = Pull::with_block_size(4).unwrap();
        for (i, v) in values.iter().enumerate() {
            pull.set(i as u32, v.to_string());
        }
        Arc::new(RwLock::new(pull))
    }

    #[test]
    fn test_buckets_follow_comparer() {
        let items = rows(&["d", "b", "a", "c"]);
        let column = int_column(&[7, 7, 7, 7]);
        let by_label: ItemComparer<Row> = Arc::new(|a: &Row, b: &Row| a.label.cmp(b.label));
        let index = PullIndex::with_comparer("n", column, by_label);

        for item in [&items[2], &items[0], &items[3], &items[1]] {
            index.add(item).unwrap();
        }
        assert_eq!(labels(&index.bucket(&7)), vec!["a", "b", "c", "d"]);

        index.remove(&items[1]).unwrap();
        assert_eq!(labels(&index.bucket(&7)), vec!["a", "c", "d"]);

        index.refresh(&items).unwrap();
        assert_eq!(labels(&index.bucket(&7)), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_default_values_are_null() {
        let items = rows(&["a", "b", "c"]);
        let index = PullIndex::new("n", int_column(&[0, 5]));
        index.refresh(&items).unwrap();

        // row 2 was never written
        let nulls = index.scan(CompareType::IS, &Value::Null).unwrap();
        assert_eq!(labels(&nulls), vec!["a", "c"]);
        let zero = index.scan(CompareType::EQUAL, &Value::Int(0)).unwrap();
        assert_eq!(labels(&zero), vec!["a", "c"]);
    }

    #[test]
    fn test_ranges_and_between() {
        let items = rows(&["a", "b", "c", "d", "e"]);
        let index = PullIndex::new("n", int_column(&[10, 20, 30, 40, 0]));
        index.refresh(&items).unwrap();

        let found = index.scan(CompareType::GREATER, &Value::Int(20)).unwrap();
        assert_eq!(labels(&found), vec!["c", "d"]);

        let found = index.select(CompareType::BETWEEN, &Value::range(20, 30)).unwrap();
        assert_eq!(labels(&found), vec!["b", "c"]);

        let found = index
            .select(CompareType::NOT_BETWEEN, &Value::range(20, 30))
            .unwrap();
        assert_eq!(labels(&found), vec!["a", "d"]);

        let err = index.select(CompareType::BETWEEN, &Value::Int(20)).unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_like_is_anchored_regex() {
        let items = rows(&["a", "b", "c", "d"]);
        let index = PullIndex::new("name", text_column(&["John", "Joan", "Jo", ""]));
        index.refresh(&items).unwrap();

        let found = index.scan(CompareType::LIKE, &Value::from("jo%n")).unwrap();
        let mut found = labels(&found);
        found.sort();
        assert_eq!(found, vec!["a", "b"]);

        let found = index.scan(CompareType::LIKE, &Value::from("J_")).unwrap();
        assert_eq!(labels(&found), vec!["c"]);

        let found = index.scan(CompareType::NOT_LIKE, &Value::from("%n")).unwrap();
        assert_eq!(labels(&found), vec!["c"]);

        // regex metacharacters are literal
        assert!(index
            .scan(CompareType::LIKE, &Value::from("J.*"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_in_and_not_in() {
        let items = rows(&["a", "b", "c", "d", "e"]);
        let index = PullIndex::new("n", int_column(&[1, 2, 3, 2, 1]));
        index.refresh(&items).unwrap();

        let found = index.scan(CompareType::IN, &Value::list([2, 3])).unwrap();
        assert_eq!(labels(&found), vec!["b", "d", "c"]);

        let found = index.scan(CompareType::NOT_IN, &Value::list([2, 3])).unwrap();
        assert_eq!(labels(&found), vec!["a", "e"]);
    }

    #[test]
    fn test_remove_after_column_change() {
        let items = rows(&["a", "b"]);
        let column = int_column(&[1, 2]);
        let index = PullIndex::new("n", column.clone());
        index.refresh(&items).unwrap();

        column.write().set(0, 9);
        assert!(index.remove(&items[0]).unwrap());
        assert!(!index.remove(&items[0]).unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.bucket_count(), 1);
    }

    #[test]
    fn test_query_like_is_substring() {
        use crate::invoker::FnInvoker;

        let items = rows(&["a", "b", "c", "d"]);
        let index = PullIndex::new("name", text_column(&["John", "Joan", "Mike", ""]));
        index.refresh(&items).unwrap();
        let name = FnInvoker::new("name", ValueType::Text, |r: &Row| r.label).shared();

        let like = QueryParameter::new(name.clone(), CompareType::LIKE, "Jo").unwrap();
        let mut found = labels(&index.scan_parameter(&like).unwrap());
        found.sort();
        assert_eq!(found, vec!["a", "b"]);
        // the anchored form finds nothing for the same text
        assert!(index.select(CompareType::LIKE, &Value::from("Jo")).unwrap().is_empty());

        let not_like = QueryParameter::new(name.clone(), CompareType::NOT_LIKE, "%oh%").unwrap();
        let mut found = labels(&index.scan_parameter(&not_like).unwrap());
        found.sort();
        assert_eq!(found, vec!["b", "c"]);

        let equal = QueryParameter::new(name, CompareType::EQUAL, "Mike").unwrap();
        assert_eq!(labels(&index.scan_parameter(&equal).unwrap()), vec!["c"]);
    }

    #[test]
    fn test_column_from_config() {
        let mut config = Config::default();
        config.pull.block_size = 2;
        let index: PullIndex<Row, i64> = PullIndex::from_config("n", &config).unwrap();
        index.column().write().set(5, 3);
        assert_eq!(index.column().read().block_size(), 2);
        assert_eq!(index.column().read().block_count(), 3);

        index.refresh(&rows(&["a", "b", "c", "d", "e", "f"])).unwrap();
        assert_eq!(labels(&index.bucket(&3)), vec!["f"]);
    }

    #[test]
    fn test_like_regex_escapes() {
        let regex = like_regex("a+b%").unwrap();
        assert!(regex.is_match("A+Bcd"));
        assert!(!regex.is_match("aab"));
    }
}
