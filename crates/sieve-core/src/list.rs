//! A selectable, indexable collection.
//!
//! [`SelectableList`] owns its items as `Arc<T>` handles together with the
//! property invokers, the secondary indexes over them and an optional sort.
//! Every structural change is fanned out to the indexes and bumps a
//! generation counter, which [`ListIter`] uses to detect modification during
//! enumeration.

use crate::compare::{id_set, item_id, CompareType};
use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::index::ItemIndex;
use crate::invoker::{InvokerTable, SharedInvoker};
use crate::parameter::QueryParameter;
use crate::query::{linear_scan, ItemComparer, Query, DEFAULT_PARALLEL_THRESHOLD};
use crate::registry::ListIndexes;
use crate::value::Value;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Runtime settings of a [`SelectableList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSettings {
    /// Back indexes with concurrent maps.
    pub concurrent: bool,
    /// Create an index the first time a property is selected on.
    pub auto_index: bool,
    /// Linear scans over more items than this run in parallel.
    pub parallel_threshold: usize,
}

impl Default for ListSettings {
    fn default() -> Self {
        ListSettings {
            concurrent: false,
            auto_index: true,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl From<&Config> for ListSettings {
    fn from(config: &Config) -> Self {
        ListSettings {
            concurrent: config.index.concurrent,
            auto_index: config.index.auto_index,
            parallel_threshold: config.query.parallel_threshold,
        }
    }
}

/// An ordered collection of shared items with secondary indexes.
///
/// Items are identified by pointer: adding the same `Arc` twice stores it
/// twice, and `remove` takes out the first occurrence.
///
/// ```rust
/// use std::sync::Arc;
/// use sieve_core::{CompareType, FnInvoker, InvokerTable, SelectableList, ValueType};
///
/// struct Book { title: String, year: i64 }
///
/// let invokers = InvokerTable::new()
///     .with(FnInvoker::new("title", ValueType::Text, |b: &Book| b.title.clone()).shared())
///     .with(FnInvoker::new("year", ValueType::Int, |b: &Book| b.year).shared());
/// let books = SelectableList::new(invokers);
/// books.add(Arc::new(Book { title: "Dune".into(), year: 1965 })).unwrap();
/// books.add(Arc::new(Book { title: "Emma".into(), year: 1815 })).unwrap();
///
/// let old = books.select("year", CompareType::LESS, 1900).unwrap();
/// assert_eq!(old[0].title, "Emma");
/// ```
pub struct SelectableList<T> {
    items: RwLock<Vec<Arc<T>>>,
    invokers: InvokerTable<T>,
    indexes: ListIndexes<T>,
    sort: RwLock<Option<ItemComparer<T>>>,
    settings: ListSettings,
    /// Bumped on every structural change.
    generation: AtomicU64,
    /// Bumped on every change, value writes included.
    revision: AtomicU64,
}

impl<T: Send + Sync + 'static> SelectableList<T> {
    pub fn new(invokers: InvokerTable<T>) -> Self {
        Self::with_settings(invokers, ListSettings::default())
    }

    pub fn with_config(invokers: InvokerTable<T>, config: &Config) -> Self {
        Self::with_settings(invokers, ListSettings::from(config))
    }

    pub fn with_settings(invokers: InvokerTable<T>, settings: ListSettings) -> Self {
        SelectableList {
            items: RwLock::new(Vec::new()),
            invokers,
            indexes: ListIndexes::new(settings.concurrent),
            sort: RwLock::new(None),
            settings,
            generation: AtomicU64::new(0),
            revision: AtomicU64::new(0),
        }
    }

    pub fn invokers(&self) -> &InvokerTable<T> {
        &self.invokers
    }

    pub fn indexes(&self) -> &ListIndexes<T> {
        &self.indexes
    }

    pub fn settings(&self) -> ListSettings {
        self.settings
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Structural modification counter.
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    /// Counter of any modification, including value writes.
    pub fn revision(&self) -> u64 {
        self.revision.load(AtomicOrdering::Acquire)
    }

    fn bump_structure(&self) {
        self.generation.fetch_add(1, AtomicOrdering::Release);
        self.revision.fetch_add(1, AtomicOrdering::Release);
    }

    /// Insert position for `item`: the end, or after its equals when sorted.
    fn insert_position(&self, items: &[Arc<T>], item: &Arc<T>) -> usize {
        match self.sort.read().as_ref() {
            Some(comparer) => items.partition_point(|x| comparer(x, item) != Ordering::Greater),
            None => items.len(),
        }
    }

    /// Add an item and index it. Returns its position.
    ///
    /// If indexing fails the item is not added.
    pub fn add(&self, item: Arc<T>) -> Result<usize> {
        let mut items = self.items.write();
        if let Err(err) = self.indexes.add_item(&item) {
            self.indexes.remove_item(&item).ok();
            return Err(err);
        }
        let position = self.insert_position(&items, &item);
        items.insert(position, item);
        drop(items);

        self.bump_structure();
        Ok(position)
    }

    /// Add many items.
    #[instrument(skip_all)]
    pub fn extend<I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Arc<T>>,
    {
        let mut added = 0;
        for item in items {
            self.add(item)?;
            added += 1;
        }
        info!(added, total = self.len(), "Items added");
        Ok(added)
    }

    /// Remove the first occurrence of `item`. Returns false if absent.
    pub fn remove(&self, item: &Arc<T>) -> Result<bool> {
        let mut items = self.items.write();
        let Some(position) = items.iter().position(|x| Arc::ptr_eq(x, item)) else {
            return Ok(false);
        };
        let removed = items.remove(position);
        drop(items);

        self.bump_structure();
        self.indexes.remove_item(&removed)?;
        Ok(true)
    }

    /// Remove the item at `position`.
    pub fn remove_at(&self, position: usize) -> Result<Option<Arc<T>>> {
        let mut items = self.items.write();
        if position >= items.len() {
            return Ok(None);
        }
        let removed = items.remove(position);
        drop(items);

        self.bump_structure();
        self.indexes.remove_item(&removed)?;
        Ok(Some(removed))
    }

    /// Remove every item. Indexes stay registered but empty.
    pub fn clear(&self) {
        let mut items = self.items.write();
        items.clear();
        self.indexes.clear_items();
        drop(items);
        self.bump_structure();
    }

    pub fn get(&self, position: usize) -> Option<Arc<T>> {
        self.items.read().get(position).cloned()
    }

    pub fn contains(&self, item: &Arc<T>) -> bool {
        self.items.read().iter().any(|x| Arc::ptr_eq(x, item))
    }

    /// Copy of the current item handles.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.items.read().clone()
    }

    /// Enumerate the live collection. See [`ListIter`].
    pub fn iter(&self) -> ListIter<'_, T> {
        ListIter {
            list: self,
            position: 0,
            expected: self.generation(),
            done: false,
        }
    }

    /// Write a property value through its invoker and re-index the item.
    pub fn set_value(&self, item: &Arc<T>, property: &str, value: impl Into<Value>) -> Result<()> {
        if !self.contains(item) {
            return Err(SieveError::invalid_argument(
                "set_value",
                "item is not in the list",
            ));
        }
        let invoker = self.invokers.require(property)?;
        let old = invoker.get_value(item);
        invoker.set_value(item, value.into())?;

        if let Some(index) = self.indexes.get_index(property) {
            index.remove_with_key(item, &old)?;
            index.add(item)?;
        }
        self.resort();
        self.revision.fetch_add(1, AtomicOrdering::Release);
        Ok(())
    }

    /// Tell the list an item's value changed outside [`set_value`](Self::set_value).
    ///
    /// With `property` only that index is refreshed, otherwise all of them.
    pub fn notify_changed(&self, item: &Arc<T>, property: Option<&str>) -> Result<()> {
        self.indexes.refresh_item(item, property)?;
        self.resort();
        self.revision.fetch_add(1, AtomicOrdering::Release);
        Ok(())
    }

    /// Index `property`, or return the existing index.
    pub fn create_index(&self, property: &str) -> Result<Arc<dyn ItemIndex<T>>> {
        let invoker = self.invokers.require(property)?.clone();
        self.index_for(invoker)
    }

    fn index_for(&self, invoker: SharedInvoker<T>) -> Result<Arc<dyn ItemIndex<T>>> {
        if let Some(index) = self.indexes.get_index(invoker.name()) {
            return Ok(index);
        }
        // Hold the item lock so no add slips between snapshot and registration.
        let items = self.items.read();
        self.indexes.add(invoker, &items)
    }

    pub fn get_index(&self, property: &str) -> Option<Arc<dyn ItemIndex<T>>> {
        self.indexes.get_index(property)
    }

    /// The index to use for `invoker`, creating one if auto-indexing is on.
    fn lookup_index(&self, invoker: &SharedInvoker<T>) -> Result<Option<Arc<dyn ItemIndex<T>>>> {
        if let Some(index) = self.indexes.get_index(invoker.name()) {
            return Ok(Some(index));
        }
        if self.settings.auto_index {
            debug!(property = %invoker.name(), "Auto-indexing property");
            return self.index_for(invoker.clone()).map(Some);
        }
        Ok(None)
    }

    /// Items whose `property` satisfies `compare` against `value`, in list
    /// order.
    pub fn select(
        &self,
        property: &str,
        compare: CompareType,
        value: impl Into<Value>,
    ) -> Result<Vec<Arc<T>>> {
        let invoker = self.invokers.require(property)?.clone();
        let parameter = QueryParameter::new(invoker, compare, value)?;
        let index = self.lookup_index(parameter.invoker())?;
        let snapshot = self.snapshot();

        match index {
            Some(index) => {
                let ids = id_set(&index.scan_parameter(&parameter)?);
                Ok(snapshot
                    .into_iter()
                    .filter(|item| ids.contains(&item_id(item)))
                    .collect())
            }
            None => Ok(linear_scan(
                &snapshot,
                self.settings.parallel_threshold,
                |item| parameter.check(item),
            )),
        }
    }

    /// First item whose `property` equals `value`.
    pub fn select_one(&self, property: &str, value: impl Into<Value>) -> Result<Option<Arc<T>>> {
        let invoker = self.invokers.require(property)?.clone();
        let parameter = QueryParameter::new(invoker, CompareType::EQUAL, value)?;
        match self.lookup_index(parameter.invoker())? {
            Some(index) => index.select_one(parameter.typed_value()),
            None => Ok(self
                .items
                .read()
                .iter()
                .find(|item| parameter.check(item))
                .cloned()),
        }
    }

    /// Evaluate `query` against the list, using and (when auto-indexing)
    /// creating indexes for its properties.
    pub fn select_query(&self, query: &Query<T>) -> Result<Vec<Arc<T>>> {
        if self.settings.auto_index {
            for parameter in query.parameters().iter().filter(|p| p.is_active()) {
                self.index_for(parameter.invoker().clone())?;
            }
        }
        let snapshot = self.snapshot();
        query.select_with(&snapshot, Some(&self.indexes), self.settings.parallel_threshold)
    }

    /// Keep the list sorted by `comparer`, including future additions.
    pub fn apply_sort(&self, comparer: ItemComparer<T>) {
        *self.sort.write() = Some(comparer);
        self.resort();
    }

    /// Sort by the query's orders, or remove the sort if it has none.
    pub fn apply_query_sort(&self, query: &Query<T>) {
        match query.comparer() {
            Some(comparer) => self.apply_sort(comparer),
            None => self.remove_sort(),
        }
    }

    /// Stop keeping the list sorted. The current order is kept.
    pub fn remove_sort(&self) {
        *self.sort.write() = None;
    }

    pub fn is_sorted(&self) -> bool {
        self.sort.read().is_some()
    }

    fn resort(&self) {
        let Some(comparer) = self.sort.read().clone() else {
            return;
        };
        self.items.write().sort_by(|a, b| comparer(a, b));
        self.bump_structure();
    }
}

impl<T> fmt::Debug for SelectableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectableList")
            .field("len", &self.items.read().len())
            .field("indexes", &self.indexes)
            .field("sorted", &self.sort.read().is_some())
            .field("generation", &self.generation.load(AtomicOrdering::Acquire))
            .finish()
    }
}

impl<'a, T: Send + Sync + 'static> IntoIterator for &'a SelectableList<T> {
    type Item = Result<Arc<T>>;
    type IntoIter = ListIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Enumerator over a live [`SelectableList`].
///
/// Walks the list by position, taking the read lock per step. If the list is
/// structurally modified while iterating, the iterator logs a warning,
/// yields one [`SieveError::ConcurrentModification`] and ends.
pub struct ListIter<'a, T> {
    list: &'a SelectableList<T>,
    position: usize,
    expected: u64,
    done: bool,
}

impl<'a, T: Send + Sync + 'static> Iterator for ListIter<'a, T> {
    type Item = Result<Arc<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let found = self.list.generation();
        if found != self.expected {
            warn!(
                expected = self.expected,
                found,
                position = self.position,
                "Collection modified during enumeration, stopping"
            );
            self.done = true;
            return Some(Err(SieveError::ConcurrentModification {
                expected: self.expected,
                found,
            }));
        }

        match self.list.get(self.position) {
            Some(item) => {
                self.position += 1;
                Some(Ok(item))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
