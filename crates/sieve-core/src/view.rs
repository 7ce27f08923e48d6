//! Filtered views over a [`SelectableList`].

use crate::error::Result;
use crate::list::SelectableList;
use crate::query::{Query, QueryChange};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

struct Cached<T> {
    revision: u64,
    items: Vec<Arc<T>>,
}

/// The items of a list that match a query, sorted by the query's orders.
///
/// The result is computed lazily and cached until the list or the query
/// changes.
pub struct FilterView<T> {
    source: Arc<SelectableList<T>>,
    query: RwLock<Query<T>>,
    query_dirty: Arc<AtomicBool>,
    cache: Mutex<Option<Cached<T>>>,
}

impl<T: Send + Sync + 'static> FilterView<T> {
    pub fn new(source: Arc<SelectableList<T>>, mut query: Query<T>) -> Self {
        let query_dirty = Arc::new(AtomicBool::new(true));
        let flag = query_dirty.clone();
        query.subscribe(move |_: &QueryChange| flag.store(true, Ordering::Release));
        FilterView {
            source,
            query: RwLock::new(query),
            query_dirty,
            cache: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<SelectableList<T>> {
        &self.source
    }

    /// Copy of the current query, without its listeners.
    pub fn query(&self) -> Query<T> {
        self.query.read().clone()
    }

    /// Edit the query. The view is re-evaluated on next access.
    pub fn edit_query<R>(&self, edit: impl FnOnce(&mut Query<T>) -> R) -> R {
        let result = edit(&mut self.query.write());
        // Order edits do not notify listeners.
        self.query_dirty.store(true, Ordering::Release);
        result
    }

    /// Whether the next access re-evaluates the query.
    pub fn is_stale(&self) -> bool {
        if self.query_dirty.load(Ordering::Acquire) {
            return true;
        }
        match self.cache.lock().as_ref() {
            Some(cached) => cached.revision != self.source.revision(),
            None => true,
        }
    }

    /// Matching items, re-evaluated if stale.
    pub fn items(&self) -> Result<Vec<Arc<T>>> {
        let mut cache = self.cache.lock();
        let revision = self.source.revision();
        let dirty = self.query_dirty.swap(false, Ordering::AcqRel);

        if let Some(cached) = cache.as_ref() {
            if !dirty && cached.revision == revision {
                return Ok(cached.items.clone());
            }
        }

        trace!(revision, "Re-evaluating filter view");
        let items = match self.source.select_query(&self.query.read()) {
            Ok(items) => items,
            Err(err) => {
                self.query_dirty.store(true, Ordering::Release);
                return Err(err);
            }
        };
        *cache = Some(Cached {
            revision,
            items: items.clone(),
        });
        Ok(items)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop the cached result.
    pub fn invalidate(&self) {
        self.query_dirty.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for FilterView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterView")
            .field("query", &*self.query.read())
            .field("cached", &self.cache.lock().as_ref().map(|c| c.items.len()))
            .finish()
    }
}
