//! The set of secondary indexes owned by one collection.

use crate::error::Result;
use crate::index::{for_invoker, ItemIndex};
use crate::invoker::SharedInvoker;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Secondary indexes keyed by property name.
///
/// The owning collection calls [`add_item`](Self::add_item) and
/// [`remove_item`](Self::remove_item) on every structural change so that
/// indexes never drift from collection membership.
///
/// ```rust
/// use std::sync::Arc;
/// use sieve_core::{CompareType, FnInvoker, ListIndexes, Value, ValueType};
///
/// struct Item { size: i64 }
///
/// let items = vec![Arc::new(Item { size: 1 }), Arc::new(Item { size: 2 })];
/// let indexes = ListIndexes::new(false);
/// let size = FnInvoker::new("size", ValueType::Int, |i: &Item| i.size).shared();
/// indexes.add(size, &items).unwrap();
///
/// let index = indexes.get_index("size").unwrap();
/// let found = index.scan(CompareType::EQUAL, &Value::Int(2)).unwrap();
/// assert!(Arc::ptr_eq(&found[0], &items[1]));
/// ```
pub struct ListIndexes<T> {
    indexes: RwLock<HashMap<String, Arc<dyn ItemIndex<T>>>>,
    concurrent: bool,
}

impl<T: Send + Sync + 'static> Default for ListIndexes<T> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<T: Send + Sync + 'static> ListIndexes<T> {
    /// Create an empty registry. `concurrent` selects the bucket backing of
    /// every index it creates.
    pub fn new(concurrent: bool) -> Self {
        ListIndexes {
            indexes: RwLock::new(HashMap::new()),
            concurrent,
        }
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Index the invoker's property over `source`.
    ///
    /// Idempotent: if an index for the property exists it is returned as is.
    #[instrument(skip(self, invoker, source), fields(property = %invoker.name()))]
    pub fn add(&self, invoker: SharedInvoker<T>, source: &[Arc<T>]) -> Result<Arc<dyn ItemIndex<T>>> {
        if let Some(existing) = self.get_index(invoker.name()) {
            return Ok(existing);
        }

        let mut indexes = self.indexes.write();
        // Another writer may have won the race between the read and write lock.
        if let Some(existing) = indexes.get(invoker.name()) {
            return Ok(existing.clone());
        }

        let name = invoker.name().to_string();
        let index = for_invoker(invoker, self.concurrent);
        index.refresh(source)?;
        debug!(
            property = %name,
            items = index.len(),
            buckets = index.bucket_count(),
            "Created index"
        );
        indexes.insert(name, index.clone());
        Ok(index)
    }

    /// Register an index built elsewhere, replacing any on the same property.
    pub fn insert(&self, index: Arc<dyn ItemIndex<T>>) {
        self.indexes
            .write()
            .insert(index.property().to_string(), index);
    }

    /// Index a newly added item in every index.
    pub fn add_item(&self, item: &Arc<T>) -> Result<()> {
        for index in self.indexes.read().values() {
            index.add(item)?;
        }
        Ok(())
    }

    /// Remove an item from every index.
    pub fn remove_item(&self, item: &Arc<T>) -> Result<()> {
        for index in self.indexes.read().values() {
            index.remove(item)?;
        }
        Ok(())
    }

    /// Re-index an item whose value changed: only the named property's index,
    /// or every index when `property` is `None`.
    pub fn refresh_item(&self, item: &Arc<T>, property: Option<&str>) -> Result<()> {
        let indexes = self.indexes.read();
        match property {
            Some(name) => {
                if let Some(index) = indexes.get(name) {
                    index.refresh_item(item)?;
                }
            }
            None => {
                for index in indexes.values() {
                    index.refresh_item(item)?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild every index from `source`.
    #[instrument(skip_all)]
    pub fn refresh(&self, source: &[Arc<T>]) -> Result<()> {
        for index in self.indexes.read().values() {
            index.refresh(source)?;
        }
        Ok(())
    }

    /// Empty every index, keeping the indexes registered.
    pub fn clear_items(&self) {
        for index in self.indexes.read().values() {
            index.clear();
        }
    }

    /// The index on `property`, if any.
    pub fn get_index(&self, property: &str) -> Option<Arc<dyn ItemIndex<T>>> {
        self.indexes.read().get(property).cloned()
    }

    pub fn contains(&self, property: &str) -> bool {
        self.indexes.read().contains_key(property)
    }

    pub fn remove_index(&self, property: &str) -> Option<Arc<dyn ItemIndex<T>>> {
        let removed = self.indexes.write().remove(property);
        if removed.is_some() {
            debug!(property = %property, "Dropped index");
        }
        removed
    }

    /// Drop every index.
    pub fn clear(&self) {
        self.indexes.write().clear();
    }

    /// Indexed property names, sorted.
    pub fn properties(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

impl<T> fmt::Debug for ListIndexes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut properties: Vec<String> = self.indexes.read().keys().cloned().collect();
        properties.sort();
        f.debug_struct("ListIndexes")
            .field("properties", &properties)
            .field("concurrent", &self.concurrent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::CompareType;
    use crate::invoker::FnInvoker;
    use crate::value::{Value, ValueType};
    use parking_lot::Mutex;
    use std::thread;

    struct Item {
        id: i64,
        color: Mutex<String>,
    }

    fn item(id: i64, color: &str) -> Arc<Item> {
        Arc::new(Item {
            id,
            color: Mutex::new(color.to_string()),
        })
    }

    fn id_invoker() -> SharedInvoker<Item> {
        FnInvoker::new("id", ValueType::Int, |i: &Item| i.id).shared()
    }

    fn color_invoker() -> SharedInvoker<Item> {
        FnInvoker::new("color", ValueType::Text, |i: &Item| i.color.lock().clone()).shared()
    }

    #[test]
    fn test_add_is_idempotent() {
        let items = vec![item(1, "red"), item(2, "blue")];
        let indexes = ListIndexes::new(false);
        let first = indexes.add(color_invoker(), &items).unwrap();
        let second = indexes.add(color_invoker(), &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(indexes.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_fan_out() {
        let indexes = ListIndexes::new(false);
        indexes.add(id_invoker(), &[]).unwrap();
        indexes.add(color_invoker(), &[]).unwrap();
        assert_eq!(indexes.properties(), vec!["color", "id"]);

        let a = item(1, "red");
        let b = item(2, "red");
        indexes.add_item(&a).unwrap();
        indexes.add_item(&b).unwrap();

        let color = indexes.get_index("color").unwrap();
        assert_eq!(
            color.scan(CompareType::EQUAL, &Value::from("red")).unwrap().len(),
            2
        );

        indexes.remove_item(&a).unwrap();
        assert_eq!(indexes.get_index("id").unwrap().len(), 1);
        assert_eq!(color.len(), 1);
    }

    #[test]
    fn test_refresh_single_property() {
        let a = item(1, "red");
        let indexes = ListIndexes::new(false);
        indexes.add(color_invoker(), &[a.clone()]).unwrap();

        *a.color.lock() = "green".to_string();
        indexes.refresh_item(&a, Some("color")).unwrap();
        let color = indexes.get_index("color").unwrap();
        assert!(color
            .scan(CompareType::EQUAL, &Value::from("red"))
            .unwrap()
            .is_empty());
        assert_eq!(
            color.scan(CompareType::EQUAL, &Value::from("green")).unwrap().len(),
            1
        );
        // unknown property is ignored
        indexes.refresh_item(&a, Some("size")).unwrap();
    }

    #[test]
    fn test_remove_and_clear() {
        let indexes = ListIndexes::<Item>::new(false);
        indexes.add(id_invoker(), &[]).unwrap();
        assert!(indexes.remove_index("id").is_some());
        assert!(indexes.remove_index("id").is_none());
        assert!(indexes.get_index("id").is_none());

        indexes.add(id_invoker(), &[]).unwrap();
        indexes.clear();
        assert!(indexes.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_are_not_lost() {
        let indexes = Arc::new(ListIndexes::new(true));
        indexes.add(id_invoker(), &[]).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|thread_no| {
                let indexes = indexes.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let id = i * 2 + thread_no + 1;
                        indexes.add_item(&item(id, "red")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let index = indexes.get_index("id").unwrap();
        assert!(index.is_concurrent());
        assert_eq!(index.bucket_count(), 1000);
        assert_eq!(index.len(), 1000);
    }
}
