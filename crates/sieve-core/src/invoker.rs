//! Property invokers.
//!
//! An invoker is the only way the engine touches an entity: it reads and writes
//! one named property and reports the property's declared type. Indexes,
//! queries and sorts are all expressed in terms of invokers, which keeps the
//! engine independent of the entity type.
//!
//! Invokers are built once per (entity type, property) pair and shared through
//! an [`InvokerTable`].

use crate::error::{Result, SieveError};
use crate::value::{Value, ValueType};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read/write access to one named property of `T`.
pub trait Invoker<T>: Send + Sync {
    /// Property name, unique within the entity type.
    fn name(&self) -> &str;

    fn value_type(&self) -> ValueType;

    fn can_write(&self) -> bool {
        false
    }

    fn get_value(&self, item: &T) -> Value;

    /// Write a value. Read-only invokers reject every write.
    fn set_value(&self, _item: &T, _value: Value) -> Result<()> {
        Err(SieveError::ReadOnlyProperty {
            property: self.name().to_string(),
        })
    }

    /// Compare two items by this property (nulls first).
    fn compare_items(&self, a: &T, b: &T) -> Ordering {
        self.get_value(a).sort_cmp(&self.get_value(b))
    }
}

/// Shared handle to a type-erased invoker.
pub type SharedInvoker<T> = Arc<dyn Invoker<T>>;

type Getter<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Box<dyn Fn(&T, Value) -> Result<()> + Send + Sync>;

/// Invoker backed by closures.
///
/// ```rust
/// use sieve_core::{FnInvoker, Invoker, Value, ValueType};
///
/// struct Person { age: i64 }
///
/// let age = FnInvoker::new("age", ValueType::Int, |p: &Person| p.age);
/// assert_eq!(age.get_value(&Person { age: 30 }), Value::Int(30));
/// ```
pub struct FnInvoker<T> {
    name: String,
    value_type: ValueType,
    getter: Getter<T>,
    setter: Option<Setter<T>>,
}

impl<T: 'static> FnInvoker<T> {
    /// Create a read-only invoker from a getter.
    pub fn new<V, F>(name: impl Into<String>, value_type: ValueType, getter: F) -> Self
    where
        V: Into<Value>,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        FnInvoker {
            name: name.into(),
            value_type,
            getter: Box::new(move |item: &T| getter(item).into()),
            setter: None,
        }
    }

    /// Add a setter. Values are converted to the declared type before the
    /// setter sees them.
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Box::new(setter));
        self
    }

    /// Wrap in a shared handle.
    pub fn shared(self) -> SharedInvoker<T> {
        Arc::new(self)
    }
}

impl<T> Invoker<T> for FnInvoker<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn can_write(&self) -> bool {
        self.setter.is_some()
    }

    fn get_value(&self, item: &T) -> Value {
        (self.getter)(item)
    }

    fn set_value(&self, item: &T, value: Value) -> Result<()> {
        match &self.setter {
            Some(setter) => setter(item, value.convert(self.value_type)?),
            None => Err(SieveError::ReadOnlyProperty {
                property: self.name.clone(),
            }),
        }
    }
}

impl<T> fmt::Debug for FnInvoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInvoker")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("can_write", &self.setter.is_some())
            .finish()
    }
}

/// The invokers of one entity type, looked up by property name.
pub struct InvokerTable<T> {
    invokers: Vec<SharedInvoker<T>>,
    by_name: HashMap<String, usize>,
}

impl<T> Default for InvokerTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InvokerTable<T> {
    fn clone(&self) -> Self {
        InvokerTable {
            invokers: self.invokers.clone(),
            by_name: self.by_name.clone(),
        }
    }
}

impl<T> InvokerTable<T> {
    pub fn new() -> Self {
        InvokerTable {
            invokers: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, invoker: SharedInvoker<T>) -> Self {
        self.insert(invoker);
        self
    }

    /// Register an invoker, replacing any previous one with the same name.
    pub fn insert(&mut self, invoker: SharedInvoker<T>) -> Option<SharedInvoker<T>> {
        let name = invoker.name().to_string();
        match self.by_name.get(&name) {
            Some(&pos) => Some(std::mem::replace(&mut self.invokers[pos], invoker)),
            None => {
                self.by_name.insert(name, self.invokers.len());
                self.invokers.push(invoker);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SharedInvoker<T>> {
        self.by_name.get(name).map(|&pos| &self.invokers[pos])
    }

    /// Like [`get`](Self::get), but an unknown name is an error.
    pub fn require(&self, name: &str) -> Result<&SharedInvoker<T>> {
        self.get(name)
            .ok_or_else(|| SieveError::unknown_property(name))
    }

    /// Invokers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedInvoker<T>> {
        self.invokers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.invokers.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}
