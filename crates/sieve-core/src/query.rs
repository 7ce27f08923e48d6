//! Composable queries.
//!
//! A [`Query`] is an observable list of [`QueryParameter`]s plus an ordered
//! list of [`SortOrder`]s. It can:
//!
//! - render itself as a SQL-like boolean expression ([`Query::format`])
//! - test a single item ([`Query::check`])
//! - select matching items from a collection ([`Query::select`]), using a
//!   secondary index per parameter when one exists and a linear scan otherwise
//! - sort items by its orders ([`Query::sort`])
//!
//! ## Evaluation
//!
//! Each active parameter yields a result set. Sets are merged left to right
//! with the parameter's connective (`and` = intersection, `or` = union, see
//! [`LogicType::concat`]), so index scans are reused instead of re-filtering
//! the whole collection per predicate. Group markers open and close nested
//! sub-expressions.

use crate::compare::{id_set, item_id, CompareType, LogicType};
use crate::error::{Result, SieveError};
use crate::invoker::SharedInvoker;
use crate::parameter::QueryParameter;
use crate::registry::ListIndexes;
use crate::value::Value;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Above this many items, linear scans run in parallel.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

/// Shared comparison function over items.
pub type ItemComparer<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Sort direction of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Sort by one property.
pub struct SortOrder<T> {
    invoker: SharedInvoker<T>,
    direction: SortDirection,
}

impl<T> Clone for SortOrder<T> {
    fn clone(&self) -> Self {
        SortOrder {
            invoker: self.invoker.clone(),
            direction: self.direction,
        }
    }
}

impl<T> SortOrder<T> {
    pub fn new(invoker: SharedInvoker<T>, direction: SortDirection) -> Self {
        SortOrder { invoker, direction }
    }

    pub fn ascending(invoker: SharedInvoker<T>) -> Self {
        Self::new(invoker, SortDirection::Ascending)
    }

    pub fn descending(invoker: SharedInvoker<T>) -> Self {
        Self::new(invoker, SortDirection::Descending)
    }

    pub fn property(&self) -> &str {
        self.invoker.name()
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        let ordering = self.invoker.compare_items(a, b);
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

impl<T> fmt::Debug for SortOrder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortOrder")
            .field("property", &self.property())
            .field("direction", &self.direction)
            .finish()
    }
}

/// Notification sent to query listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryChange {
    Added(usize),
    Removed(usize),
    Changed(usize),
    /// Anything may have changed; re-read the whole query.
    Reset,
}

type Listener = Arc<dyn Fn(&QueryChange) + Send + Sync>;

/// A list of predicates and sort orders over items of type `T`.
pub struct Query<T> {
    parameters: Vec<QueryParameter<T>>,
    orders: Vec<SortOrder<T>>,
    suspending: bool,
    listeners: Vec<Listener>,
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones parameters and orders; listeners stay with the original.
impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query {
            parameters: self.parameters.clone(),
            orders: self.orders.clone(),
            suspending: false,
            listeners: Vec::new(),
        }
    }
}

impl<T> Query<T> {
    pub fn new() -> Self {
        Query {
            parameters: Vec::new(),
            orders: Vec::new(),
            suspending: false,
            listeners: Vec::new(),
        }
    }

    /// Register a change listener.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&QueryChange) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn is_suspending(&self) -> bool {
        self.suspending
    }

    /// Batch edits: no notifications while suspended, one `Reset` on resume.
    pub fn set_suspending(&mut self, suspending: bool) {
        let resumed = self.suspending && !suspending;
        self.suspending = suspending;
        if resumed {
            self.notify(QueryChange::Reset);
        }
    }

    fn notify(&self, change: QueryChange) {
        if self.suspending {
            return;
        }
        for listener in &self.listeners {
            listener(&change);
        }
    }

    pub fn parameters(&self) -> &[QueryParameter<T>] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<&QueryParameter<T>> {
        self.parameters.get(index)
    }

    /// Position of the first parameter on `property`.
    pub fn find(&self, property: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.property() == property)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Append a parameter and return its position.
    pub fn add(&mut self, parameter: QueryParameter<T>) -> usize {
        self.parameters.push(parameter);
        let index = self.parameters.len() - 1;
        self.notify(QueryChange::Added(index));
        index
    }

    /// Build and append an `and` parameter.
    pub fn add_parameter(
        &mut self,
        invoker: SharedInvoker<T>,
        compare: CompareType,
        value: impl Into<Value>,
    ) -> Result<usize> {
        let parameter = QueryParameter::new(invoker, compare, value)?;
        Ok(self.add(parameter))
    }

    /// Update the parameter on the invoker's property in place, or append a
    /// new one if there is none.
    pub fn add_or_update(
        &mut self,
        invoker: SharedInvoker<T>,
        compare: CompareType,
        value: impl Into<Value>,
    ) -> Result<usize> {
        let Some(index) = self.find(invoker.name()) else {
            return self.add_parameter(invoker, compare, value);
        };
        let updated =
            QueryParameter::new(invoker, compare, value)?.with_flags_of(&self.parameters[index]);
        self.parameters[index] = updated;
        self.notify(QueryChange::Changed(index));
        Ok(index)
    }

    /// Edit a parameter in place. The edit is discarded if it fails.
    pub fn update<F>(&mut self, index: usize, edit: F) -> Result<()>
    where
        F: FnOnce(&mut QueryParameter<T>) -> Result<()>,
    {
        let parameter = self.parameters.get_mut(index).ok_or_else(|| {
            SieveError::invalid_argument("update", format!("no parameter at {}", index))
        })?;
        let mut updated = parameter.clone();
        edit(&mut updated)?;
        *parameter = updated;
        self.notify(QueryChange::Changed(index));
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<QueryParameter<T>> {
        if index >= self.parameters.len() {
            return None;
        }
        let removed = self.parameters.remove(index);
        self.notify(QueryChange::Removed(index));
        Some(removed)
    }

    /// Remove every parameter on `property`. Returns true if any was removed.
    pub fn remove_property(&mut self, property: &str) -> bool {
        let before = self.parameters.len();
        self.parameters.retain(|p| p.property() != property);
        let removed = self.parameters.len() != before;
        if removed {
            self.notify(QueryChange::Reset);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.parameters.clear();
        self.notify(QueryChange::Reset);
    }

    /// Empty every parameter's value, keeping the parameters themselves.
    pub fn clear_values(&mut self) {
        let was_suspending = self.suspending;
        self.set_suspending(true);
        for index in 0..self.parameters.len() {
            // A null value parses for every operator.
            if self.parameters[index].set_value(Value::Null).is_ok() {
                self.notify(QueryChange::Changed(index));
            }
        }
        if !was_suspending {
            self.set_suspending(false);
        }
    }

    pub fn orders(&self) -> &[SortOrder<T>] {
        &self.orders
    }

    pub fn add_order(&mut self, order: SortOrder<T>) {
        self.orders.push(order);
    }

    pub fn clear_orders(&mut self) {
        self.orders.clear();
    }

    /// Render the active parameters as a boolean expression.
    ///
    /// ```rust
    /// use sieve_core::{CompareType, FnInvoker, Query, ValueType};
    ///
    /// struct Person { name: String, age: i64 }
    ///
    /// let mut query = Query::new();
    /// let age = FnInvoker::new("Age", ValueType::Int, |p: &Person| p.age).shared();
    /// let name = FnInvoker::new("Name", ValueType::Text, |p: &Person| p.name.clone()).shared();
    /// query.add_parameter(age, CompareType::GREATER_OR_EQUAL, 30).unwrap();
    /// query.add_parameter(name, CompareType::LIKE, "Jo").unwrap();
    /// assert_eq!(query.format(), "Age >= 30 and Name like 'Jo'");
    /// ```
    pub fn format(&self) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        let mut need_logic = false;
        for parameter in self.parameters.iter().filter(|p| p.is_active()) {
            if need_logic {
                out.push(' ');
                out.push_str(parameter.logic().as_str());
                out.push(' ');
            }
            if parameter.group_begin() {
                out.push('(');
                depth += 1;
            }
            out.push_str(&parameter.format());
            if parameter.group_end() && depth > 0 {
                out.push(')');
                depth -= 1;
            }
            need_logic = true;
        }
        for _ in 0..depth {
            out.push(')');
        }
        out
    }

    /// Fold the active parameters left to right, honoring groups.
    ///
    /// `skip` lets a fold short-circuit: when it returns true for the running
    /// value and the next connective, that parameter is not evaluated.
    fn fold<A, E, S>(&self, mut eval: E, skip: S, merge: fn(LogicType, A, A) -> A) -> Result<Option<A>>
    where
        E: FnMut(&QueryParameter<T>) -> Result<A>,
        S: Fn(LogicType, &A) -> bool,
    {
        struct Frame<A> {
            outer: Option<A>,
            logic: LogicType,
        }

        fn close<A>(frame: Frame<A>, inner: Option<A>, merge: fn(LogicType, A, A) -> A) -> Option<A> {
            match (frame.outer, inner) {
                (Some(outer), Some(inner)) => Some(merge(frame.logic, outer, inner)),
                (outer, None) => outer,
                (None, inner) => inner,
            }
        }

        let mut stack: Vec<Frame<A>> = Vec::new();
        let mut current: Option<A> = None;

        for parameter in self.parameters.iter().filter(|p| p.is_active()) {
            let logic = parameter.logic();
            if parameter.group_begin() {
                stack.push(Frame {
                    outer: current.take(),
                    logic,
                });
            }
            current = Some(match current.take() {
                None => eval(parameter)?,
                Some(acc) if skip(logic, &acc) => acc,
                Some(acc) => {
                    let found = eval(parameter)?;
                    merge(logic, acc, found)
                }
            });
            if parameter.group_end() {
                if let Some(frame) = stack.pop() {
                    current = close(frame, current.take(), merge);
                }
            }
        }
        while let Some(frame) = stack.pop() {
            current = close(frame, current.take(), merge);
        }
        Ok(current)
    }

    /// Test one item against the whole query. An empty query matches all.
    pub fn check(&self, item: &T) -> bool {
        let result = self.fold(
            |parameter| Ok(parameter.check(item)),
            |logic, acc| logic == LogicType::AND && !*acc,
            |logic, left, right| logic.combine(left, right),
        );
        matches!(result, Ok(None) | Ok(Some(true)))
    }

    /// Build a comparer from the orders; `None` when there are no orders.
    pub fn comparer(&self) -> Option<ItemComparer<T>>
    where
        T: 'static,
    {
        if self.orders.is_empty() {
            return None;
        }
        let orders = self.orders.clone();
        Some(Arc::new(move |a: &T, b: &T| {
            orders
                .iter()
                .map(|order| order.compare(a, b))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }))
    }

    /// Stable in-place sort by the orders. No-op without orders.
    pub fn sort(&self, items: &mut [Arc<T>]) {
        if self.orders.is_empty() {
            return;
        }
        items.sort_by(|a, b| {
            self.orders
                .iter()
                .map(|order| order.compare(a, b))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    /// Select matching items from `source`, then sort them by the orders.
    ///
    /// Results keep source order before sorting. Parameters whose property
    /// has an index in `indexes` are answered by an index scan; the rest fall
    /// back to a linear test of every source item.
    pub fn select(
        &self,
        source: &[Arc<T>],
        indexes: Option<&ListIndexes<T>>,
    ) -> Result<Vec<Arc<T>>> {
        self.select_with(source, indexes, DEFAULT_PARALLEL_THRESHOLD)
    }

    /// [`select`](Self::select) with an explicit parallel scan threshold.
    pub fn select_with(
        &self,
        source: &[Arc<T>],
        indexes: Option<&ListIndexes<T>>,
        parallel_threshold: usize,
    ) -> Result<Vec<Arc<T>>> {
        let result = self.fold(
            |parameter| evaluate(parameter, source, indexes, parallel_threshold),
            |logic, acc: &Vec<Arc<T>>| logic == LogicType::AND && acc.is_empty(),
            |logic, left, right| logic.concat(left, right),
        )?;

        let mut items = match result {
            None => source.to_vec(),
            Some(matched) => {
                let ids = id_set(&matched);
                source
                    .iter()
                    .filter(|item| ids.contains(&item_id(item)))
                    .cloned()
                    .collect()
            }
        };
        self.sort(&mut items);
        Ok(items)
    }
}

/// Result set of one parameter: index scan if possible, else linear.
fn evaluate<T: Send + Sync + 'static>(
    parameter: &QueryParameter<T>,
    source: &[Arc<T>],
    indexes: Option<&ListIndexes<T>>,
    parallel_threshold: usize,
) -> Result<Vec<Arc<T>>> {
    if let Some(index) = indexes.and_then(|registry| registry.get_index(parameter.property())) {
        trace!(property = %parameter.property(), "Index scan");
        return index.scan_parameter(parameter);
    }

    trace!(property = %parameter.property(), items = source.len(), "Linear scan");
    Ok(linear_scan(source, parallel_threshold, |item| parameter.check(item)))
}

/// Filter `source` by `predicate`, in parallel above `parallel_threshold`.
pub(crate) fn linear_scan<T, P>(source: &[Arc<T>], parallel_threshold: usize, predicate: P) -> Vec<Arc<T>>
where
    T: Send + Sync,
    P: Fn(&T) -> bool + Send + Sync,
{
    if source.len() > parallel_threshold {
        source
            .par_iter()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    } else {
        source
            .iter()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("parameters", &self.parameters)
            .field("orders", &self.orders)
            .field("suspending", &self.suspending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::LogicType;
    use crate::invoker::FnInvoker;
    use crate::value::ValueType;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Person {
        name: &'static str,
        age: i64,
    }

    fn age() -> SharedInvoker<Person> {
        FnInvoker::new("Age", ValueType::Int, |p: &Person| p.age).shared()
    }

    fn name() -> SharedInvoker<Person> {
        FnInvoker::new("Name", ValueType::Text, |p: &Person| p.name).shared()
    }

    fn people() -> Vec<Arc<Person>> {
        [("John", 34), ("Joan", 28), ("Mike", 45), ("Anna", 30), ("Jody", 30)]
            .into_iter()
            .map(|(name, age)| Arc::new(Person { name, age }))
            .collect()
    }

    fn names(items: &[Arc<Person>]) -> Vec<&'static str> {
        items.iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_format_connectives_and_groups() {
        let mut query = Query::new();
        query.add(QueryParameter::new(age(), CompareType::GREATER, 18).unwrap());
        query.add(
            QueryParameter::new(name(), CompareType::EQUAL, "Anna")
                .unwrap()
                .begin_group(),
        );
        query.add(
            QueryParameter::new(name(), CompareType::IN, "Jody, Mike")
                .unwrap()
                .with_logic(LogicType::OR)
                .end_group(),
        );
        assert_eq!(
            query.format(),
            "Age > 18 and (Name = 'Anna' or Name in ('Jody', 'Mike'))"
        );
    }

    #[test]
    fn test_format_skips_empty_and_disabled() {
        let mut query = Query::new();
        query.add_parameter(name(), CompareType::EQUAL, "").unwrap();
        let index = query.add_parameter(age(), CompareType::LESS, 50).unwrap();
        query.add_parameter(name(), CompareType::LIKE, "Jo").unwrap();
        assert_eq!(query.format(), "Age < 50 and Name like 'Jo'");

        query.update(index, |p| {
            p.set_enabled(false);
            Ok(())
        })
        .unwrap();
        assert_eq!(query.format(), "Name like 'Jo'");
    }

    #[test]
    fn test_select_linear() {
        let items = people();
        let mut query = Query::new();
        query.add_parameter(age(), CompareType::GREATER_OR_EQUAL, 30).unwrap();
        query.add_parameter(name(), CompareType::LIKE, "Jo").unwrap();

        let found = query.select(&items, None).unwrap();
        assert_eq!(names(&found), vec!["John", "Jody"]);
    }

    #[test]
    fn test_select_or_and_groups() {
        let items = people();
        let mut query = Query::new();
        query.add_parameter(name(), CompareType::EQUAL, "Mike").unwrap();
        query.add(
            QueryParameter::new(age(), CompareType::EQUAL, 30)
                .unwrap()
                .with_logic(LogicType::OR)
                .begin_group(),
        );
        query.add(
            QueryParameter::new(name(), CompareType::LIKE, "an")
                .unwrap()
                .end_group(),
        );

        let found = query.select(&items, None).unwrap();
        assert_eq!(names(&found), vec!["Mike", "Anna"]);
        for item in &items {
            assert_eq!(
                query.check(item),
                found.iter().any(|f| Arc::ptr_eq(f, item)),
                "{}",
                item.name
            );
        }
    }

    #[test]
    fn test_select_short_circuits_and() {
        let items = people();
        let mut query = Query::new();
        query.add_parameter(age(), CompareType::GREATER, 100).unwrap();
        query.add_parameter(name(), CompareType::LIKE, "J").unwrap();
        query
            .add(QueryParameter::new(name(), CompareType::EQUAL, "Anna").unwrap().with_logic(LogicType::OR));
        let found = query.select(&items, None).unwrap();
        assert_eq!(names(&found), vec!["Anna"]);
    }

    #[test]
    fn test_empty_query_selects_all_sorted() {
        let items = people();
        let mut query = Query::new();
        query.add_order(SortOrder::ascending(age()));
        query.add_order(SortOrder::descending(name()));

        let found = query.select(&items, None).unwrap();
        assert_eq!(names(&found), vec!["Joan", "Jody", "Anna", "John", "Mike"]);
        assert!(query.check(&items[0]));
    }

    #[test]
    fn test_sort_is_stable() {
        let mut items = people();
        let mut query = Query::new();
        query.add_order(SortOrder::ascending(age()));
        query.sort(&mut items);
        // Anna was before Jody in the source
        assert_eq!(names(&items), vec!["Joan", "Anna", "Jody", "John", "Mike"]);

        let comparer = query.comparer().unwrap();
        assert_eq!(comparer(&items[0], &items[4]), Ordering::Less);
        assert!(Query::<Person>::new().comparer().is_none());
    }

    #[test]
    fn test_add_or_update_in_place() {
        let mut query = Query::new();
        let first = query.add_or_update(age(), CompareType::EQUAL, 30).unwrap();
        let second = query.add_or_update(age(), CompareType::IN, "30, 40").unwrap();
        assert_eq!(first, second);
        assert_eq!(query.len(), 1);
        assert_eq!(query.format(), "Age in (30, 40)");

        // a failed update leaves the parameter as it was
        assert!(query
            .add_or_update(age(), CompareType::EQUAL, "thirty")
            .is_err());
        assert_eq!(query.format(), "Age in (30, 40)");
    }

    #[test]
    fn test_notifications_and_suspending() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut query = Query::new();
        let sink = events.clone();
        query.subscribe(move |change| sink.lock().push(*change));

        query.add_parameter(age(), CompareType::EQUAL, 30).unwrap();
        query.add_parameter(name(), CompareType::EQUAL, "Anna").unwrap();
        query.clear_values();
        assert_eq!(query.format(), "");
        query.remove(0);

        assert_eq!(
            *events.lock(),
            vec![
                QueryChange::Added(0),
                QueryChange::Added(1),
                QueryChange::Reset,
                QueryChange::Removed(0),
            ]
        );
    }

    #[test]
    fn test_update_out_of_range() {
        let mut query: Query<Person> = Query::new();
        assert!(query.update(3, |_| Ok(())).is_err());
        assert!(query.remove(3).is_none());
    }
}
