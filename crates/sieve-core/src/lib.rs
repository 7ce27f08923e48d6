//! # Sieve Core Library
//!
//! This crate provides in-memory secondary indexes, composable queries and a
//! block column store for collections of shared items. Items are reached only
//! through property invokers, so any value-backed entity can be indexed and
//! queried.
//!
//! ## Architecture
//!
//! - **Values** (`value`, `key`, `nulls`): Typed values, index key types and
//!   the per-type null sentinels
//! - **Invokers** (`invoker`, `record`): Named property accessors and an
//!   array-backed row type
//! - **Indexes** (`index`, `registry`): Hash indexes per property and the set
//!   of indexes owned by a collection
//! - **Queries** (`compare`, `parameter`, `query`): Operators, predicates,
//!   set-algebra evaluation and sorting
//! - **Columns** (`pull`, `pull_index`): Sparse chunked column storage and its
//!   sorted index
//! - **Collections** (`list`, `view`): The selectable list and filtered views
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sieve_core::{CompareType, FnInvoker, InvokerTable, Query, SelectableList, ValueType};
//!
//! struct Person { name: String, age: i64 }
//!
//! let age = FnInvoker::new("age", ValueType::Int, |p: &Person| p.age).shared();
//! let name = FnInvoker::new("name", ValueType::Text, |p: &Person| p.name.clone()).shared();
//! let people = SelectableList::new(InvokerTable::new().with(age.clone()).with(name.clone()));
//! people.add(Arc::new(Person { name: "John".into(), age: 34 })).unwrap();
//! people.add(Arc::new(Person { name: "Jane".into(), age: 27 })).unwrap();
//!
//! let mut query = Query::new();
//! query.add_parameter(age, CompareType::GREATER_OR_EQUAL, 30).unwrap();
//! query.add_parameter(name, CompareType::LIKE, "jo").unwrap();
//! assert_eq!(query.format(), "age >= 30 and name like 'jo'");
//!
//! let found = people.select_query(&query).unwrap();
//! assert_eq!(found[0].name, "John");
//! ```

pub mod compare;
pub mod config;
pub mod error;
pub mod index;
pub mod invoker;
pub mod key;
pub mod list;
pub mod nulls;
pub mod parameter;
pub mod pull;
pub mod pull_index;
pub mod query;
pub mod record;
pub mod registry;
pub mod value;
pub mod view;

// Re-export commonly used types
pub use compare::{CompareKind, CompareType, LogicKind, LogicType};
pub use config::Config;
pub use error::{Result, SieveError};
pub use index::{for_invoker, ItemIndex, ListIndex};
pub use invoker::{FnInvoker, Invoker, InvokerTable, SharedInvoker};
pub use key::{IndexKey, Real};
pub use list::{ListIter, ListSettings, SelectableList};
pub use parameter::QueryParameter;
pub use pull::Pull;
pub use pull_index::{PullIndex, PullItem};
pub use query::{ItemComparer, Query, QueryChange, SortDirection, SortOrder};
pub use record::{Column, Record, RecordSchema};
pub use registry::ListIndexes;
pub use value::{Value, ValueType};
pub use view::FilterView;
