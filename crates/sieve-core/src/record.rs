//! Array-backed rows.
//!
//! A [`Record`] stores its values positionally; a [`RecordSchema`] names the
//! positions and hands out one [`ColumnInvoker`] per column. This is the
//! simplest value-backed entity the engine can index, and what the CLI uses
//! for rows loaded from JSON.

use crate::error::Result;
use crate::invoker::{Invoker, InvokerTable};
use crate::value::{Value, ValueType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A row of positional values with interior mutability.
#[derive(Debug, Default)]
pub struct Record {
    values: RwLock<Vec<Value>>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record {
            values: RwLock::new(values),
        }
    }

    /// Value at `ordinal`, `Null` past the end.
    pub fn get(&self, ordinal: usize) -> Value {
        self.values
            .read()
            .get(ordinal)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Write `value` at `ordinal`, growing the row with nulls if needed.
    pub fn set(&self, ordinal: usize, value: Value) {
        let mut values = self.values.write();
        if ordinal >= values.len() {
            values.resize(ordinal + 1, Value::Null);
        }
        values[ordinal] = value;
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of all values.
    pub fn values(&self) -> Vec<Value> {
        self.values.read().clone()
    }
}

/// A named, typed column of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

/// Column layout shared by a set of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSchema {
    columns: Vec<Column>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    pub fn with_column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            value_type,
        });
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Ordinal of the named column.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Build a record, converting each value to its column type.
    ///
    /// Missing trailing values are filled with nulls.
    pub fn record(&self, values: Vec<Value>) -> Result<Record> {
        let mut converted = Vec::with_capacity(self.columns.len());
        let mut values = values.into_iter();
        for column in &self.columns {
            let value = values.next().unwrap_or(Value::Null);
            converted.push(value.convert(column.value_type)?);
        }
        Ok(Record::new(converted))
    }

    /// One invoker per column, in column order.
    pub fn invokers(&self) -> InvokerTable<Record> {
        self.columns
            .iter()
            .enumerate()
            .fold(InvokerTable::new(), |table, (ordinal, column)| {
                table.with(Arc::new(ColumnInvoker {
                    name: column.name.clone(),
                    value_type: column.value_type,
                    ordinal,
                }))
            })
    }
}

/// Reads and writes one column of a [`Record`].
#[derive(Debug, Clone)]
pub struct ColumnInvoker {
    name: String,
    value_type: ValueType,
    ordinal: usize,
}

impl ColumnInvoker {
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl Invoker<Record> for ColumnInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn can_write(&self) -> bool {
        true
    }

    fn get_value(&self, item: &Record) -> Value {
        item.get(self.ordinal)
    }

    fn set_value(&self, item: &Record, value: Value) -> Result<()> {
        item.set(self.ordinal, value.convert(self.value_type)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RecordSchema {
        RecordSchema::new()
            .with_column("name", ValueType::Text)
            .with_column("age", ValueType::Int)
    }

    #[test]
    fn test_record_converts_values() {
        let record = schema()
            .record(vec![Value::from("Ann"), Value::from("41")])
            .unwrap();
        assert_eq!(record.get(1), Value::Int(41));
        assert_eq!(record.get(9), Value::Null);
    }

    #[test]
    fn test_record_pads_missing_values() {
        let record = schema().record(vec![Value::from("Ann")]).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(1), Value::Null);
    }

    #[test]
    fn test_column_invoker_round_trip() {
        let schema = schema();
        let invokers = schema.invokers();
        let record = schema.record(vec![]).unwrap();

        let age = invokers.get("age").unwrap();
        assert!(age.can_write());
        age.set_value(&record, Value::from("7")).unwrap();
        assert_eq!(age.get_value(&record), Value::Int(7));
        assert!(age.set_value(&record, Value::from("seven")).is_err());
    }

    #[test]
    fn test_schema_ordinal() {
        assert_eq!(schema().ordinal("age"), Some(1));
        assert_eq!(schema().ordinal("email"), None);
    }
}
