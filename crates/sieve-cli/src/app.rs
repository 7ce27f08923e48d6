//! Loading JSON rows into a selectable list.

use anyhow::{bail, Context};
use chrono::{NaiveDate, NaiveDateTime};
use sieve_core::{Config, Record, RecordSchema, SelectableList, Value, ValueType};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Rows of one JSON file, ready to query.
pub struct App {
    pub schema: RecordSchema,
    pub rows: SelectableList<Record>,
}

impl App {
    /// Read `path` and load every row into a list configured by `config`.
    pub fn load(config: &Config, path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let json: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let app = Self::from_json(config, &json)?;

        info!(
            path = %path.display(),
            rows = app.rows.len(),
            columns = app.schema.columns().len(),
            "Rows loaded"
        );
        Ok(app)
    }

    /// Build from a JSON array of objects. The schema comes from the first row.
    pub fn from_json(config: &Config, json: &serde_json::Value) -> anyhow::Result<Self> {
        let Some(rows) = json.as_array() else {
            bail!("Expected a JSON array of objects");
        };

        let schema = match rows.first() {
            Some(first) => infer_schema(first)?,
            None => RecordSchema::new(),
        };

        let records = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let object = row
                    .as_object()
                    .with_context(|| format!("Row {} is not an object", i))?;
                let values = schema
                    .columns()
                    .iter()
                    .map(|column| object.get(&column.name).map_or(Value::Null, to_value))
                    .collect();
                let record = schema
                    .record(values)
                    .with_context(|| format!("Row {} does not match the schema", i))?;
                Ok(Arc::new(record))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let list = SelectableList::with_config(schema.invokers(), config);
        list.extend(records)?;
        Ok(App { schema, rows: list })
    }
}

/// Column types of the first row.
///
/// Numbers become Int or Float, booleans Bool, strings Date or DateTime when
/// they parse as one and Text otherwise. Nulls and nested values are Text.
pub fn infer_schema(first: &serde_json::Value) -> anyhow::Result<RecordSchema> {
    let Some(object) = first.as_object() else {
        bail!("Row 0 is not an object");
    };
    Ok(object
        .iter()
        .fold(RecordSchema::new(), |schema, (name, value)| {
            schema.with_column(name.clone(), infer_type(value))
        }))
}

fn infer_type(value: &serde_json::Value) -> ValueType {
    match value {
        serde_json::Value::Bool(_) => ValueType::Bool,
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Int,
        serde_json::Value::Number(_) => ValueType::Float,
        serde_json::Value::String(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => {
            ValueType::Date
        }
        serde_json::Value::String(s) if parse_datetime(s).is_some() => ValueType::DateTime,
        _ => ValueType::Text,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// JSON to an untyped value; the schema converts it to the column type.
fn to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// A value as JSON for output.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => {
            serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        other => serde_json::Value::String(other.to_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sieve_core::CompareType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn people() -> serde_json::Value {
        json!([
            {"name": "John", "age": 34, "born": "1990-02-01", "score": 1.5, "admin": true},
            {"name": "Joan", "age": 28, "born": "1996-07-12", "score": 2, "admin": false},
            {"name": "Mike", "age": null, "born": "1979-11-30", "score": 0.5, "admin": false}
        ])
    }

    #[test]
    fn test_infer_schema() {
        let schema = infer_schema(&people()[0]).unwrap();
        let types: Vec<_> = schema
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), c.value_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("admin", ValueType::Bool),
                ("age", ValueType::Int),
                ("born", ValueType::Date),
                ("name", ValueType::Text),
                ("score", ValueType::Float),
            ]
        );
    }

    #[test]
    fn test_load_and_select() {
        let app = App::from_json(&Config::default(), &people()).unwrap();
        assert_eq!(app.rows.len(), 3);

        let found = app.rows.select("age", CompareType::IS, Value::Null).unwrap();
        assert_eq!(found.len(), 1);
        let name = app.schema.ordinal("name").unwrap();
        assert_eq!(found[0].get(name), Value::from("Mike"));

        // integer 2 was widened to the float column
        let score = app.schema.ordinal("score").unwrap();
        assert_eq!(app.rows.get(1).unwrap().get(score), Value::Float(2.0));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", people()).unwrap();
        let app = App::load(&Config::default(), file.path()).unwrap();
        assert_eq!(app.schema.columns().len(), 5);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(App::from_json(&Config::default(), &json!({"a": 1})).is_err());
        assert!(App::from_json(&Config::default(), &json!([{"a": 1}, 2])).is_err());
        assert!(App::from_json(&Config::default(), &json!([{"a": 1}, {"a": "x"}])).is_err());
    }

    #[test]
    fn test_to_json() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(to_json(&Value::Date(date)), json!("2024-01-31"));
        assert_eq!(to_json(&Value::Int(3)), json!(3));
        assert_eq!(to_json(&Value::Null), json!(null));
    }
}
