//! Describe command - show the inferred schema and column statistics.

use crate::app::App;
use sieve_core::{CompareType, Config, Value, ValueType};
use std::path::Path;

/// Statistics of one column.
#[derive(Debug, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub value_type: ValueType,
    pub distinct: usize,
    pub nulls: usize,
}

/// Run the describe command.
pub fn run(config: Config, file: &Path) -> anyhow::Result<()> {
    let app = App::load(&config, file)?;

    println!("{}", file.display());
    println!("{}", "=".repeat(file.display().to_string().len()));
    println!();
    println!("Rows:    {}", app.rows.len());
    println!("Columns: {}", app.schema.columns().len());

    if app.rows.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "  {:<24} {:<10} {:>10} {:>10}",
        "Column", "Type", "Distinct", "Nulls"
    );
    for stats in column_stats(&app)? {
        println!(
            "  {:<24} {:<10} {:>10} {:>10}",
            stats.name, stats.value_type, stats.distinct, stats.nulls
        );
    }

    Ok(())
}

/// Index every column and count its keys and null rows.
///
/// Null and the type's default value share one key, so both count as null.
pub fn column_stats(app: &App) -> anyhow::Result<Vec<ColumnStats>> {
    app.schema
        .columns()
        .iter()
        .map(|column| {
            let index = app.rows.create_index(&column.name)?;
            let nulls = app.rows.select(&column.name, CompareType::IS, Value::Null)?;
            Ok(ColumnStats {
                name: column.name.clone(),
                value_type: column.value_type,
                distinct: index.bucket_count(),
                nulls: nulls.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_stats() {
        let rows = json!([
            {"city": "Oslo", "age": 34},
            {"city": "Bergen", "age": null},
            {"city": "Oslo", "age": 45},
            {"city": null, "age": 30}
        ]);
        let app = App::from_json(&Config::default(), &rows).unwrap();
        let stats = column_stats(&app).unwrap();

        assert_eq!(
            stats,
            vec![
                ColumnStats {
                    name: "age".to_string(),
                    value_type: ValueType::Int,
                    distinct: 4,
                    nulls: 1,
                },
                ColumnStats {
                    name: "city".to_string(),
                    value_type: ValueType::Text,
                    distinct: 3,
                    nulls: 1,
                },
            ]
        );
        assert_eq!(app.rows.indexes().len(), 2);
    }
}
