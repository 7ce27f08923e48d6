//! Query command - filter and sort rows.

use crate::app::{to_json, App};
use crate::OutputFormat;
use anyhow::{bail, Context};
use sieve_core::{
    CompareType, Config, LogicType, Query, QueryParameter, Record, SortDirection, SortOrder, Value,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Run the query command.
#[allow(clippy::too_many_arguments)]
pub fn run(
    config: Config,
    file: &Path,
    predicates: &[String],
    any: bool,
    index: &[String],
    sort: &[String],
    limit: Option<usize>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let app = App::load(&config, file)?;

    for property in index {
        app.rows
            .create_index(property)
            .with_context(|| format!("Cannot index {}", property))?;
    }

    let query = build_query(&app, predicates, any, sort)?;
    if !query.format().is_empty() {
        eprintln!("Filter: {}", query.format());
    }

    let start = Instant::now();
    let mut results = app.rows.select_query(&query)?;
    let elapsed = start.elapsed();
    let matched = results.len();
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    debug!(indexes = ?app.rows.indexes().properties(), "Query evaluated");

    match output {
        OutputFormat::Text => {
            print_table(&app, &results);
            eprintln!();
            eprintln!(
                "Matched {} of {} rows in {:.3}ms",
                matched,
                app.rows.len(),
                elapsed.as_secs_f64() * 1000.0
            );
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = results
                .iter()
                .map(|record| {
                    let object = app
                        .schema
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(i, column)| (column.name.clone(), to_json(&record.get(i))))
                        .collect::<serde_json::Map<_, _>>();
                    serde_json::Value::Object(object)
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

/// Build a query from `PROP OP VALUE` triples and `PROP[:desc]` sort keys.
pub fn build_query(
    app: &App,
    predicates: &[String],
    any: bool,
    sort: &[String],
) -> anyhow::Result<Query<Record>> {
    if predicates.len() % 3 != 0 {
        bail!("Each --where takes a property, an operator and a value");
    }

    let invokers = app.rows.invokers();
    let logic = if any { LogicType::OR } else { LogicType::AND };
    let mut query = Query::new();

    for triple in predicates.chunks(3) {
        let [property, operator, value] = triple else {
            continue;
        };
        let invoker = invokers.require(property)?.clone();
        let compare: CompareType = operator.parse()?;
        let parameter = QueryParameter::new(invoker, compare, Value::Text(value.clone()))
            .with_context(|| format!("Invalid predicate: {} {} {}", property, operator, value))?
            .with_logic(logic);
        query.add(parameter);
    }

    for key in sort {
        let (property, direction) = match key.split_once(':') {
            Some((property, "desc")) => (property, SortDirection::Descending),
            Some((property, "asc")) => (property, SortDirection::Ascending),
            Some((_, other)) => bail!("Unknown sort direction: {}", other),
            None => (key.as_str(), SortDirection::Ascending),
        };
        let invoker = invokers.require(property)?.clone();
        query.add_order(SortOrder::new(invoker, direction));
    }

    Ok(query)
}

fn print_table(app: &App, rows: &[Arc<Record>]) {
    let header: Vec<&str> = app.schema.columns().iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join("\t"));
    for record in rows {
        let cells: Vec<String> = record.values().iter().map(Value::to_text).collect();
        println!("{}", cells.join("\t"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> App {
        let rows = json!([
            {"name": "John", "age": 34, "city": "Oslo"},
            {"name": "Joan", "age": 28, "city": "Bergen"},
            {"name": "Mike", "age": 45, "city": "Oslo"},
            {"name": "Jody", "age": 30, "city": "Bergen"}
        ]);
        App::from_json(&Config::default(), &rows).unwrap()
    }

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn names(app: &App, rows: &[Arc<Record>]) -> Vec<String> {
        let name = app.schema.ordinal("name").unwrap();
        rows.iter().map(|r| r.get(name).to_text()).collect()
    }

    #[test]
    fn test_all_predicates() {
        let app = app();
        let query = build_query(
            &app,
            &args(&["age", ">=", "30", "name", "like", "jo"]),
            false,
            &args(&["age:desc"]),
        )
        .unwrap();
        assert_eq!(query.format(), "age >= 30 and name like 'jo'");

        let found = app.rows.select_query(&query).unwrap();
        assert_eq!(names(&app, &found), vec!["John", "Jody"]);
    }

    #[test]
    fn test_any_predicate() {
        let app = app();
        let query = build_query(
            &app,
            &args(&["city", "=", "Bergen", "age", ">", "40"]),
            true,
            &args(&["name"]),
        )
        .unwrap();
        assert_eq!(query.format(), "city = 'Bergen' or age > 40");

        let found = app.rows.select_query(&query).unwrap();
        assert_eq!(names(&app, &found), vec!["Joan", "Jody", "Mike"]);
    }

    #[test]
    fn test_multi_word_operators() {
        let app = app();
        let query = build_query(&app, &args(&["city", "not in", "Oslo, Paris"]), false, &[]).unwrap();
        let found = app.rows.select_query(&query).unwrap();
        assert_eq!(names(&app, &found), vec!["Joan", "Jody"]);
    }

    #[test]
    fn test_bad_arguments() {
        let app = app();
        assert!(build_query(&app, &args(&["age", ">"]), false, &[]).is_err());
        assert!(build_query(&app, &args(&["height", "=", "1"]), false, &[]).is_err());
        assert!(build_query(&app, &args(&["age", "~", "1"]), false, &[]).is_err());
        assert!(build_query(&app, &args(&["age", "=", "old"]), false, &[]).is_err());
        assert!(build_query(&app, &[], false, &args(&["age:up"])).is_err());
    }
}
