//! Query parameters: one predicate of a composable query.
//!
//! A parameter binds an invoker, an operator, a connective and a value. The
//! raw value is kept as given; the typed value is re-derived from it and the
//! invoker's declared type every time either the value or the operator
//! changes, so evaluation always compares native typed values.

use crate::compare::{CompareKind, CompareType, LogicType};
use crate::error::{Result, SieveError};
use crate::invoker::SharedInvoker;
use crate::value::{Value, ValueType};
use std::fmt;

/// One predicate: `property operator value`, joined to the previous
/// predicate by `logic`.
pub struct QueryParameter<T> {
    invoker: SharedInvoker<T>,
    compare: CompareType,
    logic: LogicType,
    value: Value,
    typed_value: Value,
    enabled: bool,
    always_include: bool,
    group_begin: bool,
    group_end: bool,
}

impl<T> Clone for QueryParameter<T> {
    fn clone(&self) -> Self {
        QueryParameter {
            invoker: self.invoker.clone(),
            compare: self.compare,
            logic: self.logic,
            value: self.value.clone(),
            typed_value: self.typed_value.clone(),
            enabled: self.enabled,
            always_include: self.always_include,
            group_begin: self.group_begin,
            group_end: self.group_end,
        }
    }
}

impl<T> QueryParameter<T> {
    /// Create an enabled `and` parameter.
    ///
    /// Fails if `value` cannot be parsed for the invoker's type and operator.
    pub fn new(
        invoker: SharedInvoker<T>,
        compare: CompareType,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let value = value.into();
        let typed_value = parse_typed(&value, invoker.value_type(), compare)?;
        Ok(QueryParameter {
            invoker,
            compare,
            logic: LogicType::AND,
            value,
            typed_value,
            enabled: true,
            always_include: false,
            group_begin: false,
            group_end: false,
        })
    }

    pub fn with_logic(mut self, logic: LogicType) -> Self {
        self.logic = logic;
        self
    }

    /// Open a parenthesized group at this parameter.
    pub fn begin_group(mut self) -> Self {
        self.group_begin = true;
        self
    }

    /// Close the innermost open group after this parameter.
    pub fn end_group(mut self) -> Self {
        self.group_end = true;
        self
    }

    /// Keep this parameter even when its value is empty.
    pub fn include_empty(mut self) -> Self {
        self.always_include = true;
        self
    }

    /// Take connective, grouping and flags from `other`.
    pub(crate) fn with_flags_of(mut self, other: &Self) -> Self {
        self.logic = other.logic;
        self.enabled = other.enabled;
        self.always_include = other.always_include;
        self.group_begin = other.group_begin;
        self.group_end = other.group_end;
        self
    }

    pub fn invoker(&self) -> &SharedInvoker<T> {
        &self.invoker
    }

    pub fn property(&self) -> &str {
        self.invoker.name()
    }

    pub fn compare(&self) -> CompareType {
        self.compare
    }

    pub fn logic(&self) -> LogicType {
        self.logic
    }

    /// The value as given by the caller.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The value parsed for the property type and operator.
    pub fn typed_value(&self) -> &Value {
        &self.typed_value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn group_begin(&self) -> bool {
        self.group_begin
    }

    pub fn group_end(&self) -> bool {
        self.group_end
    }

    pub fn set_value(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.typed_value = parse_typed(&value, self.invoker.value_type(), self.compare)?;
        self.value = value;
        Ok(())
    }

    pub fn set_compare(&mut self, compare: CompareType) -> Result<()> {
        self.typed_value = parse_typed(&self.value, self.invoker.value_type(), compare)?;
        self.compare = compare;
        Ok(())
    }

    pub fn set_logic(&mut self, logic: LogicType) {
        self.logic = logic;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_group(&mut self, begin: bool, end: bool) {
        self.group_begin = begin;
        self.group_end = end;
    }

    /// Whether this parameter carries no usable value.
    ///
    /// `is` / `is not` never need a value.
    pub fn is_empty(&self) -> bool {
        if self.always_include || self.compare.kind() == CompareKind::Is {
            return false;
        }
        self.typed_value.is_empty() || self.typed_value.format_literal().is_empty()
    }

    /// Whether this parameter takes part in evaluation and formatting.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_empty()
    }

    /// Test one item against this predicate.
    pub fn check(&self, item: &T) -> bool {
        self.compare
            .matches(&self.invoker.get_value(item), &self.typed_value)
    }

    /// Render as `property operator literal`, or an empty string when empty.
    pub fn format(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        if self.compare.kind() == CompareKind::Is {
            return format!("{} {} null", self.property(), self.compare);
        }
        format!(
            "{} {} {}",
            self.property(),
            self.compare,
            self.typed_value.format_literal()
        )
    }
}

impl<T> fmt::Debug for QueryParameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParameter")
            .field("property", &self.property())
            .field("compare", &self.compare)
            .field("logic", &self.logic)
            .field("value", &self.value)
            .field("typed_value", &self.typed_value)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Derive the typed value of a parameter.
///
/// - `is`: always null
/// - `like`: the pattern text, unconverted
/// - `in`: a list; text is split on commas
/// - `between`: a range; text may use `..`, `and` or a comma between bounds
/// - everything else: converted to the declared type
pub fn parse_typed(value: &Value, value_type: ValueType, compare: CompareType) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match compare.kind() {
        CompareKind::Is => Ok(Value::Null),
        CompareKind::Like => Ok(Value::Text(value.to_text())),
        CompareKind::In => {
            let items = match value {
                Value::List(items) => items.clone(),
                Value::Text(text) => text
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::Text(unquote(part).to_string()))
                    .collect(),
                other => vec![other.clone()],
            };
            let converted = items
                .iter()
                .map(|item| item.convert(value_type))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(converted))
        }
        CompareKind::Between => {
            let (min, max) = match value {
                Value::Range(min, max) => ((**min).clone(), (**max).clone()),
                Value::List(items) if items.len() == 2 => (items[0].clone(), items[1].clone()),
                Value::Text(text) => split_range(text).ok_or_else(|| {
                    SieveError::invalid_argument(
                        "between",
                        format!("cannot read a range from {:?}", text),
                    )
                })?,
                other => {
                    return Err(SieveError::invalid_argument(
                        "between",
                        format!("expected a range, got {}", other.format_literal()),
                    ))
                }
            };
            Ok(Value::range(min.convert(value_type)?, max.convert(value_type)?))
        }
        _ => value.convert(value_type),
    }
}

fn split_range(text: &str) -> Option<(Value, Value)> {
    let lower = text.to_lowercase();
    let (left, right) = if let Some(pos) = text.find("..") {
        (&text[..pos], &text[pos + 2..])
    } else if let Some(pos) = lower.find(" and ") {
        (&text[..pos], &text[pos + 5..])
    } else {
        text.split_once(',')?
    };
    let (left, right) = (unquote(left.trim()), unquote(right.trim()));
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((Value::from(left), Value::from(right)))
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::FnInvoker;
    use chrono::NaiveDate;

    struct Row {
        age: i64,
        born: NaiveDate,
        name: String,
    }

    fn age() -> SharedInvoker<Row> {
        FnInvoker::new("Age", ValueType::Int, |r: &Row| r.age).shared()
    }

    fn born() -> SharedInvoker<Row> {
        FnInvoker::new("Born", ValueType::Date, |r: &Row| r.born).shared()
    }

    fn name() -> SharedInvoker<Row> {
        FnInvoker::new("Name", ValueType::Text, |r: &Row| r.name.clone()).shared()
    }

    #[test]
    fn test_typed_value_follows_type() {
        let param = QueryParameter::new(age(), CompareType::GREATER_OR_EQUAL, "30").unwrap();
        assert_eq!(param.value(), &Value::from("30"));
        assert_eq!(param.typed_value(), &Value::Int(30));
    }

    #[test]
    fn test_typed_value_rederived_on_change() {
        let mut param = QueryParameter::new(age(), CompareType::EQUAL, 5).unwrap();
        param.set_value("7, 8").unwrap_err();
        assert_eq!(param.typed_value(), &Value::Int(5));

        param.set_compare(CompareType::IN).unwrap();
        param.set_value("7, 8").unwrap();
        assert_eq!(param.typed_value(), &Value::list([7, 8]));
    }

    #[test]
    fn test_between_parsing() {
        let param = QueryParameter::new(age(), CompareType::BETWEEN, "18..65").unwrap();
        assert_eq!(param.typed_value(), &Value::range(18, 65));

        let param = QueryParameter::new(born(), CompareType::BETWEEN, "2020-01-01 and 2020-12-31");
        assert!(param.is_ok());

        let err = QueryParameter::new(age(), CompareType::BETWEEN, 3).unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_empty_detection() {
        let param = QueryParameter::new(name(), CompareType::EQUAL, "  ").unwrap();
        assert!(param.is_empty());
        assert!(!param.is_active());
        assert_eq!(param.format(), "");

        let param = QueryParameter::new(name(), CompareType::IS, Value::Null).unwrap();
        assert!(!param.is_empty());

        let param = QueryParameter::new(name(), CompareType::EQUAL, Value::Null)
            .unwrap()
            .include_empty();
        assert!(!param.is_empty());
    }

    #[test]
    fn test_format() {
        let param = QueryParameter::new(name(), CompareType::LIKE, "Jo").unwrap();
        assert_eq!(param.format(), "Name like 'Jo'");

        let d = NaiveDate::from_ymd_opt(2021, 3, 4).unwrap();
        let param = QueryParameter::new(born(), CompareType::LESS, d).unwrap();
        assert_eq!(param.format(), "Born < '2021.03.04'");

        let param = QueryParameter::new(age(), CompareType::NOT_IN, "1,2").unwrap();
        assert_eq!(param.format(), "Age not in (1, 2)");

        let param = QueryParameter::new(age(), CompareType::IS_NOT, Value::Null).unwrap();
        assert_eq!(param.format(), "Age is not null");
    }

    #[test]
    fn test_check() {
        let row = Row {
            age: 31,
            born: NaiveDate::from_ymd_opt(1990, 6, 1).unwrap(),
            name: "Joanna".to_string(),
        };
        assert!(QueryParameter::new(age(), CompareType::GREATER, 30)
            .unwrap()
            .check(&row));
        assert!(QueryParameter::new(name(), CompareType::LIKE, "%jo%")
            .unwrap()
            .check(&row));
        assert!(!QueryParameter::new(born(), CompareType::GREATER, "2000-01-01")
            .unwrap()
            .check(&row));
    }
}
