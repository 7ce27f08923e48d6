//! Comparison operators and logic connectives.
//!
//! [`CompareType`] is the predicate operator, [`LogicType`] the connective that
//! joins a predicate to the ones before it. Logic types combine whole result
//! sets ([`LogicType::concat`]), which is how query evaluation merges index
//! scans without re-filtering the collection per predicate.
//!
//! [`CompareType::matches`] is the per-item truth table. Index scans implement
//! the same table over bucket keys, so indexed and linear evaluation agree:
//!
//! | operator        | item value `v` (defaults count as null)               |
//! |-----------------|-------------------------------------------------------|
//! | `=` / `!=`      | `v == t` / `v != t`                                   |
//! | `>` `>=` `<` `<=` | `v` and `t` non-null and ordered                    |
//! | `like`          | `v` non-null, text contains the `%`-trimmed pattern   |
//! | `is` / `is not` | `v` is null / non-null                                |
//! | `in`            | `v` equals a list element                             |
//! | `between`       | `min <= v <= max`, inclusive                          |

use crate::error::{Result, SieveError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareKind {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
    Is,
    In,
    Between,
}

/// A predicate operator with optional negation.
///
/// Negated range operators are stored as their complement (`not >` is `<=`),
/// since both mean the same thing over non-null ordered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareType {
    kind: CompareKind,
    not: bool,
}

impl CompareType {
    pub const EQUAL: Self = CompareType::positive(CompareKind::Equal);
    pub const NOT_EQUAL: Self = CompareType::negative(CompareKind::Equal);
    pub const GREATER: Self = CompareType::positive(CompareKind::Greater);
    pub const GREATER_OR_EQUAL: Self = CompareType::positive(CompareKind::GreaterOrEqual);
    pub const LESS: Self = CompareType::positive(CompareKind::Less);
    pub const LESS_OR_EQUAL: Self = CompareType::positive(CompareKind::LessOrEqual);
    pub const LIKE: Self = CompareType::positive(CompareKind::Like);
    pub const NOT_LIKE: Self = CompareType::negative(CompareKind::Like);
    pub const IS: Self = CompareType::positive(CompareKind::Is);
    pub const IS_NOT: Self = CompareType::negative(CompareKind::Is);
    pub const IN: Self = CompareType::positive(CompareKind::In);
    pub const NOT_IN: Self = CompareType::negative(CompareKind::In);
    pub const BETWEEN: Self = CompareType::positive(CompareKind::Between);
    pub const NOT_BETWEEN: Self = CompareType::negative(CompareKind::Between);

    const fn positive(kind: CompareKind) -> Self {
        CompareType { kind, not: false }
    }

    const fn negative(kind: CompareKind) -> Self {
        CompareType { kind, not: true }
    }

    pub fn new(kind: CompareKind, not: bool) -> Self {
        if !not {
            return CompareType::positive(kind);
        }
        match kind {
            CompareKind::Greater => CompareType::LESS_OR_EQUAL,
            CompareKind::GreaterOrEqual => CompareType::LESS,
            CompareKind::Less => CompareType::GREATER_OR_EQUAL,
            CompareKind::LessOrEqual => CompareType::GREATER,
            _ => CompareType::negative(kind),
        }
    }

    pub fn kind(&self) -> CompareKind {
        self.kind
    }

    pub fn is_not(&self) -> bool {
        self.not
    }

    pub fn negate(self) -> Self {
        CompareType::new(self.kind, !self.not)
    }

    /// Whether this is one of `>`, `>=`, `<`, `<=`.
    pub fn is_range(&self) -> bool {
        matches!(
            self.kind,
            CompareKind::Greater
                | CompareKind::GreaterOrEqual
                | CompareKind::Less
                | CompareKind::LessOrEqual
        )
    }

    /// Test an ordering of `value` against the target for range operators.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self.kind {
            CompareKind::Greater => ordering == Ordering::Greater,
            CompareKind::GreaterOrEqual => ordering != Ordering::Less,
            CompareKind::Less => ordering == Ordering::Less,
            CompareKind::LessOrEqual => ordering != Ordering::Greater,
            _ => ordering == Ordering::Equal,
        }
    }

    /// SQL-like spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match (self.kind, self.not) {
            (CompareKind::Equal, false) => "=",
            (CompareKind::Equal, true) => "!=",
            (CompareKind::Greater, _) => ">",
            (CompareKind::GreaterOrEqual, _) => ">=",
            (CompareKind::Less, _) => "<",
            (CompareKind::LessOrEqual, _) => "<=",
            (CompareKind::Like, false) => "like",
            (CompareKind::Like, true) => "not like",
            (CompareKind::Is, false) => "is",
            (CompareKind::Is, true) => "is not",
            (CompareKind::In, false) => "in",
            (CompareKind::In, true) => "not in",
            (CompareKind::Between, false) => "between",
            (CompareKind::Between, true) => "not between",
        }
    }

    /// Evaluate this operator for one item value against a typed target.
    pub fn matches(&self, value: &Value, target: &Value) -> bool {
        let value = value.clone().normalized();
        let hit = match self.kind {
            CompareKind::Equal => value.matches(&target.clone().normalized()),
            CompareKind::Greater
            | CompareKind::GreaterOrEqual
            | CompareKind::Less
            | CompareKind::LessOrEqual => {
                if value.is_null() || target.is_null() {
                    return false;
                }
                match value.compare(target) {
                    Some(ordering) => self.accepts(ordering),
                    None => return false,
                }
            }
            CompareKind::Like => {
                if value.is_null() {
                    return false;
                }
                value.to_text().to_lowercase().contains(&like_needle(target))
            }
            CompareKind::Is => value.is_null(),
            CompareKind::In => membership(target).iter().any(|t| value.matches(t)),
            CompareKind::Between => {
                let Value::Range(min, max) = target else {
                    return false;
                };
                if value.is_null() {
                    return false;
                }
                match (value.compare(min), value.compare(max)) {
                    (Some(lo), Some(hi)) => lo != Ordering::Less && hi != Ordering::Greater,
                    _ => return false,
                }
            }
        };
        hit != self.not
    }
}

impl Default for CompareType {
    fn default() -> Self {
        CompareType::EQUAL
    }
}

impl fmt::Display for CompareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareType {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let compare = match normalized.as_str() {
            "=" | "==" | "eq" => CompareType::EQUAL,
            "!=" | "<>" | "ne" => CompareType::NOT_EQUAL,
            ">" | "gt" => CompareType::GREATER,
            ">=" | "ge" => CompareType::GREATER_OR_EQUAL,
            "<" | "lt" => CompareType::LESS,
            "<=" | "le" => CompareType::LESS_OR_EQUAL,
            "like" => CompareType::LIKE,
            "not like" => CompareType::NOT_LIKE,
            "is" => CompareType::IS,
            "is not" => CompareType::IS_NOT,
            "in" => CompareType::IN,
            "not in" => CompareType::NOT_IN,
            "between" => CompareType::BETWEEN,
            "not between" => CompareType::NOT_BETWEEN,
            _ => {
                return Err(SieveError::invalid_argument(
                    "comparator",
                    format!("unknown operator {:?}", s),
                ))
            }
        };
        Ok(compare)
    }
}

/// Lowercased `Like` pattern with `%` wildcards trimmed from both ends.
pub(crate) fn like_needle(target: &Value) -> String {
    target.to_text().trim().trim_matches('%').to_lowercase()
}

/// Normalized elements of an `In` argument. A scalar counts as a one-element
/// list.
pub(crate) fn membership(target: &Value) -> Vec<Value> {
    match target {
        Value::List(items) => items.iter().cloned().map(Value::normalized).collect(),
        other => vec![other.clone().normalized()],
    }
}

/// The connective of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicKind {
    And,
    Or,
}

/// A connective with optional negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicType {
    kind: LogicKind,
    not: bool,
}

impl LogicType {
    pub const AND: Self = LogicType::new(LogicKind::And, false);
    pub const AND_NOT: Self = LogicType::new(LogicKind::And, true);
    pub const OR: Self = LogicType::new(LogicKind::Or, false);
    pub const OR_NOT: Self = LogicType::new(LogicKind::Or, true);

    pub const fn new(kind: LogicKind, not: bool) -> Self {
        LogicType { kind, not }
    }

    pub fn kind(&self) -> LogicKind {
        self.kind
    }

    pub fn is_not(&self) -> bool {
        self.not
    }

    pub fn as_str(&self) -> &'static str {
        match (self.kind, self.not) {
            (LogicKind::And, false) => "and",
            (LogicKind::And, true) => "and not",
            (LogicKind::Or, false) => "or",
            (LogicKind::Or, true) => "or not",
        }
    }

    /// Combine two per-item results. Mirrors [`concat`](Self::concat).
    pub fn combine(&self, left: bool, right: bool) -> bool {
        match (self.kind, self.not) {
            (LogicKind::And, false) => left && right,
            (LogicKind::And, true) => left != right,
            (LogicKind::Or, false) => left || right,
            (LogicKind::Or, true) => left && !right,
        }
    }

    /// Merge two evaluated result sets.
    ///
    /// - `and`: intersection
    /// - `and not`: both one-sided differences, unioned
    /// - `or`: union
    /// - `or not`: `left` minus `right`
    ///
    /// Item identity is pointer identity; order follows `left`, then `right`.
    pub fn concat<T>(&self, left: Vec<Arc<T>>, right: Vec<Arc<T>>) -> Vec<Arc<T>> {
        match (self.kind, self.not) {
            (LogicKind::And, false) => {
                let right_ids = id_set(&right);
                left.into_iter()
                    .filter(|item| right_ids.contains(&item_id(item)))
                    .collect()
            }
            (LogicKind::And, true) => {
                let left_ids = id_set(&left);
                let right_ids = id_set(&right);
                let mut result: Vec<Arc<T>> = left
                    .into_iter()
                    .filter(|item| !right_ids.contains(&item_id(item)))
                    .collect();
                result.extend(
                    right
                        .into_iter()
                        .filter(|item| !left_ids.contains(&item_id(item))),
                );
                result
            }
            (LogicKind::Or, false) => {
                let mut seen = id_set(&left);
                let mut result = left;
                for item in right {
                    if seen.insert(item_id(&item)) {
                        result.push(item);
                    }
                }
                result
            }
            (LogicKind::Or, true) => {
                let right_ids = id_set(&right);
                left.into_iter()
                    .filter(|item| !right_ids.contains(&item_id(item)))
                    .collect()
            }
        }
    }
}

impl Default for LogicType {
    fn default() -> Self {
        LogicType::AND
    }
}

impl fmt::Display for LogicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicType {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "and" | "&&" => Ok(LogicType::AND),
            "and not" => Ok(LogicType::AND_NOT),
            "or" | "||" => Ok(LogicType::OR),
            "or not" => Ok(LogicType::OR_NOT),
            _ => Err(SieveError::invalid_argument(
                "logic",
                format!("unknown connective {:?}", s),
            )),
        }
    }
}

/// Identity of a shared item.
pub(crate) fn item_id<T>(item: &Arc<T>) -> usize {
    Arc::as_ptr(item) as *const () as usize
}

pub(crate) fn id_set<T>(items: &[Arc<T>]) -> HashSet<usize> {
    items.iter().map(item_id).collect()
}
