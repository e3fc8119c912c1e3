//! Query filters.
//!
//! A filter is a JSON object mapping dotted field paths to either a literal
//! (equality) or an operator object:
//!
//! ```text
//! { "customerId": 12345, "orderDate": { "$gte": { "$date": "2023-01-01" } } }
//! { "$or": [ { "status": "open" }, { "priority": { "$gt": 3 } } ] }
//! { "$text": { "$search": "고급 전자제품" } }
//! ```
//!
//! `$text` is resolved by the store against a text index; [`Filter::matches`]
//! only evaluates the remaining clauses.

use super::document::{Document, ID_FIELD, get_path};
use super::value::{TypeClass, compare_values, is_date, render, values_equal};
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub const TEXT_OPERATOR: &str = "$text";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DbError::InvalidFilter(format!(
                "filter must be an object, got {}",
                render(&other)
            ))),
        }
    }

    /// Single-field equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        let mut doc = Document::new();
        doc.insert(field.into(), value);
        Self(doc)
    }

    pub fn by_id(id: Value) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Search string of a top-level `$text` clause.
    pub fn text_search(&self) -> Result<Option<&str>> {
        let Some(clause) = self.0.get(TEXT_OPERATOR) else {
            return Ok(None);
        };
        clause
            .get("$search")
            .and_then(Value::as_str)
            .map(Some)
            .ok_or_else(|| DbError::InvalidFilter("$text requires a string $search".into()))
    }

    /// Top-level fields constrained to a single value, used for index selection.
    pub fn equality_fields(&self) -> Vec<(&str, &Value)> {
        self.0
            .iter()
            .filter(|(field, _)| !field.starts_with('$'))
            .filter_map(|(field, condition)| match condition {
                Value::Object(ops) if is_operator_object(condition) => ops
                    .get("$eq")
                    .filter(|_| ops.len() == 1)
                    .map(|value| (field.as_str(), value)),
                literal => Some((field.as_str(), literal)),
            })
            .collect()
    }

    pub fn id_equality(&self) -> Option<&Value> {
        self.equality_fields()
            .into_iter()
            .find(|(field, _)| *field == ID_FIELD)
            .map(|(_, value)| value)
            .filter(|value| !value.is_array())
    }

    /// Evaluate every clause except `$text` against `doc`.
    pub fn matches(&self, doc: &Document) -> Result<bool> {
        matches_clauses(&self.0, doc)
    }

    /// Reject malformed operators up front so errors surface even on empty collections.
    pub fn validate(&self) -> Result<()> {
        self.text_search()?;
        matches_clauses(&self.0, &Document::new()).map(|_| ())
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

fn matches_clauses(clauses: &Document, doc: &Document) -> Result<bool> {
    let mut result = true;
    for (key, condition) in clauses {
        let matched = match key.as_str() {
            TEXT_OPERATOR => true,
            "$and" => logical_parts(key, condition)?
                .iter()
                .try_fold(true, |acc, part| Ok::<_, DbError>(matches_clauses(part, doc)? && acc))?,
            "$or" => logical_parts(key, condition)?
                .iter()
                .try_fold(false, |acc, part| Ok::<_, DbError>(matches_clauses(part, doc)? || acc))?,
            "$nor" => !logical_parts(key, condition)?
                .iter()
                .try_fold(false, |acc, part| Ok::<_, DbError>(matches_clauses(part, doc)? || acc))?,
            op if op.starts_with('$') => {
                return Err(DbError::InvalidFilter(format!("unknown top-level operator {}", op)));
            }
            field => matches_field(get_path(doc, field), condition)?,
        };
        result = result && matched;
    }
    Ok(result)
}

fn logical_parts<'a>(op: &str, condition: &'a Value) -> Result<Vec<&'a Document>> {
    let parts = condition
        .as_array()
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| DbError::InvalidFilter(format!("{} requires a non-empty array", op)))?;
    parts
        .iter()
        .map(|part| {
            part.as_object()
                .ok_or_else(|| DbError::InvalidFilter(format!("{} entries must be objects", op)))
        })
        .collect()
}

fn is_operator_object(condition: &Value) -> bool {
    match condition {
        Value::Object(map) => {
            !map.is_empty() && !is_date(condition) && map.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

fn matches_field(actual: Option<&Value>, condition: &Value) -> Result<bool> {
    let Value::Object(ops) = condition else {
        return Ok(equals(actual, condition));
    };
    if !is_operator_object(condition) {
        return Ok(equals(actual, condition));
    }

    let mut result = true;
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => compares(actual, operand, |o| o == Ordering::Greater),
            "$gte" => compares(actual, operand, |o| o != Ordering::Less),
            "$lt" => compares(actual, operand, |o| o == Ordering::Less),
            "$lte" => compares(actual, operand, |o| o != Ordering::Greater),
            "$in" => in_list(actual, operand, op)?,
            "$nin" => !in_list(actual, operand, op)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    DbError::InvalidFilter("$exists requires a boolean".into())
                })?;
                actual.is_some() == wanted
            }
            other => {
                return Err(DbError::InvalidFilter(format!("unknown operator {}", other)));
            }
        };
        result = result && matched;
    }
    Ok(result)
}

/// Equality with array membership: `{tags: "vip"}` matches `tags: ["vip", ...]`.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

/// Range comparison restricted to values of the same type class.
fn compares(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let class = TypeClass::of(operand);
    let check = |value: &Value| TypeClass::of(value) == class && accept(compare_values(value, operand));
    match actual {
        None => false,
        Some(Value::Array(items)) if class != TypeClass::Array => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn in_list(actual: Option<&Value>, operand: &Value, op: &str) -> Result<bool> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| DbError::InvalidFilter(format!("{} requires an array", op)))?;
    Ok(candidates.iter().any(|candidate| equals(actual, candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::document;
    use serde_json::json;

    fn filter(value: Value) -> Filter {
        Filter::from_value(value).unwrap()
    }

    fn order() -> Document {
        document(json!({
            "_id": 7,
            "customerId": 12345,
            "orderDate": {"$date": "2023-03-10T09:00:00Z"},
            "total": 99.5,
            "tags": ["gift", "express"],
            "shipping": {"country": "KR"}
        }))
        .unwrap()
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        let doc = order();
        assert!(filter(json!({"customerId": 12345})).matches(&doc).unwrap());
        assert!(filter(json!({"shipping.country": "KR"})).matches(&doc).unwrap());
        assert!(filter(json!({"tags": "gift"})).matches(&doc).unwrap());
        assert!(!filter(json!({"customerId": 1})).matches(&doc).unwrap());
        assert!(filter(json!({"missing": null})).matches(&doc).unwrap());
    }

    #[test]
    fn test_date_range() {
        let doc = order();
        assert!(filter(json!({"orderDate": {"$gte": {"$date": "2023-01-01"}}})).matches(&doc).unwrap());
        assert!(!filter(json!({"orderDate": {"$lt": {"$date": "2023-01-01"}}})).matches(&doc).unwrap());
        // strings never satisfy a range against dates
        assert!(!filter(json!({"orderDate": {"$gte": "2023-01-01"}})).matches(&doc).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let doc = order();
        assert!(filter(json!({"total": {"$gt": 50, "$lte": 99.5}})).matches(&doc).unwrap());
        assert!(filter(json!({"total": {"$ne": 10}})).matches(&doc).unwrap());
        assert!(filter(json!({"customerId": {"$in": [1, 12345]}})).matches(&doc).unwrap());
        assert!(filter(json!({"customerId": {"$nin": [1, 2]}})).matches(&doc).unwrap());
        assert!(filter(json!({"total": {"$exists": true}})).matches(&doc).unwrap());
        assert!(!filter(json!({"discount": {"$exists": true}})).matches(&doc).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = order();
        assert!(filter(json!({"$or": [{"total": 1}, {"customerId": 12345}]})).matches(&doc).unwrap());
        assert!(!filter(json!({"$and": [{"total": 99.5}, {"customerId": 1}]})).matches(&doc).unwrap());
        assert!(filter(json!({"$nor": [{"total": 1}]})).matches(&doc).unwrap());
    }

    #[test]
    fn test_invalid_operators() {
        let doc = order();
        assert!(filter(json!({"total": {"$between": [1, 2]}})).matches(&doc).is_err());
        assert!(filter(json!({"$where": "1"})).validate().is_err());
        assert!(filter(json!({"$or": []})).validate().is_err());
        assert!(Filter::from_value(json!([1])).is_err());
    }

    #[test]
    fn test_text_clause_is_skipped_by_matches() {
        let text = filter(json!({"$text": {"$search": "premium"}, "customerId": 12345}));
        assert_eq!(text.text_search().unwrap(), Some("premium"));
        assert!(text.matches(&order()).unwrap());
        assert!(filter(json!({"$text": {"$search": 3}})).text_search().is_err());
    }

    #[test]
    fn test_equality_fields_for_planning() {
        let f = filter(json!({
            "customerId": 12345,
            "orderDate": {"$gte": {"$date": "2023-01-01"}},
            "status": {"$eq": "open"}
        }));
        let fields: Vec<&str> = f.equality_fields().into_iter().map(|(k, _)| k).collect();
        assert_eq!(fields, vec!["customerId", "status"]);
        assert_eq!(Filter::by_id(json!(2)).id_equality(), Some(&json!(2)));
    }
}
