use super::document::{Document, get_path};
use super::filter::Filter;
use super::value::{compare_values, render};
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// Filter plus cursor modifiers (`sort`, `skip`, `limit`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default)]
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order,
        });
        self
    }

    /// Parse a sort document such as `{"orderDate": -1}`.
    pub fn sort_document(mut self, sort: &Document) -> Result<Self> {
        for (field, direction) in sort {
            let order = match direction.as_i64() {
                Some(1) => SortOrder::Ascending,
                Some(-1) => SortOrder::Descending,
                _ => {
                    return Err(DbError::InvalidFilter(format!(
                        "sort direction for '{}' must be 1 or -1, got {}",
                        field,
                        render(direction)
                    )));
                }
            };
            self = self.sort_by(field.clone(), order);
        }
        Ok(self)
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply sort, skip and limit to already-filtered documents.
    pub fn finish(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare(a, b));
        }
        let iter = docs.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.sort {
            let left = get_path(a, &key.field).unwrap_or(&NULL);
            let right = get_path(b, &key.field).unwrap_or(&NULL);
            let ord = match key.order {
                SortOrder::Ascending => compare_values(left, right),
                SortOrder::Descending => compare_values(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl From<Filter> for FindOptions {
    fn from(filter: Filter) -> Self {
        Self::new(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::document;
    use serde_json::json;

    fn orders() -> Vec<Document> {
        vec![
            document(json!({"_id": 1, "orderDate": {"$date": "2023-02-01"}})).unwrap(),
            document(json!({"_id": 2, "orderDate": {"$date": "2023-05-01"}})).unwrap(),
            document(json!({"_id": 3})).unwrap(),
            document(json!({"_id": 4, "orderDate": {"$date": "2023-03-01"}})).unwrap(),
        ]
    }

    fn ids(docs: &[Document]) -> Vec<i64> {
        docs.iter().map(|d| d["_id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_sort_descending_puts_missing_last() {
        let opts = FindOptions::default()
            .sort_document(&document(json!({"orderDate": -1})).unwrap())
            .unwrap();
        assert_eq!(ids(&opts.finish(orders())), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_skip_and_limit() {
        let opts = FindOptions::default()
            .sort_by("_id", SortOrder::Ascending)
            .skip(1)
            .limit(2);
        assert_eq!(ids(&opts.finish(orders())), vec![2, 3]);
    }

    #[test]
    fn test_invalid_sort_direction() {
        let sort = document(json!({"orderDate": "desc"})).unwrap();
        assert!(FindOptions::default().sort_document(&sort).is_err());
    }
}
