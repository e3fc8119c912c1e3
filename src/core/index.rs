use super::document::{Document, get_path};
use super::value::{IndexKey, render};
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
}

impl IndexDirection {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if s == "text" => Ok(IndexDirection::Text),
            Value::Number(n) if n.as_f64() == Some(1.0) => Ok(IndexDirection::Ascending),
            Value::Number(n) if n.as_f64() == Some(-1.0) => Ok(IndexDirection::Descending),
            other => Err(DbError::IndexConflict(format!(
                "unsupported index key type {}",
                render(other)
            ))),
        }
    }
}

impl fmt::Display for IndexDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexDirection::Ascending => write!(f, "1"),
            IndexDirection::Descending => write!(f, "-1"),
            IndexDirection::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub field: String,
    pub direction: IndexDirection,
}

/// Index definition: single-field, compound, or text.
///
/// # Examples
///
/// ```
/// use docrunner::core::IndexSpec;
///
/// let email = IndexSpec::ascending("email").unique();
/// assert_eq!(email.name(), "email_1");
///
/// let orders = IndexSpec::compound([("customerId", 1), ("orderDate", -1)]);
/// assert_eq!(orders.name(), "customerId_1_orderDate_-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::single(field, IndexDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::single(field, IndexDirection::Descending)
    }

    pub fn text(field: impl Into<String>) -> Self {
        Self::single(field, IndexDirection::Text)
    }

    /// Compound index from `(field, 1 | -1)` pairs.
    pub fn compound<'a>(fields: impl IntoIterator<Item = (&'a str, i32)>) -> Self {
        let keys = fields
            .into_iter()
            .map(|(field, dir)| IndexField {
                field: field.to_string(),
                direction: if dir < 0 {
                    IndexDirection::Descending
                } else {
                    IndexDirection::Ascending
                },
            })
            .collect();
        Self {
            keys,
            name: None,
            unique: false,
        }
    }

    fn single(field: impl Into<String>, direction: IndexDirection) -> Self {
        Self {
            keys: vec![IndexField {
                field: field.into(),
                direction,
            }],
            name: None,
            unique: false,
        }
    }

    /// Parse a key pattern such as `{"customerId": 1, "orderDate": -1}`.
    pub fn from_document(keys: &Document) -> Result<Self> {
        if keys.is_empty() {
            return Err(DbError::IndexConflict("index key pattern is empty".into()));
        }
        let keys = keys
            .iter()
            .map(|(field, dir)| {
                Ok(IndexField {
                    field: field.clone(),
                    direction: IndexDirection::from_value(dir)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            keys,
            name: None,
            unique: false,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Explicit name, or the conventional `field_1_other_-1` form.
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|k| format!("{}_{}", k.field, k.direction))
                .collect::<Vec<_>>()
                .join("_")
        })
    }

    pub fn is_text(&self) -> bool {
        self.keys.iter().any(|k| k.direction == IndexDirection::Text)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.field.as_str())
    }

    /// Same keys and options, ignoring the name.
    pub fn same_definition(&self, other: &IndexSpec) -> bool {
        self.keys == other.keys && self.unique == other.unique
    }

    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(DbError::IndexConflict("index key pattern is empty".into()));
        }
        if self.is_text() && self.unique {
            return Err(DbError::IndexConflict("text indexes cannot be unique".into()));
        }
        let mut seen = BTreeSet::new();
        for key in &self.keys {
            if key.field.is_empty() || key.field.starts_with('$') {
                return Err(DbError::IndexConflict(format!(
                    "invalid index field '{}'",
                    key.field
                )));
            }
            if !seen.insert(key.field.as_str()) {
                return Err(DbError::IndexConflict(format!(
                    "field '{}' appears twice in index key",
                    key.field
                )));
            }
        }
        Ok(())
    }

    /// Composite key of `doc` for an ordered index (missing fields index as null).
    pub fn key_for(&self, doc: &Document) -> IndexKey {
        IndexKey(
            self.keys
                .iter()
                .map(|k| get_path(doc, &k.field).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Distinct search terms of every text-indexed field in `doc`.
    pub fn terms_for(&self, doc: &Document) -> BTreeSet<String> {
        self.keys
            .iter()
            .filter(|k| k.direction == IndexDirection::Text)
            .filter_map(|k| get_path(doc, &k.field))
            .flat_map(|value| match value {
                Value::String(s) => tokenize(s),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .flat_map(tokenize)
                    .collect(),
                _ => BTreeSet::new(),
            })
            .collect()
    }
}

lazy_static::lazy_static! {
    static ref WORD: regex::Regex = regex::Regex::new(r"\w+").expect("static word pattern");
}

/// Lowercased word tokens; `\w` is Unicode-aware so Hangul and CJK text split on spaces.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}
