use super::document::{Document, ID_FIELD, get_path, remove_path, set_path};
use super::value::render;
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Update document built from `$set`, `$unset`, `$inc` and `$push` operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update(Document);

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let update = Self(map);
                update.validate()?;
                Ok(update)
            }
            other => Err(DbError::InvalidUpdate(format!(
                "update must be an object, got {}",
                render(&other)
            ))),
        }
    }

    pub fn set(self, field: impl Into<String>, value: Value) -> Self {
        self.with("$set", field.into(), value)
    }

    pub fn unset(self, field: impl Into<String>) -> Self {
        self.with("$unset", field.into(), Value::String(String::new()))
    }

    pub fn inc(self, field: impl Into<String>, amount: impl Into<Number>) -> Self {
        self.with("$inc", field.into(), Value::Number(amount.into()))
    }

    pub fn push(self, field: impl Into<String>, value: Value) -> Self {
        self.with("$push", field.into(), value)
    }

    fn with(mut self, op: &str, field: String, value: Value) -> Self {
        let section = self
            .0
            .entry(op.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if let Value::Object(fields) = section {
            fields.insert(field, value);
        }
        self
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(DbError::InvalidUpdate("update document is empty".into()));
        }
        for (op, fields) in &self.0 {
            if !matches!(op.as_str(), "$set" | "$unset" | "$inc" | "$push") {
                return Err(DbError::InvalidUpdate(format!(
                    "unsupported update operator '{}'",
                    op
                )));
            }
            let fields = fields.as_object().ok_or_else(|| {
                DbError::InvalidUpdate(format!("{} requires an object of fields", op))
            })?;
            for (field, operand) in fields {
                if field == ID_FIELD || field.starts_with("_id.") {
                    return Err(DbError::InvalidUpdate(
                        "the _id field is immutable".into(),
                    ));
                }
                if op == "$inc" && !operand.is_number() {
                    return Err(DbError::InvalidUpdate(format!(
                        "$inc amount for '{}' must be numeric",
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply to `doc` in place. Returns whether the document changed.
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        self.validate()?;
        let before = doc.clone();

        for (op, fields) in &self.0 {
            let Some(fields) = fields.as_object() else {
                continue;
            };
            for (field, operand) in fields {
                match op.as_str() {
                    "$set" => set_path(doc, field, operand.clone())?,
                    "$unset" => {
                        remove_path(doc, field);
                    }
                    "$inc" => {
                        let next = increment(get_path(doc, field), operand, field)?;
                        set_path(doc, field, next)?;
                    }
                    "$push" => {
                        let next = match get_path(doc, field) {
                            None => Value::Array(vec![operand.clone()]),
                            Some(Value::Array(items)) => {
                                let mut items = items.clone();
                                items.push(operand.clone());
                                Value::Array(items)
                            }
                            Some(_) => {
                                return Err(DbError::InvalidUpdate(format!(
                                    "cannot $push to non-array field '{}'",
                                    field
                                )));
                            }
                        };
                        set_path(doc, field, next)?;
                    }
                    _ => unreachable!("validated above"),
                }
            }
        }

        Ok(before != *doc)
    }
}

fn increment(current: Option<&Value>, amount: &Value, field: &str) -> Result<Value> {
    let Some(current) = current else {
        return Ok(amount.clone());
    };
    let (Value::Number(lhs), Value::Number(rhs)) = (current, amount) else {
        return Err(DbError::InvalidUpdate(format!(
            "cannot apply $inc to non-numeric field '{}'",
            field
        )));
    };

    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64())
        && let Some(sum) = a.checked_add(b)
    {
        return Ok(Value::Number(sum.into()));
    }

    let sum = lhs.as_f64().unwrap_or(0.0) + rhs.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| DbError::InvalidUpdate(format!("$inc on '{}' overflowed", field)))
}
