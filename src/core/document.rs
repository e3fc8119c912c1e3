//! Document representation and dotted-path access.
//!
//! Documents are plain JSON objects. Field order is preserved so that
//! documents read back the way they were written.

use super::value::render;
use crate::core::{DbError, Result};
use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Convert a JSON value into a document, rejecting non-objects.
pub fn document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DbError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            render(&other)
        ))),
    }
}

/// Canonical string key for an `_id` value.
///
/// Numbers equal by magnitude share a key, so `1` and `1.0` name the same
/// document.
pub fn id_key(id: &Value) -> String {
    render(&normalize_numbers(id))
}

fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_numbers(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

pub fn document_id(doc: &Document) -> Option<&Value> {
    doc.get(ID_FIELD)
}

/// Resolve a dotted path such as `address.city` or `items.0.sku`.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<()> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let target = match parent {
        None => doc,
        Some(parent) => object_at_mut(doc, parent)?,
    };
    target.insert(leaf.to_string(), value);
    Ok(())
}

/// Remove a dotted path. Returns the removed value, if any.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parent, leaf)) => {
            let mut current = doc;
            for segment in parent.split('.') {
                current = current.get_mut(segment)?.as_object_mut()?;
            }
            current.remove(leaf)
        }
    }
}

fn object_at_mut<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Document> {
    let mut current = doc;
    for segment in path.split('.') {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = slot.as_object_mut().ok_or_else(|| {
            DbError::InvalidUpdate(format!(
                "cannot create field in '{}': element is not an object",
                segment
            ))
        })?;
    }
    Ok(current)
}
