use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use std::cmp::Ordering;

/// Field name of the extended-JSON date wrapper: `{"$date": "2023-01-01T00:00:00Z"}`
pub const DATE_KEY: &str = "$date";

/// Cross-type ordering buckets.
///
/// Values of different classes never satisfy a range predicate, but they still
/// need a total order for sorting and index keys:
/// ```text
/// Null < Number < String < Object < Array < Bool < Date
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeClass {
    Null,
    Number,
    String,
    Object,
    Array,
    Bool,
    Date,
}

impl TypeClass {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => TypeClass::Null,
            Value::Number(_) => TypeClass::Number,
            Value::String(_) => TypeClass::String,
            Value::Bool(_) => TypeClass::Bool,
            Value::Array(_) => TypeClass::Array,
            Value::Object(_) if is_date(value) => TypeClass::Date,
            Value::Object(_) => TypeClass::Object,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeClass::Null => "null",
            TypeClass::Number => "number",
            TypeClass::String => "string",
            TypeClass::Object => "object",
            TypeClass::Array => "array",
            TypeClass::Bool => "bool",
            TypeClass::Date => "date",
        }
    }
}

/// Wrap a timestamp in the extended-JSON date form.
pub fn date_value(at: DateTime<Utc>) -> Value {
    json!({ DATE_KEY: at.to_rfc3339() })
}

pub fn is_date(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.contains_key(DATE_KEY),
        _ => false,
    }
}

/// Milliseconds since the epoch for a `{"$date": ...}` value.
///
/// Accepts RFC 3339 strings, bare `YYYY-MM-DD` dates (midnight UTC) and
/// integer milliseconds.
pub fn date_millis(value: &Value) -> Option<i64> {
    let Value::Object(map) = value else {
        return None;
    };
    match map.get(DATE_KEY)? {
        Value::String(raw) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.timestamp_millis());
            }
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis())
        }
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Total order over JSON values, numbers compared by magnitude regardless of
/// integer/float representation.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (class_a, class_b) = (TypeClass::of(a), TypeClass::of(b));
    if class_a != class_b {
        return class_a.cmp(&class_b);
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ if class_a == TypeClass::Date => match (date_millis(a), date_millis(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.to_string().cmp(&b.to_string()),
        },
        (Value::Object(x), Value::Object(y)) => {
            for ((key_x, val_x), (key_y, val_y)) in x.iter().zip(y.iter()) {
                let ord = key_x.cmp(key_y).then_with(|| compare_values(val_x, val_y));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    let a = x.as_f64().unwrap_or(f64::NAN);
    let b = y.as_f64().unwrap_or(f64::NAN);
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Compact rendering used in duplicate-key messages and id keys.
pub fn render(value: &Value) -> String {
    value.to_string()
}

/// Ordered composite key stored in secondary indexes.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    pub fn starts_with(&self, prefix: &[Value]) -> bool {
        prefix.len() <= self.0.len()
            && self.0.iter().zip(prefix.iter()).all(|(a, b)| values_equal(a, b))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = compare_values(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}
