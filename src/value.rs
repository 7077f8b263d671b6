//! Tagged value tree for raw API records.
//!
//! Raw JSON is converted once into [`Value`] so field extraction works over
//! four variants instead of arbitrary JSON.

use std::collections::BTreeMap;
use std::fmt;

/// A leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Scalar(Scalar),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Direct child of a map; `None` for missing keys, nulls and non-maps
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// Empty lists and maps count as empty, as does `Null`
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Scalar(_) => false,
        }
    }

    /// Every scalar leaf under this value, depth first, rendered as text
    pub fn leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<String>) {
        match self {
            Value::Null => {}
            Value::Scalar(s) => out.push(s.to_string()),
            Value::List(items) => items.iter().for_each(|v| v.collect_leaves(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_leaves(out)),
        }
    }

    /// Single-cell text form used by CSV exports
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Scalar(s) => s.to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(";"),
            Value::Map(_) => serde_json::Value::from(self).to_string(),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Scalar(Scalar::Int(i)),
                None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Value::Scalar(Scalar::Str(s.clone())),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Value::Scalar(Scalar::Int(i)) => serde_json::Value::from(*i),
            Value::Scalar(Scalar::Float(x)) => serde_json::Value::from(*x),
            Value::Scalar(Scalar::Str(s)) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}
