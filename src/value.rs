use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Partial patch for one category: string keys to values.
pub type Payload = BTreeMap<String, Value>;

/// Category name to payload, the unit handed to the bulk channel in one flush.
pub type Batch = BTreeMap<String, Payload>;

/// Value domain carried across the bridge.
///
/// `NumericBuffer` and `Path` only exist on the producer side; sanitization turns them into
/// `List` and `Text` before anything reaches the scene surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Map(Payload),
    NumericBuffer(Vec<f64>),
    Path(PathBuf),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::NumericBuffer(_) => "numeric_buffer",
            Value::Path(_) => "path",
        }
    }

    pub fn as_map(&self) -> Option<&Payload> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<Payload> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                serde_json::Number::from_f64(*n).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => payload_to_json(map),
            Value::NumericBuffer(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|n| {
                        serde_json::Number::from_f64(*n)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null)
                    })
                    .collect(),
            ),
            Value::Path(path) => serde_json::Value::String(path.display().to_string()),
        }
    }
}

pub fn payload_to_json(payload: &Payload) -> serde_json::Value {
    serde_json::Value::Object(payload.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Deep merge `patch` into `target`.
///
/// Nested maps on both sides merge recursively; anything else is last-write-wins at the leaf.
/// Keys already in `target` are never removed.
pub fn merge_payload(target: &mut Payload, patch: Payload) {
    for (key, incoming) in patch {
        match (target.get_mut(&key), incoming) {
            (Some(Value::Map(existing)), Value::Map(nested)) => merge_payload(existing, nested),
            (_, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

/// Returns `a` merged with `b` without touching either input.
pub fn merged(a: &Payload, b: &Payload) -> Payload {
    let mut out = a.clone();
    merge_payload(&mut out, b.clone());
    out
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::Path(value)
    }
}

impl From<Payload> for Value {
    fn from(value: Payload) -> Self {
        Value::Map(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<[f32; 3]> for Value {
    fn from(value: [f32; 3]) -> Self {
        Value::NumericBuffer(value.iter().map(|v| *v as f64).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Builds a payload from `(key, value)` pairs.
pub fn payload<I, K, V>(entries: I) -> Payload
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Parses a JSON object into a payload. Non-object JSON yields `None`.
pub fn payload_from_json(value: serde_json::Value) -> Option<Payload> {
    Value::from(value).into_map()
}
