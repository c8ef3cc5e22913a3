use crate::value::{Batch, Payload, Value};

/// Normalizes producer values into transfer-safe primitives.
///
/// Buffers become plain lists, paths become strings, and every `snake_case` key gains a
/// `camelCase` twin so either convention can be read on the scene side. Explicit keys always
/// beat generated aliases.
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    alias_keys: bool,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self { alias_keys: true }
    }
}

impl Sanitizer {
    pub fn new(alias_keys: bool) -> Self {
        Self { alias_keys }
    }

    pub fn alias_keys(&self) -> bool {
        self.alias_keys
    }

    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Map(map) => Value::Map(self.sanitize_payload(map)),
            Value::List(items) => Value::List(items.iter().map(|item| self.sanitize(item)).collect()),
            Value::NumericBuffer(items) => Value::List(items.iter().copied().map(Value::Number).collect()),
            Value::Path(path) => Value::Text(path.to_string_lossy().into_owned()),
            other => other.clone(),
        }
    }

    pub fn sanitize_payload(&self, payload: &Payload) -> Payload {
        let mut out: Payload = payload.iter().map(|(key, value)| (key.clone(), self.sanitize(value))).collect();
        if !self.alias_keys {
            return out;
        }
        for key in payload.keys() {
            let Some(alias) = camel_alias(key) else {
                continue;
            };
            if out.contains_key(&alias) {
                continue;
            }
            if let Some(value) = out.get(key).cloned() {
                out.insert(alias, value);
            }
        }
        out
    }

    pub fn sanitize_batch(&self, batch: &Batch) -> Batch {
        batch.iter().map(|(category, payload)| (category.clone(), self.sanitize_payload(payload))).collect()
    }
}

pub fn sanitize(value: &Value) -> Value {
    Sanitizer::default().sanitize(value)
}

pub fn sanitize_payload(payload: &Payload) -> Payload {
    Sanitizer::default().sanitize_payload(payload)
}

/// `camelCase` form of a `snake_case` key, or `None` when the key has nothing to alias.
///
/// Keys with leading or trailing underscores are left alone; they are usually private markers.
pub fn camel_alias(key: &str) -> Option<String> {
    if !key.contains('_') || key.starts_with('_') || key.ends_with('_') {
        return None;
    }
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    if out == key {
        None
    } else {
        Some(out)
    }
}
