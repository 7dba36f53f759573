//! JSON pointers with a `*` wildcard segment, and the id extractor built on them

use harvester_core::{ExtractionError, IdExtractor, Payload, ResolvedId};
use serde_json::Value;

/// All values matching `pointer`. A `*` segment fans out over every array
/// element (or object value); other segments follow RFC 6901.
pub fn select<'a>(value: &'a Value, pointer: &str) -> Vec<&'a Value> {
    if pointer.is_empty() {
        return vec![value];
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Vec::new();
    };
    let mut current = vec![value];
    for segment in rest.split('/') {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        current = current
            .into_iter()
            .flat_map(|v| step(v, &segment))
            .collect();
    }
    current
}

fn step<'a>(value: &'a Value, segment: &str) -> Vec<&'a Value> {
    match (segment, value) {
        ("*", Value::Array(items)) => items.iter().collect(),
        ("*", Value::Object(map)) => map.values().collect(),
        (key, Value::Object(map)) => map.get(key).into_iter().collect(),
        (idx, Value::Array(items)) => idx
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

/// Scalar rendered as a plain string (no quotes); `None` for null, arrays, objects
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Pulls resolved identifiers out of JSON payloads at a pointer
#[derive(Debug, Clone)]
pub struct JsonPointerExtractor {
    pointer: String,
}

impl JsonPointerExtractor {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl IdExtractor for JsonPointerExtractor {
    fn extract(&self, payload: &Payload) -> Result<Vec<ResolvedId>, ExtractionError> {
        let value = payload.as_json().ok_or_else(|| ExtractionError::Malformed {
            field: self.pointer.clone(),
            reason: "response is not JSON".into(),
        })?;
        let mut ids: Vec<ResolvedId> = select(value, &self.pointer)
            .into_iter()
            .filter_map(scalar_string)
            .filter(|s| !s.trim().is_empty())
            .map(ResolvedId)
            .collect();
        if ids.is_empty() {
            return Err(ExtractionError::MissingField(self.pointer.clone()));
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
