//! Turning a parsed model reply into per-record field values.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use tierfill_types::FieldConfig;

use crate::checkpoint::FieldValues;
use crate::prompts::PromptTemplate;

/// Split a batch reply into one answer object per record id.
///
/// Accepts either an object keyed by id or an array of objects that carry
/// an `id` member. Entries that are not objects are skipped.
pub fn index_reply(reply: Value) -> Result<BTreeMap<String, Map<String, Value>>, String> {
    let mut out = BTreeMap::new();
    match reply {
        Value::Object(map) => {
            for (id, answer) in map {
                if let Value::Object(answer) = answer {
                    out.insert(id, answer);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let Value::Object(answer) = item else {
                    continue;
                };
                let id = match answer.get("id") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                out.insert(id, answer);
            }
        }
        other => {
            return Err(format!(
                "expected a JSON object or array, got {}",
                json_type_name(&other)
            ));
        }
    }
    Ok(out)
}

/// Extract the configured fields from one record's answer.
///
/// Values are stored under their output path. Enum-constrained values are
/// matched case-insensitively and rewritten to the configured spelling;
/// arrays keep only their valid members. Unknown or invalid values are
/// dropped. Returns `Err` naming the field when a required one is absent
/// or invalid.
pub fn route_answer(
    template: &PromptTemplate,
    fields: &[(&str, &FieldConfig)],
    answer: &Map<String, Value>,
) -> Result<FieldValues, String> {
    let mut routed = FieldValues::new();
    for (path, field) in fields {
        let key = template.reply_key_for(path);
        let raw = answer
            .get(key)
            .or_else(|| answer.get(*path))
            .filter(|v| !v.is_null());

        let value = match (raw, &field.allowed_values) {
            (None, _) => None,
            (Some(v), None) => Some(v.clone()),
            (Some(v), Some(allowed)) => constrain(v, allowed),
        };

        match value {
            Some(v) => {
                routed.insert((*path).to_string(), v);
            }
            None if field.required => {
                return Err(match raw {
                    None => format!("missing required field \"{key}\""),
                    Some(_) => format!("invalid value for required field \"{key}\""),
                });
            }
            None => {}
        }
    }
    Ok(routed)
}

fn constrain(value: &Value, allowed: &[String]) -> Option<Value> {
    match value {
        Value::String(s) => normalize(s, allowed).map(Value::String),
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter_map(|item| item.as_str())
                .filter_map(|s| normalize(s, allowed))
                .map(Value::String)
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Array(kept))
            }
        }
        _ => None,
    }
}

fn normalize(candidate: &str, allowed: &[String]) -> Option<String> {
    let candidate = candidate.trim();
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(candidate))
        .cloned()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Expand dotted output paths into nested objects.
///
/// `{"a.b": 1, "a.c": 2, "d": 3}` becomes `{"a": {"b": 1, "c": 2}, "d": 3}`.
/// When a path needs an object where a scalar already sits, the object wins.
pub fn nest_fields(flat: &BTreeMap<String, Value>) -> Value {
    let mut root = Map::new();
    for (path, value) in flat {
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        let mut node = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                // Keep a nested object already built by a longer path.
                let occupied_by_object = matches!(node.get(segment), Some(Value::Object(_)));
                if !occupied_by_object {
                    node.insert(segment.to_string(), value.clone());
                }
                break;
            }
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            let Value::Object(next) = child else {
                break;
            };
            node = next;
        }
    }
    Value::Object(root)
}
