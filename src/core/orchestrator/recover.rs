use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::core::models::JsonMap;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").expect("fence regex"))
}

/// Strip a surrounding markdown code fence, leaving bare content untouched.
pub fn strip_code_fences(text: &str) -> String {
    match fence_regex().captures(text.trim()) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Pull a JSON object out of a model reply: plain parse first, then fenced
/// blocks, then the first balanced `{...}` span. Non-object JSON is wrapped
/// under a `data` key.
pub fn extract_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(wrap_non_object(value));
    }

    for caps in fence_regex().captures_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(wrap_non_object(value));
        }
    }

    if let Some(candidate) = balanced_span(text, '{', '}') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(wrap_non_object(value));
        }
    }
    if let Some(candidate) = balanced_span(text, '[', ']') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(wrap_non_object(value));
        }
    }

    None
}

fn wrap_non_object(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        let mut map = JsonMap::new();
        map.insert("data".to_string(), value);
        Value::Object(map)
    }
}

/// First balanced `open..close` span, tracking string literals so braces
/// inside quoted values do not break the depth count.
fn balanced_span(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Shape checks over a recovered object, in order: requested fields present
/// (missing ones backfilled as null), template keys honored at each nesting
/// level, primary-array elements field-consistent.
pub fn validate_shape(
    data: &mut Value,
    required_fields: &[String],
    template: Option<&Value>,
) -> Result<(), String> {
    backfill_missing_fields(data, required_fields);

    if let Some(template) = template {
        check_template(data, template, "")?;
        ensure_template_keys(data, template);
    }

    check_array_consistency(data)?;
    Ok(())
}

/// Every key present anywhere in the value (arrays sampled at their first
/// five elements, as the shaping contract describes).
fn collect_keys(value: &Value, keys: &mut HashSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                keys.insert(key.to_lowercase());
                collect_keys(nested, keys);
            }
        }
        Value::Array(items) => {
            for item in items.iter().take(5) {
                collect_keys(item, keys);
            }
        }
        _ => {}
    }
}

/// Missing requested fields become null keys instead of a hard failure:
/// on the record level when the object carries a primary array, otherwise
/// at the top level.
fn backfill_missing_fields(data: &mut Value, required_fields: &[String]) {
    if required_fields.is_empty() {
        return;
    }

    let mut present = HashSet::new();
    collect_keys(data, &mut present);
    let missing: Vec<&String> = required_fields
        .iter()
        .filter(|f| !present.contains(&f.to_lowercase()))
        .collect();
    if missing.is_empty() {
        return;
    }

    let records = primary_array_mut(data);
    match records {
        Some(items) => {
            for item in items.iter_mut() {
                if let Value::Object(record) = item {
                    for field in &missing {
                        record.entry(field.as_str()).or_insert(Value::Null);
                    }
                }
            }
        }
        None => {
            if let Value::Object(map) = data {
                for field in &missing {
                    map.entry(field.as_str()).or_insert(Value::Null);
                }
            }
        }
    }
}

/// Structural check against the user's template: objects must be objects,
/// arrays must be arrays, recursively. Keys absent from the output are
/// tolerated here and added by `ensure_template_keys`.
fn check_template(actual: &Value, expected: &Value, path: &str) -> Result<(), String> {
    match expected {
        Value::Object(expected_map) => {
            let actual_map = actual.as_object().ok_or_else(|| {
                format!(
                    "expected object at {}, got {}",
                    if path.is_empty() { "root" } else { path },
                    type_name(actual)
                )
            })?;
            for (key, expected_nested) in expected_map {
                if let Some(actual_nested) = actual_map.get(key) {
                    let nested_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    check_template(actual_nested, expected_nested, &nested_path)?;
                }
            }
            Ok(())
        }
        Value::Array(expected_items) => {
            let actual_items = actual.as_array().ok_or_else(|| {
                format!(
                    "expected array at {}, got {}",
                    if path.is_empty() { "root" } else { path },
                    type_name(actual)
                )
            })?;
            if let (Some(expected_first), Some(actual_first)) =
                (expected_items.first(), actual_items.first())
            {
                check_template(actual_first, expected_first, &format!("{path}[0]"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Guarantee the template's key set exists in the output (null where the
/// model found nothing), so callers can rely on the agreed shape.
fn ensure_template_keys(actual: &mut Value, expected: &Value) {
    if let (Value::Object(actual_map), Value::Object(expected_map)) = (&mut *actual, expected) {
        for (key, expected_nested) in expected_map {
            match actual_map.get_mut(key) {
                Some(actual_nested) => ensure_template_keys(actual_nested, expected_nested),
                None => {
                    actual_map.insert(key.clone(), Value::Null);
                }
            }
        }
    }
}

/// All object elements of the primary array must agree on their key set.
fn check_array_consistency(data: &Value) -> Result<(), String> {
    let Some((key, items)) = primary_array(data) else {
        return Ok(());
    };

    let mut expected: Option<HashSet<&str>> = None;
    for (index, item) in items.iter().enumerate() {
        let Value::Object(record) = item else {
            continue;
        };
        let keys: HashSet<&str> = record.keys().map(String::as_str).collect();
        match &expected {
            None => expected = Some(keys),
            Some(first) if *first != keys => {
                return Err(format!(
                    "inconsistent fields in '{key}': element {index} differs from element 0"
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The primary record array: the `data` key when it holds an array,
/// otherwise the first array-valued key.
pub fn primary_array(data: &Value) -> Option<(&str, &Vec<Value>)> {
    let map = data.as_object()?;
    if let Some(Value::Array(items)) = map.get("data") {
        return Some(("data", items));
    }
    map.iter()
        .find_map(|(k, v)| v.as_array().map(|items| (k.as_str(), items)))
}

fn primary_array_mut(data: &mut Value) -> Option<&mut Vec<Value>> {
    let map = data.as_object_mut()?;
    if map.get("data").map(|v| v.is_array()).unwrap_or(false) {
        return map.get_mut("data").and_then(Value::as_array_mut);
    }
    let key = map
        .iter()
        .find(|(_, v)| v.is_array())
        .map(|(k, _)| k.clone())?;
    map.get_mut(&key).and_then(Value::as_array_mut)
}

/// How many records the shaped output carries: the primary array's length,
/// or one for a single-object response.
pub fn records_parsed(data: &Value) -> usize {
    match primary_array(data) {
        Some((_, items)) => items.len(),
        None => 1,
    }
}

/// Field names of the first shaped record, falling back to the top-level keys.
pub fn fields_extracted(data: &Value) -> Vec<String> {
    if let Some((_, items)) = primary_array(data) {
        if let Some(Value::Object(first)) = items.first() {
            return first.keys().cloned().collect();
        }
    }
    data.as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}
