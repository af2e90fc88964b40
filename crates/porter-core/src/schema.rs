//! Recursive validation of tool arguments against the JSON-schema subset
//! tools declare: `type` in {object, array, string, integer, number,
//! boolean}, `properties`, `required`, `enum`, `items`, `minimum`,
//! `maximum`.

use serde_json::Value;

fn type_ok(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn validate_node(value: &Value, schema: &Value, label: &str, errors: &mut Vec<String>) {
    let type_name = schema.get("type").and_then(Value::as_str).unwrap_or("");
    if !type_name.is_empty() && !type_ok(value, type_name) {
        errors.push(format!("{label} should be {type_name}"));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.iter().any(|e| e == value) {
            errors.push(format!("{label} has invalid enum value"));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{label} is below minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{label} is above maximum {max}"));
            }
        }
    }

    if type_name == "object" {
        let empty = Value::Object(Default::default());
        let props = schema.get("properties").unwrap_or(&empty);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if value.get(key).is_none() {
                    errors.push(format!("missing required {label}.{key}"));
                }
            }
        }

        if let Some(map) = value.as_object() {
            for (key, child) in map {
                if let Some(child_schema) = props.get(key) {
                    validate_node(child, child_schema, &format!("{label}.{key}"), errors);
                }
            }
        }
    }

    if type_name == "array" {
        if let (Some(items), Some(list)) = (schema.get("items"), value.as_array()) {
            for (i, item) in list.iter().enumerate() {
                validate_node(item, items, &format!("{label}[{i}]"), errors);
            }
        }
    }
}

/// Validate `value` against `schema`. Returns human-readable violations,
/// empty when the arguments are acceptable.
pub fn validate(value: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_node(value, schema, "parameter", &mut errors);
    errors
}
