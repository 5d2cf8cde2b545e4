//! Validate tool input against a JSON Schema before execution.

use serde_json::Value;

use super::types::InputSchema;

/// Validate a tool input value against a schema.
///
/// Checks the schema `type`, required fields, per-property types, `enum`
/// membership, array item types, and recurses into nested object
/// properties. Returns `Err(message)` describing the first violation found.
pub fn validate_input(input: &Value, schema: &InputSchema) -> Result<(), String> {
    validate_value(input, &schema.schema, None)
}

fn validate_value(value: &Value, schema: &Value, field: Option<&str>) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(|v| v.as_str()) {
        if !value_matches_type(value, expected) {
            return Err(match field {
                Some(name) => format!(
                    "field '{name}' expected type '{expected}', got {}",
                    json_type_name(value)
                ),
                None => format!("expected {expected} input, got {}", json_type_name(value)),
            });
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            let label = field.unwrap_or("input");
            return Err(format!("{label} must be one of {}", Value::Array(allowed.clone())));
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for (index, item) in array.iter().enumerate() {
            let name = match field {
                Some(parent) => format!("{parent}[{index}]"),
                None => format!("[{index}]"),
            };
            validate_value(item, items, Some(&name))?;
        }
    }

    let Some(obj) = value.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{}'", qualified(field, name)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            if let Some(prop_schema) = properties.get(key) {
                validate_value(value, prop_schema, Some(&qualified(field, key)))?;
            }
        }
    }

    Ok(())
}

fn qualified(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}.{name}"),
        None => name.to_string(),
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
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
