use crate::ToolError;
use serde_json::Value;

/// Checks a descriptor's input schema when its bundle is registered.
pub(crate) fn validate_schema_root(schema: &Value) -> Result<(), String> {
    let object = schema
        .as_object()
        .ok_or_else(|| "input schema must be a JSON object".to_string())?;
    if object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|schema_type| schema_type != "object")
    {
        return Err("input schema root type must be 'object'".to_string());
    }
    if let Some(properties) = object.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| "'properties' must be an object".to_string())?;
        for (key, property) in properties {
            if !property.is_object() {
                return Err(format!("property '{key}' must be described by an object"));
            }
        }
    }
    if let Some(required) = object.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| "'required' must be an array".to_string())?;
        if required.iter().any(|key| !key.is_string()) {
            return Err("'required' entries must be strings".to_string());
        }
    }
    Ok(())
}

pub(crate) fn validate_tool_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    if !arguments.is_object() {
        return Err(ToolError::Validation(
            "tool arguments must be a JSON object".to_string(),
        ));
    }
    if !schema.is_object() {
        return Err(ToolError::Validation(
            "tool schema root must be a JSON object".to_string(),
        ));
    }
    validate_object("", schema, arguments)
}

/// Argument path for error messages: `opts.k`, `tags[0]`.
fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn validate_object(path: &str, schema: &Value, value: &Value) -> Result<(), ToolError> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(ToolError::Validation(format!(
                    "missing required argument '{}'",
                    child_path(path, key)
                )));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional_allowed = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, field) in object {
        let field_path = child_path(path, key);
        match properties.and_then(|properties| properties.get(key)) {
            Some(property) => validate_value(&field_path, property, field)?,
            None if additional_allowed => {}
            None => {
                return Err(ToolError::Validation(format!(
                    "unexpected argument '{field_path}' not allowed by schema"
                )));
            }
        }
    }
    Ok(())
}

fn validate_value(path: &str, property: &Value, value: &Value) -> Result<(), ToolError> {
    if let Some(type_name) = property.get("type").and_then(Value::as_str) {
        let is_valid = match type_name {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };

        if !is_valid {
            return Err(ToolError::Validation(format!(
                "argument '{}' expected type '{}' but received '{}'",
                path,
                type_name,
                json_type_name(value)
            )));
        }
    }

    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(ToolError::Validation(format!(
                "argument '{}' must be one of {}",
                path,
                Value::Array(allowed.clone())
            )));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = property.get("minimum").and_then(Value::as_f64) {
            if number < minimum {
                return Err(ToolError::Validation(format!(
                    "argument '{path}' must be >= {minimum}"
                )));
            }
        }
        if let Some(maximum) = property.get("maximum").and_then(Value::as_f64) {
            if number > maximum {
                return Err(ToolError::Validation(format!(
                    "argument '{path}' must be <= {maximum}"
                )));
            }
        }
    }

    if let (Some(text), Some(min_length)) = (
        value.as_str(),
        property.get("minLength").and_then(Value::as_u64),
    ) {
        if (text.chars().count() as u64) < min_length {
            return Err(ToolError::Validation(format!(
                "argument '{path}' must be at least {min_length} characters"
            )));
        }
    }

    if let (Some(elements), Some(items)) = (value.as_array(), property.get("items")) {
        for (index, element) in elements.iter().enumerate() {
            validate_value(&format!("{path}[{index}]"), items, element)?;
        }
    }

    if value.is_object() {
        validate_object(path, property, value)?;
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    if value.is_null() {
        "null"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_string() {
        "string"
    } else if value.is_number() {
        "number"
    } else if value.is_array() {
        "array"
    } else {
        "object"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                "mode": { "type": "string", "enum": ["fast", "full"] }
            },
            "additionalProperties": false
        })
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let error = validate_tool_arguments(&schema(), &json!({})).expect_err("missing");
        assert_eq!(
            error,
            ToolError::Validation("missing required argument 'pattern'".to_string())
        );
    }

    #[test]
    fn wrong_type_and_unexpected_keys_are_rejected() {
        assert!(validate_tool_arguments(&schema(), &json!({ "pattern": 3 })).is_err());
        assert!(
            validate_tool_arguments(&schema(), &json!({ "pattern": "*", "extra": true }))
                .is_err()
        );
    }

    #[test]
    fn constraints_are_enforced() {
        assert!(validate_tool_arguments(&schema(), &json!({ "pattern": "" })).is_err());
        assert!(
            validate_tool_arguments(&schema(), &json!({ "pattern": "*", "limit": 0 })).is_err()
        );
        assert!(
            validate_tool_arguments(&schema(), &json!({ "pattern": "*", "mode": "slow" }))
                .is_err()
        );
        validate_tool_arguments(
            &schema(),
            &json!({ "pattern": "*", "limit": 10, "mode": "fast" }),
        )
        .expect("valid arguments should pass");
    }

    fn nested_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string", "minLength": 1 } },
                "opts": {
                    "type": "object",
                    "required": ["k"],
                    "properties": { "k": { "type": "integer" } },
                    "additionalProperties": false
                }
            }
        })
    }

    #[test]
    fn array_items_are_checked_with_their_index() {
        let error = validate_tool_arguments(&nested_schema(), &json!({ "tags": ["a", 3] }))
            .expect_err("non-string tag");
        assert_eq!(
            error,
            ToolError::Validation(
                "argument 'tags[1]' expected type 'string' but received 'number'".to_string()
            )
        );
        assert!(validate_tool_arguments(&nested_schema(), &json!({ "tags": [""] })).is_err());
        validate_tool_arguments(&nested_schema(), &json!({ "tags": ["a", "b"] }))
            .expect("string tags should pass");
    }

    #[test]
    fn nested_objects_are_checked_with_dotted_paths() {
        let error = validate_tool_arguments(&nested_schema(), &json!({ "opts": { "k": "x" } }))
            .expect_err("non-integer k");
        assert_eq!(
            error,
            ToolError::Validation(
                "argument 'opts.k' expected type 'integer' but received 'string'".to_string()
            )
        );
        let error = validate_tool_arguments(&nested_schema(), &json!({ "opts": {} }))
            .expect_err("missing k");
        assert_eq!(
            error,
            ToolError::Validation("missing required argument 'opts.k'".to_string())
        );
        assert!(
            validate_tool_arguments(&nested_schema(), &json!({ "opts": { "k": 1, "z": 2 } }))
                .is_err()
        );
        validate_tool_arguments(&nested_schema(), &json!({ "opts": { "k": 1 } }))
            .expect("valid nested object should pass");
    }

    #[test]
    fn schema_root_must_be_an_object_schema() {
        assert!(validate_schema_root(&json!({ "type": "object" })).is_ok());
        assert!(validate_schema_root(&json!({ "type": "string" })).is_err());
        assert!(validate_schema_root(&json!(["pattern"])).is_err());
        assert!(validate_schema_root(&json!({ "properties": { "a": 1 } })).is_err());
    }
}
