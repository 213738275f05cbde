//! Tool argument validation against `inputSchema`

use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::Arc;

/// Most violations reported in one message
const MAX_REPORTED: usize = 3;

/// Validates tool arguments before a handler sees them
pub trait SchemaValidator: Send + Sync {
    /// Return the arguments to hand to the tool (possibly with defaults
    /// filled in), or a human-readable reason they were rejected.
    fn validate(&self, arguments: Value, schema: &Value) -> Result<Value, String>;
}

/// JSON Schema validator with a compiled-schema cache
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: DashMap<String, Arc<JSONSchema>>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, schema: &Value) -> Result<Arc<JSONSchema>, String> {
        let key = schema.to_string();
        if let Some(compiled) = self.compiled.get(&key) {
            return Ok(Arc::clone(compiled.value()));
        }
        let compiled = JSONSchema::compile(schema)
            .map(Arc::new)
            .map_err(|e| format!("tool schema is invalid: {}", e))?;
        self.compiled.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, arguments: Value, schema: &Value) -> Result<Value, String> {
        let arguments = apply_defaults(arguments, schema);
        let compiled = self.compile(schema)?;

        if let Err(errors) = compiled.validate(&arguments) {
            let messages: Vec<String> = errors
                .take(MAX_REPORTED)
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(arguments)
    }
}

/// Fill absent top-level properties from their schema `default`
fn apply_defaults(arguments: Value, schema: &Value) -> Value {
    let Value::Object(mut args) = arguments else {
        return arguments;
    };
    if let Some(Value::Object(properties)) = schema.get("properties") {
        for (name, property) in properties {
            if args.contains_key(name) {
                continue;
            }
            if let Some(default) = property.get("default") {
                args.insert(name.clone(), default.clone());
            }
        }
    }
    Value::Object(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "repeat": {"type": "integer", "minimum": 1, "default": 1}
            },
            "required": ["message"]
        })
    }

    #[test]
    fn test_valid_arguments_get_defaults() {
        let validator = JsonSchemaValidator::new();
        let args = validator.validate(json!({"message": "hi"}), &echo_schema()).unwrap();
        assert_eq!(args, json!({"message": "hi", "repeat": 1}));
    }

    #[test]
    fn test_missing_required_field() {
        let validator = JsonSchemaValidator::new();
        let err = validator.validate(json!({}), &echo_schema()).unwrap_err();
        assert!(err.contains("message"), "unexpected message: {}", err);
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let validator = JsonSchemaValidator::new();
        let err = validator
            .validate(json!({"message": "hi", "repeat": "twice"}), &echo_schema())
            .unwrap_err();
        assert!(err.contains("/repeat"), "unexpected message: {}", err);
    }

    #[test]
    fn test_schema_is_cached() {
        let validator = JsonSchemaValidator::new();
        validator.validate(json!({"message": "a"}), &echo_schema()).unwrap();
        validator.validate(json!({"message": "b"}), &echo_schema()).unwrap();
        assert_eq!(validator.compiled.len(), 1);
    }
}
