//! Argument validation against a tool's declared input schema.

use ferrule_core::tool::ToolDescriptor;
use serde_json::Value;
use tracing::warn;

/// A compiled input schema for one tool.
pub struct ArgumentValidator {
    tool: String,
    compiled: Result<jsonschema::Validator, String>,
}

impl ArgumentValidator {
    pub fn compile(descriptor: &ToolDescriptor) -> Self {
        let compiled = jsonschema::validator_for(&descriptor.input_schema).map_err(|e| {
            warn!(tool = %descriptor.name, error = %e, "Tool declares an invalid input schema");
            format!("invalid input schema: {e}")
        });
        Self {
            tool: descriptor.name.clone(),
            compiled,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Check `arguments`, reporting every violation in one message.
    ///
    /// `null` is read as an empty argument object.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let validator = self.compiled.as_ref().map_err(Clone::clone)?;
        let empty = Value::Object(Default::default());
        let instance = if arguments.is_null() { &empty } else { arguments };

        let violations: Vec<String> = validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("at {path}: {error}")
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }
}

impl std::fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentValidator")
            .field("tool", &self.tool)
            .field("valid_schema", &self.compiled.is_ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheet_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "createSheet",
            "Create a spreadsheet",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "rows": { "type": "array", "items": { "type": "array" } }
                },
                "required": ["title"]
            }),
            "gsuite",
        )
    }

    #[test]
    fn accepts_matching_arguments() {
        let v = ArgumentValidator::compile(&sheet_tool());
        assert!(v.validate(&json!({ "title": "F1 drivers", "rows": [[1, 2]] })).is_ok());
    }

    #[test]
    fn reports_missing_required_field() {
        let v = ArgumentValidator::compile(&sheet_tool());
        let err = v.validate(&json!({ "rows": [] })).unwrap_err();
        assert!(err.contains("title"), "{err}");
    }

    #[test]
    fn reports_type_mismatch_with_path() {
        let v = ArgumentValidator::compile(&sheet_tool());
        let err = v.validate(&json!({ "title": 7 })).unwrap_err();
        assert!(err.contains("/title"), "{err}");
    }

    #[test]
    fn null_arguments_are_an_empty_object() {
        let tool = ToolDescriptor::new("ping", "", json!({ "type": "object" }), "t");
        assert!(ArgumentValidator::compile(&tool).validate(&Value::Null).is_ok());
        assert!(ArgumentValidator::compile(&sheet_tool())
            .validate(&Value::Null)
            .is_err());
    }

    #[test]
    fn invalid_schema_rejects_every_call() {
        let tool = ToolDescriptor::new("odd", "", json!({ "type": 12 }), "t");
        let v = ArgumentValidator::compile(&tool);
        assert!(v.validate(&json!({})).unwrap_err().contains("invalid input schema"));
    }
}
