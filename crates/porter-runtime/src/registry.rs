//! Name-keyed tool dispatch with JSON-schema argument validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use porter_core::{Tool, ToolContext};
use serde_json::Value;
use tracing::debug;

/// The dispatch table handed to the agent loop. Registration rebuilds the
/// cached descriptor array; registering a tool under an existing name
/// replaces the prior one.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    definitions: Vec<Value>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
        self.rebuild_definitions();
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// The stable `{type: "function", ...}` descriptor array exposed to
    /// providers.
    pub fn definitions(&self) -> &[Value] {
        &self.definitions
    }

    /// Execute a tool call. Always yields text: lookup misses, validation
    /// failures, and execution errors all come back as `"Error..."` strings
    /// for the model to react to.
    pub async fn execute(&self, name: &str, args: &Value, ctx: &ToolContext) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: Tool '{name}' not found");
        };

        let violations = tool.validate(args);
        if !violations.is_empty() {
            return format!(
                "Error: Invalid parameters for tool '{name}': {}",
                violations.join("; ")
            );
        }

        debug!(tool = name, "executing tool");
        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(e) => format!("Error executing {name}: {e}"),
        }
    }

    fn rebuild_definitions(&mut self) {
        self.definitions = self.tools.values().map(|t| t.definition()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use porter_core::Result;
    use serde_json::json;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the input"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<String> {
            Err(porter_core::PorterError::Agent("disk on fire".into()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(UpperTool));
        r.register(Arc::new(FailingTool));
        r
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let out = registry()
            .execute("upper", &json!({"text": "ping"}), &ToolContext::default())
            .await;
        assert_eq!(out, "PING");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let out = registry()
            .execute("nope", &json!({}), &ToolContext::default())
            .await;
        assert_eq!(out, "Error: Tool 'nope' not found");
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let out = registry()
            .execute("upper", &json!({"text": 9}), &ToolContext::default())
            .await;
        assert_eq!(
            out,
            "Error: Invalid parameters for tool 'upper': parameter.text should be string"
        );
    }

    #[tokio::test]
    async fn test_execution_error_becomes_text() {
        let out = registry()
            .execute("broken", &json!({}), &ToolContext::default())
            .await;
        assert_eq!(out, "Error executing broken: agent error: disk on fire");
    }

    #[test]
    fn test_definitions_rebuilt_and_replacement() {
        let mut r = registry();
        assert_eq!(r.definitions().len(), 2);

        // Same name replaces the prior registration.
        r.register(Arc::new(UpperTool));
        assert_eq!(r.definitions().len(), 2);
        assert!(r
            .definitions()
            .iter()
            .any(|d| d["function"]["name"] == "upper"));
    }
}
