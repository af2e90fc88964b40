use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Per-call context for tool execution. Captured by the agent at the start
/// of a turn and passed into every dispatch, so tools never hold rebindable
/// channel/chat state of their own.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Channel the active turn originated on.
    pub channel: String,
    /// Chat the active turn originated on.
    pub chat_id: String,
    /// Whether the user enabled screen capture for this turn (`--vision`).
    pub vision_enabled: bool,
}

impl ToolContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            vision_enabled: false,
        }
    }

    pub fn with_vision(mut self, enabled: bool) -> Self {
        self.vision_enabled = enabled;
        self
    }
}

/// A request from the LLM to call a tool. Ids are provider-assigned; the
/// provider synthesizes one when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The capability set every tool exposes: a unique name, a human
/// description for the model, a JSON-schema parameter declaration, and an
/// execution entry point returning a textual result.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema subset describing the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool. A returned `Err` is converted by the registry into an
    /// `"Error executing ..."` text for the model; tools may also return
    /// `Ok` text that starts with `"Error:"` for domain-level failures.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> crate::Result<String>;

    /// Validate arguments against [`Tool::parameters`].
    fn validate(&self, args: &Value) -> Vec<String> {
        crate::schema::validate(args, &self.parameters())
    }

    /// The `{type: "function", ...}` descriptor shape providers expect.
    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> crate::Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[test]
    fn test_definition_shape() {
        let def = EchoTool.definition();
        assert_eq!(def["type"], "function");
        assert_eq!(def["function"]["name"], "echo");
        assert!(def["function"]["parameters"]["properties"]["text"].is_object());
    }

    #[test]
    fn test_default_validate_uses_parameters() {
        assert!(EchoTool.validate(&json!({"text": "hi"})).is_empty());
        assert_eq!(
            EchoTool.validate(&json!({})),
            vec!["missing required parameter.text"]
        );
    }

    #[tokio::test]
    async fn test_execute() {
        let out = EchoTool
            .execute(&json!({"text": "hi"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }
}
