use async_trait::async_trait;
use porter_core::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the message array sent to the provider. Serializes directly
/// into the OpenAI chat-completions wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    fn bare(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            reasoning_content: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::bare(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::bare(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, content)
    }

    /// An assistant message carrying tool-call requests, shaped for the
    /// next provider round.
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: &[ToolCall],
        reasoning: Option<String>,
    ) -> Self {
        let mut msg = Self::bare(Role::Assistant, content);
        msg.tool_calls = tool_calls.iter().map(ToolCallPayload::from_call).collect();
        msg.reasoning_content = reasoning.filter(|r| !r.is_empty());
        msg
    }

    /// The result entry matching one tool call from the preceding
    /// assistant message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::bare(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }
}

/// Wire form of a tool call inside an assistant message. `arguments`
/// travels as a JSON-encoded string, matching the provider format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCallPayload {
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

/// A single provider invocation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// `{type: "function", ...}` descriptors from the tool registry.
    pub tools: Vec<Value>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

/// The provider's answer. Failures are folded in: `finish_reason` becomes
/// `"error"` and `content` carries the human-readable reason.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Value,
    pub reasoning_content: String,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "stop".to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            finish_reason: "error".to_string(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.finish_reason == "error"
    }
}

/// Trait implemented by each chat backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Model used when the request leaves `model` empty.
    fn default_model(&self) -> &str;

    /// Unary chat call.
    async fn chat(&self, request: &ChatRequest) -> LlmResponse;

    /// Streaming chat call. Content pieces are delivered through `on_delta`
    /// as they arrive; tool-call argument fragments are reassembled by index
    /// before the final response is returned. The default implementation
    /// calls [`LlmProvider::chat`] and emits the whole content once.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> LlmResponse {
        let response = self.chat(request).await;
        if !response.content.is_empty() {
            on_delta(&response.content);
        }
        response
    }
}
