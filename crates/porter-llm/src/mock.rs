//! Mock provider for deterministic tests. Returns pre-queued responses
//! without any network traffic and records every request it sees.

use async_trait::async_trait;
use parking_lot::Mutex;
use porter_core::{random_id, ToolCall};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::provider::{ChatRequest, LlmProvider, LlmResponse};

/// A pre-configured answer.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_content: String,
    /// When set the response folds into `finish_reason == "error"`.
    pub error: Option<String>,
}

impl MockResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                id: format!("call_{}", random_id(8)),
                name: name.to_string(),
                arguments,
            }],
            ..Default::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// A provider that pops queued responses in order. When the queue runs dry
/// it answers with a fixed marker text instead of blocking the turn.
pub struct MockProvider {
    responses: Mutex<Vec<MockResponse>>,
    /// Every request received, for assertions.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, content: &str) -> Self {
        self.responses.lock().push(MockResponse::text(content));
        self
    }

    pub fn with_tool_call(self, name: &str, arguments: Value) -> Self {
        self.responses
            .lock()
            .push(MockResponse::tool_call(name, arguments));
        self
    }

    pub fn with_error(self, message: &str) -> Self {
        self.responses.lock().push(MockResponse::error(message));
        self
    }

    pub fn with_mock_response(self, response: MockResponse) -> Self {
        self.responses.lock().push(response);
        self
    }

    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }

    fn to_llm_response(mock: MockResponse) -> LlmResponse {
        if let Some(error) = mock.error {
            return LlmResponse::error(error);
        }
        let finish_reason = if mock.tool_calls.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        LlmResponse {
            content: mock.content,
            tool_calls: mock.tool_calls,
            reasoning_content: mock.reasoning_content,
            finish_reason: finish_reason.to_string(),
            usage: json!({ "prompt_tokens": 100, "completion_tokens": 50 }),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock/test-model"
    }

    async fn chat(&self, request: &ChatRequest) -> LlmResponse {
        self.requests.lock().push(request.clone());
        Self::to_llm_response(self.next_response())
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> LlmResponse {
        self.requests.lock().push(request.clone());
        let response = Self::to_llm_response(self.next_response());
        if !response.is_error() {
            for piece in response.content.split_inclusive(' ') {
                on_delta(piece);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test".into(),
            messages: vec![ChatMessage::user("hello")],
            tools: vec![],
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    #[tokio::test]
    async fn test_text_response() {
        let provider = MockProvider::new().with_response("Hello!");
        let resp = provider.chat(&request()).await;
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish_reason, "stop");
        assert!(!resp.has_tool_calls());
    }

    #[tokio::test]
    async fn test_tool_call_response() {
        let provider = MockProvider::new().with_tool_call("list_dir", json!({"path": "."}));
        let resp = provider.chat(&request()).await;
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "list_dir");
        assert_eq!(resp.finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn test_error_folds_into_response() {
        let provider = MockProvider::new().with_error("HTTP 429: rate limited");
        let resp = provider.chat(&request()).await;
        assert!(resp.is_error());
        assert_eq!(resp.content, "HTTP 429: rate limited");
    }

    #[tokio::test]
    async fn test_responses_pop_in_order_and_requests_recorded() {
        let provider = MockProvider::new()
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.chat(&request()).await.content, "first");
        assert_eq!(provider.chat(&request()).await.content, "second");
        assert!(provider
            .chat(&request())
            .await
            .content
            .contains("no more queued responses"));
        assert_eq!(provider.requests.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_deltas_reassemble_content() {
        let provider = MockProvider::new().with_response("streamed words here");
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&buffer);
        let resp = provider
            .chat_stream(&request(), &move |piece: &str| sink.lock().push_str(piece))
            .await;
        assert_eq!(*buffer.lock(), resp.content);
    }
}
