//! OpenAI-compatible chat-completions provider. Works against OpenAI,
//! OpenRouter, NIM, vLLM, and anything else speaking the same wire format.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use porter_core::{random_id, ToolCall};
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{ChatRequest, LlmProvider, LlmResponse};

const UNARY_TIMEOUT: Duration = Duration::from_secs(90);
const STREAM_TIMEOUT: Duration = Duration::from_secs(180);

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, api_base: String, default_model: String) -> Self {
        let api_base = if api_base.is_empty() {
            "https://openrouter.ai/api/v1".to_string()
        } else {
            api_base.trim_end_matches('/').to_string()
        };
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_base,
            default_model,
        }
    }

    fn build_payload(&self, request: &ChatRequest, stream: bool) -> Value {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };
        let mut payload = json!({
            "model": model,
            "messages": request.messages,
            "max_tokens": request.max_tokens.max(1),
            "temperature": request.temperature,
            "top_p": request.top_p,
        });
        if stream {
            payload["stream"] = json!(true);
            payload["stream_options"] = json!({ "include_usage": true });
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(request.tools);
            payload["tool_choice"] = json!("auto");
        }
        payload
    }

    fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
        let function = raw.get("function")?;
        let name = function.get("name").and_then(Value::as_str)?.to_string();
        if name.is_empty() {
            return None;
        }
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| random_id(10));
        let arg_text = function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        let arguments =
            serde_json::from_str(arg_text).unwrap_or_else(|_| json!({ "raw": arg_text }));
        Some(ToolCall { id, name, arguments })
    }

    fn text_field(message: &Value, field: &str) -> String {
        match message.get(field) {
            None => String::new(),
            Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, request: &ChatRequest) -> LlmResponse {
        if self.api_key.is_empty() {
            return LlmResponse::error("Error: no API key configured");
        }

        let payload = self.build_payload(request, false);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(UNARY_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return LlmResponse::error(format!("Error calling LLM: {e}")),
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return LlmResponse::error(format!(
                "Error calling LLM (HTTP {}): {body}",
                status.as_u16()
            ));
        }

        let data: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => return LlmResponse::error(format!("Error parsing LLM response: {e}")),
        };

        let choice = match data.get("choices").and_then(|c| c.get(0)) {
            Some(c) => c,
            None => return LlmResponse::error("Error: malformed LLM response"),
        };
        let message = match choice.get("message") {
            Some(m) if m.is_object() => m,
            _ => return LlmResponse::error("Error: missing message in LLM response"),
        };

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(Self::parse_tool_call).collect())
            .unwrap_or_default();

        LlmResponse {
            content: Self::text_field(message, "content"),
            reasoning_content: Self::text_field(message, "reasoning_content"),
            tool_calls,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .unwrap_or("stop")
                .to_string(),
            usage: data.get("usage").cloned().unwrap_or_else(|| json!({})),
        }
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> LlmResponse {
        if self.api_key.is_empty() {
            return LlmResponse::error("Error: no API key configured");
        }

        let payload = self.build_payload(request, true);
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .timeout(STREAM_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return LlmResponse::error(format!("Error calling LLM (stream): {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            return LlmResponse::error(format!(
                "Error calling LLM (stream) (HTTP {})",
                status.as_u16()
            ));
        }

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut finish_reason = String::new();
        let mut usage = json!({});

        // Tool-call argument fragments arrive indexed by position; each
        // index accumulates (id, name, argument text) until the stream ends.
        let mut accumulators: HashMap<u64, (String, String, String)> = HashMap::new();

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        let mut done = false;

        'recv: while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => return LlmResponse::error(format!("Error calling LLM (stream): {e}")),
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    done = true;
                    break 'recv;
                }

                let Ok(event) = serde_json::from_str::<Value>(data) else {
                    continue;
                };
                if let Some(u) = event.get("usage").filter(|u| u.is_object()) {
                    usage = u.clone();
                }
                let Some(choice) = event.get("choices").and_then(|c| c.get(0)) else {
                    continue;
                };
                if let Some(fr) = choice.get("finish_reason").and_then(Value::as_str) {
                    if !fr.is_empty() {
                        finish_reason = fr.to_string();
                    }
                }
                let Some(delta) = choice.get("delta").filter(|d| d.is_object()) else {
                    continue;
                };

                if let Some(piece) = delta.get("content").and_then(Value::as_str) {
                    if !piece.is_empty() {
                        content.push_str(piece);
                        on_delta(piece);
                    }
                }
                if let Some(piece) = delta.get("reasoning_content").and_then(Value::as_str) {
                    reasoning.push_str(piece);
                }

                if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for tc in calls {
                        let Some(index) = tc.get("index").and_then(Value::as_u64) else {
                            continue;
                        };
                        let entry = accumulators.entry(index).or_default();
                        if entry.0.is_empty() {
                            if let Some(id) = tc.get("id").and_then(Value::as_str) {
                                entry.0 = id.to_string();
                            }
                        }
                        if let Some(function) = tc.get("function").filter(|f| f.is_object()) {
                            if entry.1.is_empty() {
                                if let Some(name) = function.get("name").and_then(Value::as_str) {
                                    entry.1 = name.to_string();
                                }
                            }
                            if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                                entry.2.push_str(args);
                            }
                        }
                    }
                }
            }
        }
        if !done {
            debug!("LLM stream ended without [DONE]");
        }

        let mut ordered: Vec<(u64, (String, String, String))> = accumulators.into_iter().collect();
        ordered.sort_by_key(|(index, _)| *index);

        let tool_calls = ordered
            .into_iter()
            .filter_map(|(_, (id, name, arg_text))| {
                if name.is_empty() {
                    return None;
                }
                let raw = if arg_text.is_empty() { "{}" } else { arg_text.as_str() };
                let arguments =
                    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }));
                Some(ToolCall {
                    id: if id.is_empty() { random_id(10) } else { id },
                    name,
                    arguments,
                })
            })
            .collect();

        LlmResponse {
            content,
            reasoning_content: reasoning,
            tool_calls,
            finish_reason: if finish_reason.is_empty() {
                "stop".to_string()
            } else {
                finish_reason
            },
            usage,
        }
    }
}
