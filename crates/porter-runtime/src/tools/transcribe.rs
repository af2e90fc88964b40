//! Audio transcription via an OpenAI-compatible `/audio/transcriptions`
//! multipart endpoint.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use porter_core::{Result, Tool, ToolContext};
use serde_json::{json, Value};

pub struct TranscribeTool {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    timeout: Duration,
}

fn is_local_endpoint(base: &str) -> bool {
    base.contains("://localhost")
        || base.contains("://127.0.0.1")
        || base.starts_with("http://0.0.0.0")
        || base.starts_with("http://[::1]")
}

impl TranscribeTool {
    pub fn new(api_key: String, api_base: String, model: String, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_base,
            model,
            timeout: Duration::from_secs(timeout_secs.clamp(10, 900)),
        }
    }

    pub fn configured(&self) -> bool {
        !self.api_base.trim().is_empty()
    }
}

#[async_trait]
impl Tool for TranscribeTool {
    fn name(&self) -> &str {
        "transcribe"
    }
    fn description(&self) -> &str {
        "Transcribe an audio file to text via an OpenAI-compatible /audio/transcriptions endpoint"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "language": { "type": "string" },
                "prompt": { "type": "string" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        if !self.configured() {
            return Ok("Error: transcription api_base not configured".to_string());
        }
        if self.api_key.trim().is_empty() && !is_local_endpoint(self.api_base.trim()) {
            return Ok("Error: transcription api_key not configured".to_string());
        }

        let raw_path = args["path"].as_str().unwrap_or_default().trim();
        if raw_path.is_empty() {
            return Ok("Error: path is required".to_string());
        }
        let path = Path::new(raw_path);
        if !path.is_file() {
            return Ok(format!("Error: file not found: {raw_path}"));
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return Ok(format!("Error: cannot read {raw_path}: {e}")),
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        let model = self.model.trim();
        if !model.is_empty() && model != "auto" {
            form = form.text("model", model.to_string());
        }
        if let Some(language) = args["language"].as_str().filter(|l| !l.trim().is_empty()) {
            form = form.text("language", language.trim().to_string());
        }
        if let Some(prompt) = args["prompt"].as_str().filter(|p| !p.trim().is_empty()) {
            form = form.text("prompt", prompt.trim().to_string());
        }

        let url = format!(
            "{}/audio/transcriptions",
            self.api_base.trim().trim_end_matches('/')
        );
        let mut request = self.client.post(&url).multipart(form).timeout(self.timeout);
        if !self.api_key.trim().is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Ok(format!("Error: HTTP {} - {body}", status.as_u16()));
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(data) => {
                for field in ["text", "transcript"] {
                    if let Some(text) = data[field].as_str() {
                        return Ok(text.to_string());
                    }
                }
                Ok(body)
            }
            Err(_) => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_base() {
        let tool = TranscribeTool::new(String::new(), String::new(), String::new(), 60);
        assert!(!tool.configured());
        let out = tool
            .execute(&json!({"path": "/tmp/a.wav"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "Error: transcription api_base not configured");
    }

    #[tokio::test]
    async fn test_missing_key_for_remote_endpoint() {
        let tool = TranscribeTool::new(
            String::new(),
            "https://api.example.com/v1".into(),
            "whisper-1".into(),
            60,
        );
        let out = tool
            .execute(&json!({"path": "/tmp/a.wav"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "Error: transcription api_key not configured");
    }

    #[tokio::test]
    async fn test_local_endpoint_needs_no_key() {
        let tool = TranscribeTool::new(
            String::new(),
            "http://localhost:9000/v1".into(),
            String::new(),
            60,
        );
        let out = tool
            .execute(&json!({"path": "/definitely/missing.wav"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.starts_with("Error: file not found:"));
    }
}
