//! Publish an outbound envelope to an explicit target or the turn's
//! current channel/chat.

use std::sync::Arc;

use async_trait::async_trait;
use porter_core::{MessageBus, OutboundEnvelope, Result, Tool, ToolContext};
use serde_json::{json, Value};

pub struct MessageTool {
    bus: Arc<MessageBus>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }
    fn description(&self) -> &str {
        "Send message to channel/chat"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "channel": { "type": "string" },
                "chat_id": { "type": "string" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let content = args["content"].as_str().unwrap_or_default();
        let channel = args["channel"]
            .as_str()
            .filter(|c| !c.is_empty())
            .unwrap_or(&ctx.channel);
        let chat_id = args["chat_id"]
            .as_str()
            .filter(|c| !c.is_empty())
            .unwrap_or(&ctx.chat_id);

        if channel.is_empty() || chat_id.is_empty() {
            return Ok("Error: No target channel/chat specified".to_string());
        }

        self.bus
            .publish_outbound(OutboundEnvelope::new(channel, chat_id, content))
            .await;
        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
