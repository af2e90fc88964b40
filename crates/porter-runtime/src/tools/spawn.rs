//! Hand a long-running task to a background subagent.

use std::sync::Arc;

use async_trait::async_trait;
use porter_core::{Result, Tool, ToolContext};
use serde_json::{json, Value};

use crate::subagent::SubagentManager;

pub struct SpawnTool {
    manager: Arc<SubagentManager>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }
    fn description(&self) -> &str {
        "Spawn a background subagent to handle long-running tasks."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string" },
                "label": { "type": "string" }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let task = args["task"].as_str().unwrap_or_default();
        let label = args["label"].as_str().unwrap_or_default();
        if task.trim().is_empty() {
            return Ok("Error: task is required".to_string());
        }
        Ok(self
            .manager
            .spawn(task, label, &ctx.channel, &ctx.chat_id))
    }
}
