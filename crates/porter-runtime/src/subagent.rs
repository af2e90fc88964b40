//! Detached background subagents. A spawn returns immediately with an
//! acknowledgment; the worker runs its own bounded turn loop with a
//! reduced tool set and announces completion back through the bus as a
//! `system`-channel envelope addressed to the originating session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use porter_core::{now_iso8601, random_id, InboundEnvelope, MessageBus, ToolContext, SYSTEM_CHANNEL};
use porter_llm::{ChatMessage, ChatRequest, LlmProvider};
use tracing::info;

use crate::parse::strip_token_whole_word_ci;
use crate::registry::ToolRegistry;
use crate::tools::{
    EditFileTool, ExecTool, ListDirTool, ReadFileTool, ScreenCaptureTool, WebFetchTool,
    WebSearchTool, WriteFileTool,
};

const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Generation settings shared by all subagent workers.
#[derive(Debug, Clone)]
pub struct SubagentSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub web_search_api_key: String,
    pub exec_timeout_secs: u64,
    pub restrict_to_workspace: bool,
}

pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    workspace: PathBuf,
    settings: SubagentSettings,
    running: Arc<AtomicUsize>,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bus: Arc<MessageBus>,
        workspace: PathBuf,
        settings: SubagentSettings,
    ) -> Self {
        Self {
            provider,
            bus,
            workspace,
            settings,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a detached worker and return the acknowledgment immediately.
    /// The worker has no join semantics; its only completion protocol is
    /// the announcement envelope.
    pub fn spawn(
        &self,
        task: &str,
        label: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> String {
        let task_id = random_id(8);
        let display_label = if label.trim().is_empty() {
            summarize_label(task)
        } else {
            label.to_string()
        };

        let running = Arc::clone(&self.running);
        running.fetch_add(1, Ordering::SeqCst);

        let provider = Arc::clone(&self.provider);
        let bus = Arc::clone(&self.bus);
        let workspace = self.workspace.clone();
        let settings = self.settings.clone();
        let task_text = task.to_string();
        let label_text = display_label.clone();
        let origin = format!("{origin_channel}:{origin_chat_id}");
        let worker_id = task_id.clone();

        tokio::spawn(async move {
            run_subagent(
                provider, bus, workspace, settings, &worker_id, &task_text, &label_text, &origin,
            )
            .await;
            running.fetch_sub(1, Ordering::SeqCst);
        });

        format!(
            "Subagent [{display_label}] started (id: {task_id}). I'll notify you when it completes."
        )
    }
}

fn summarize_label(task: &str) -> String {
    const MAX: usize = 30;
    if task.chars().count() <= MAX {
        return task.to_string();
    }
    let head: String = task.chars().take(MAX).collect();
    format!("{head}...")
}

fn subagent_prompt(workspace: &std::path::Path) -> String {
    format!(
        "# Subagent\n\n\
         Current time: {}\n\n\
         You are a background subagent. Complete only the requested task.\n\
         Rules:\n\
         1. Stay focused on the assigned task.\n\
         2. Use tools when needed.\n\
         3. Return a concise final result.\n\
         4. Do not start side tasks.\n\
         Workspace: {}",
        now_iso8601(),
        workspace.display()
    )
}

fn build_tools(workspace: &std::path::Path, settings: &SubagentSettings) -> ToolRegistry {
    let allowed_dir = settings
        .restrict_to_workspace
        .then(|| workspace.to_path_buf());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(ListDirTool::new(allowed_dir)));
    tools.register(Arc::new(ExecTool::new(
        settings.exec_timeout_secs,
        workspace.to_path_buf(),
        settings.restrict_to_workspace,
    )));
    tools.register(Arc::new(WebSearchTool::new(
        settings.web_search_api_key.clone(),
        5,
    )));
    tools.register(Arc::new(WebFetchTool::default()));
    tools.register(Arc::new(ScreenCaptureTool::new(
        workspace.join("screenshots"),
    )));
    tools
}

#[allow(clippy::too_many_arguments)]
async fn run_subagent(
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    workspace: PathBuf,
    settings: SubagentSettings,
    task_id: &str,
    task: &str,
    label: &str,
    origin: &str,
) {
    let mut task_text = task.to_string();
    let vision_enabled = strip_token_whole_word_ci(&mut task_text, "--vision");

    let tools = build_tools(&workspace, &settings);
    let (origin_channel, origin_chat_id) = origin.split_once(':').unwrap_or(("cli", "direct"));
    let ctx = ToolContext::new(origin_channel, origin_chat_id).with_vision(vision_enabled);

    let mut messages = vec![
        ChatMessage::system(subagent_prompt(&workspace)),
        ChatMessage::user(task_text),
    ];

    let mut final_result = String::new();
    let mut status = "ok";

    for _ in 0..SUBAGENT_MAX_ITERATIONS {
        let request = ChatRequest {
            model: settings.model.clone(),
            messages: messages.clone(),
            tools: tools.definitions().to_vec(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
        };
        let response = provider.chat(&request).await;

        if response.is_error() {
            status = "error";
            final_result = response.content;
            break;
        }

        if response.has_tool_calls() {
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                &response.tool_calls,
                (!response.reasoning_content.is_empty()).then(|| response.reasoning_content.clone()),
            ));
            for call in &response.tool_calls {
                let result = tools.execute(&call.name, &call.arguments, &ctx).await;
                messages.push(ChatMessage::tool_result(
                    call.id.as_str(),
                    call.name.as_str(),
                    result,
                ));
            }
        } else {
            final_result = response.content;
            break;
        }
    }

    if final_result.trim().is_empty() {
        final_result = "Task completed but no final response was generated.".to_string();
    }

    let status_text = if status == "ok" {
        "completed successfully"
    } else {
        "failed"
    };
    let announce_content = format!(
        "[Subagent '{label}' {status_text}]\n\nTask: {task}\n\nResult:\n{final_result}\n\n\
         Summarize this naturally for the user. Keep it brief (1-2 sentences). \
         Do not mention technical details like subagent internals or task IDs."
    );

    let announce = InboundEnvelope::new(SYSTEM_CHANNEL, "subagent", origin, announce_content);
    bus.publish_inbound(announce).await;
    info!(task_id = %task_id, status = %status, "subagent finished");
}
