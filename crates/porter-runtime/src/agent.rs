//! The agent turn loop: one worker consumes inbound envelopes in arrival
//! order and drives each through command interception, suffix parsing,
//! media transcription, the LLM-call + tool-execute iteration, and session
//! persistence. Cancellation is cooperative: `/stop` is observed between
//! LLM calls and between tool invocations, never inside one.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use porter_core::{
    InboundEnvelope, MessageBus, Metrics, OutboundEnvelope, ToolContext, SYSTEM_CHANNEL,
};
use porter_llm::{ChatMessage, ChatRequest, LlmProvider, LlmResponse};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::ContextBuilder;
use crate::external::ExternalCli;
use crate::memory::MemoryStore;
use crate::parse::parse_request;
use crate::registry::ToolRegistry;
use crate::scheduler::CronService;
use crate::session::{Session, SessionStore};
use crate::subagent::{SubagentManager, SubagentSettings};
use crate::tools::{
    is_headless_server, CronTool, EditFileTool, ExecTool, ListDirTool, MessageTool, ReadFileTool,
    ScreenCaptureTool, SpawnTool, TranscribeTool, WebFetchTool, WebSearchTool, WriteFileTool,
};

const HELP_TEXT: &str = "Porter commands:\n\
     /new - Start a new conversation\n\
     /stop - Stop current task\n\
     /help - Show commands\n\n\
     Message suffixes:\n\
     --codex - Route this prompt to Codex CLI\n\
     --gemini - Route this prompt to Gemini CLI\n\
     --vision - Enable screen context (can be combined as: <prompt> --vision --codex)";

const REFLECT_NUDGE: &str = "Reflect on the results and decide next steps.";
const STOP_POLL_BATCH: usize = 8;
const SYSTEM_DRAIN_BATCH: usize = 32;

/// Everything the loop needs to know about generation and tooling.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub workspace: PathBuf,
    pub sessions_dir: PathBuf,
    pub model: String,
    pub max_iterations: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub memory_window: usize,
    pub web_search_api_key: String,
    pub transcribe_api_key: String,
    pub transcribe_api_base: String,
    pub transcribe_model: String,
    pub transcribe_timeout_secs: u64,
    pub exec_timeout_secs: u64,
    pub restrict_to_workspace: bool,
}

pub type DeltaSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    settings: AgentSettings,
    context: ContextBuilder,
    sessions: TokioMutex<SessionStore>,
    tools: ToolRegistry,
    subagents: Arc<SubagentManager>,
    external_cli: Option<Arc<dyn ExternalCli>>,
    metrics: Arc<Metrics>,

    /// Serializes turns: the worker, cron-driven turns, and heartbeat
    /// turns all run through this lock.
    turn_lock: TokioMutex<()>,
    cancel_requested: AtomicBool,
    task_in_progress: AtomicBool,
    deferred: Mutex<Vec<InboundEnvelope>>,

    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        settings: AgentSettings,
        cron: Option<Arc<CronService>>,
        external_cli: Option<Arc<dyn ExternalCli>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let subagents = Arc::new(SubagentManager::new(
            Arc::clone(&provider),
            Arc::clone(&bus),
            settings.workspace.clone(),
            SubagentSettings {
                model: settings.model.clone(),
                temperature: settings.temperature,
                top_p: settings.top_p,
                max_tokens: settings.max_tokens,
                web_search_api_key: settings.web_search_api_key.clone(),
                exec_timeout_secs: settings.exec_timeout_secs,
                restrict_to_workspace: settings.restrict_to_workspace,
            },
        ));

        let tools = Self::build_tools(&bus, &settings, &subagents, cron.as_ref());

        let inner = AgentInner {
            context: ContextBuilder::new(settings.workspace.clone()),
            sessions: TokioMutex::new(SessionStore::new(settings.sessions_dir.clone())),
            bus,
            provider,
            settings,
            tools,
            subagents,
            external_cli,
            metrics,
            turn_lock: TokioMutex::new(()),
            cancel_requested: AtomicBool::new(false),
            task_in_progress: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    fn build_tools(
        bus: &Arc<MessageBus>,
        settings: &AgentSettings,
        subagents: &Arc<SubagentManager>,
        cron: Option<&Arc<CronService>>,
    ) -> ToolRegistry {
        let allowed_dir = settings
            .restrict_to_workspace
            .then(|| settings.workspace.clone());

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            settings.exec_timeout_secs,
            settings.workspace.clone(),
            settings.restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(
            settings.web_search_api_key.clone(),
            5,
        )));
        tools.register(Arc::new(WebFetchTool::default()));
        if !settings.transcribe_api_base.trim().is_empty() {
            tools.register(Arc::new(TranscribeTool::new(
                settings.transcribe_api_key.clone(),
                settings.transcribe_api_base.clone(),
                settings.transcribe_model.clone(),
                settings.transcribe_timeout_secs,
            )));
        }
        tools.register(Arc::new(ScreenCaptureTool::new(
            settings.workspace.join("screenshots"),
        )));
        tools.register(Arc::new(MessageTool::new(Arc::clone(bus))));
        tools.register(Arc::new(SpawnTool::new(Arc::clone(subagents))));
        if let Some(cron) = cron {
            tools.register(Arc::new(CronTool::new(Arc::clone(cron))));
        }
        tools
    }

    pub fn subagents(&self) -> Arc<SubagentManager> {
        Arc::clone(&self.inner.subagents)
    }

    /// Spawn the single agent worker. Idempotent.
    pub fn run(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            info!("agent loop started");
            while inner.running.load(Ordering::SeqCst) {
                let msg = inner.bus.consume_inbound().await;
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }

                let channel = msg.channel.clone();
                let chat_id = msg.chat_id.clone();
                match AgentInner::process_message(&inner, msg, None, None).await {
                    Ok(Some(response)) => inner.bus.publish_outbound(response).await,
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "turn failed");
                        inner
                            .bus
                            .publish_outbound(OutboundEnvelope::new(
                                channel,
                                chat_id,
                                format!("Sorry, I encountered an error: {e}"),
                            ))
                            .await;
                    }
                }
            }
            info!("agent loop stopped");
        });
        *self.inner.worker.lock() = Some(handle);
    }

    /// Publish the stop sentinel to unblock the worker, then join it.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner
            .bus
            .publish_inbound(InboundEnvelope::stop_sentinel())
            .await;
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One-shot turn against the same core, used by the CLI, cron jobs,
    /// and the heartbeat. Appends any pending system announcements for
    /// this session to the reply.
    pub async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
    ) -> String {
        let msg = InboundEnvelope::new(channel, "user", chat_id, content);
        let mut out = match AgentInner::process_message(
            &self.inner,
            msg,
            Some(session_key.to_string()),
            None,
        )
        .await
        {
            Ok(Some(response)) => response.content,
            Ok(None) => String::new(),
            Err(e) => format!("Sorry, I encountered an error: {e}"),
        };
        out.push_str(&AgentInner::drain_system_announcements(&self.inner, channel, chat_id).await);
        out
    }

    /// Streaming variant of [`Agent::process_direct`].
    pub async fn process_direct_stream(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        on_delta: DeltaSink<'_>,
    ) -> String {
        let msg = InboundEnvelope::new(channel, "user", chat_id, content);
        let mut out = match AgentInner::process_message(
            &self.inner,
            msg,
            Some(session_key.to_string()),
            Some(on_delta),
        )
        .await
        {
            Ok(Some(response)) => response.content,
            Ok(None) => String::new(),
            Err(e) => format!("Sorry, I encountered an error: {e}"),
        };
        let extra = AgentInner::drain_system_announcements(&self.inner, channel, chat_id).await;
        if !extra.is_empty() {
            on_delta(&extra);
        }
        out.push_str(&extra);
        out
    }
}

impl AgentInner {
    async fn process_message(
        inner: &Arc<Self>,
        msg: InboundEnvelope,
        session_override: Option<String>,
        on_delta: Option<DeltaSink<'_>>,
    ) -> porter_core::Result<Option<OutboundEnvelope>> {
        if msg.is_stop_sentinel() {
            return Ok(None);
        }
        if msg.channel == SYSTEM_CHANNEL {
            return Ok(Self::process_system_message(inner, &msg).await);
        }

        let key = session_override.unwrap_or_else(|| msg.session_key());

        // Command interception runs before the turn lock so /stop can
        // reach an in-flight cron or heartbeat turn.
        let command = msg.content.trim();
        if command.eq_ignore_ascii_case("/new") {
            let mut sessions = inner.sessions.lock().await;
            let mut session = sessions.get_or_create(&key);
            session.clear();
            sessions.save(&session);
            sessions.invalidate(&key);
            return Ok(Some(OutboundEnvelope::new(
                msg.channel,
                msg.chat_id,
                "New session started.",
            )));
        }
        if command.eq_ignore_ascii_case("/help") {
            return Ok(Some(OutboundEnvelope::new(msg.channel, msg.chat_id, HELP_TEXT)));
        }
        if command.eq_ignore_ascii_case("/stop") {
            if !inner.task_in_progress.load(Ordering::SeqCst) {
                return Ok(Some(OutboundEnvelope::new(
                    msg.channel,
                    msg.chat_id,
                    "No active task is running.",
                )));
            }
            inner.cancel_requested.store(true, Ordering::SeqCst);
            return Ok(Some(OutboundEnvelope::new(
                msg.channel,
                msg.chat_id,
                "Stopping current task...",
            )));
        }

        let _turn = inner.turn_lock.lock().await;
        inner.metrics.inc("agent.turns");

        let mut session = {
            let mut sessions = inner.sessions.lock().await;
            sessions.get_or_create(&key)
        };

        if session.messages.len() > inner.settings.memory_window {
            Self::consolidate_memory(inner, &mut session, false);
            let mut sessions = inner.sessions.lock().await;
            sessions.save(&session);
        }

        let parsed = parse_request(&msg.content);
        let mut user_content = parsed.prompt.clone();

        if !msg.media.is_empty() && !inner.settings.transcribe_api_base.trim().is_empty() {
            let media_block = Self::build_media_block(inner, &msg).await;
            if user_content.is_empty() {
                user_content = msg.content.trim().to_string();
            }
            user_content = format!("{user_content}{media_block}").trim().to_string();
        }

        if parsed.vision_enabled && is_headless_server() {
            return Ok(Some(OutboundEnvelope::new(
                msg.channel,
                msg.chat_id,
                "Vision is unavailable on headless server (DISPLAY/WAYLAND_DISPLAY not set).",
            )));
        }

        if let Some(route) = &parsed.external_cli {
            let final_content = match &inner.external_cli {
                Some(cli) => cli.run(route, parsed.vision_enabled).await,
                None => "External CLI routing is not configured.".to_string(),
            };
            let user_turn = if route.prompt.is_empty() {
                msg.content.trim().to_string()
            } else {
                route.prompt.clone()
            };
            session.add_message("user", user_turn, vec![]);
            session.add_message("assistant", final_content.clone(), vec![route.name.clone()]);
            {
                let mut sessions = inner.sessions.lock().await;
                sessions.save(&session);
            }

            let mut out = OutboundEnvelope::new(msg.channel, msg.chat_id, final_content);
            out.metadata = msg.metadata;
            return Ok(Some(out));
        }

        let ctx =
            ToolContext::new(msg.channel.as_str(), msg.chat_id.as_str()).with_vision(parsed.vision_enabled);
        let history = session.history(inner.settings.memory_window);
        let initial_messages = inner.context.build_messages(
            history,
            &user_content,
            &[],
            &msg.channel,
            &msg.chat_id,
        );

        let (final_content, tools_used) = Self::with_run_scope(
            inner,
            Self::run_agent_loop(inner, initial_messages, &msg.channel, &msg.chat_id, &ctx, on_delta),
        )
        .await;

        session.add_message("user", user_content, vec![]);
        session.add_message("assistant", final_content.clone(), tools_used);
        {
            let mut sessions = inner.sessions.lock().await;
            sessions.save(&session);
        }

        let mut out = OutboundEnvelope::new(msg.channel, msg.chat_id, final_content);
        out.metadata = msg.metadata;
        Ok(Some(out))
    }

    /// A non-stop `system` envelope is an announcement for the session
    /// named by its chat_id. It runs a full turn with the announcement as
    /// a `[System]`-prefixed user message.
    async fn process_system_message(
        inner: &Arc<Self>,
        msg: &InboundEnvelope,
    ) -> Option<OutboundEnvelope> {
        let (origin_channel, origin_chat_id) = msg
            .chat_id
            .split_once(':')
            .unwrap_or(("cli", msg.chat_id.as_str()));
        let key = format!("{origin_channel}:{origin_chat_id}");

        let _turn = inner.turn_lock.lock().await;
        inner.metrics.inc("agent.system_turns");

        let mut session = {
            let mut sessions = inner.sessions.lock().await;
            sessions.get_or_create(&key)
        };

        let ctx = ToolContext::new(origin_channel, origin_chat_id);
        let initial = inner.context.build_messages(
            session.history(inner.settings.memory_window),
            &msg.content,
            &[],
            origin_channel,
            origin_chat_id,
        );

        let (final_content, _tools) = Self::with_run_scope(
            inner,
            Self::run_agent_loop(inner, initial, origin_channel, origin_chat_id, &ctx, None),
        )
        .await;

        session.add_message("user", format!("[System] {}", msg.content), vec![]);
        session.add_message("assistant", final_content.clone(), vec![]);
        {
            let mut sessions = inner.sessions.lock().await;
            sessions.save(&session);
        }

        Some(OutboundEnvelope::new(
            origin_channel,
            origin_chat_id,
            final_content,
        ))
    }

    /// Run-scope bookkeeping around a turn: flags in, and on every exit
    /// path the deferred envelopes go back to the inbound queue and both
    /// flags reset.
    async fn with_run_scope<F, T>(inner: &Arc<Self>, turn: F) -> T
    where
        F: Future<Output = T>,
    {
        inner.task_in_progress.store(true, Ordering::SeqCst);
        inner.cancel_requested.store(false, Ordering::SeqCst);

        let out = turn.await;

        Self::flush_deferred(inner).await;
        inner.cancel_requested.store(false, Ordering::SeqCst);
        inner.task_in_progress.store(false, Ordering::SeqCst);
        out
    }

    async fn run_agent_loop(
        inner: &Arc<Self>,
        initial_messages: Vec<ChatMessage>,
        channel: &str,
        chat_id: &str,
        ctx: &ToolContext,
        on_delta: Option<DeltaSink<'_>>,
    ) -> (String, Vec<String>) {
        let mut messages = initial_messages;
        let mut tools_used: Vec<String> = Vec::new();
        let mut final_content = String::new();
        let mut last_assistant_content = String::new();

        for _ in 0..inner.settings.max_iterations {
            if Self::poll_for_stop(inner, channel, chat_id).await {
                final_content = "Stopped.".to_string();
                break;
            }

            let request = ChatRequest {
                model: inner.settings.model.clone(),
                messages: messages.clone(),
                tools: inner.tools.definitions().to_vec(),
                max_tokens: inner.settings.max_tokens,
                temperature: inner.settings.temperature,
                top_p: inner.settings.top_p,
            };

            let response = Self::call_provider(inner, &request, on_delta).await;
            if !response.content.trim().is_empty() {
                last_assistant_content = response.content.clone();
            }

            if Self::poll_for_stop(inner, channel, chat_id).await {
                final_content = "Stopped.".to_string();
                break;
            }

            if response.has_tool_calls() {
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    &response.content,
                    &response.tool_calls,
                    &response.reasoning_content,
                );

                for call in &response.tool_calls {
                    if Self::poll_for_stop(inner, channel, chat_id).await {
                        final_content = "Stopped.".to_string();
                        break;
                    }
                    tools_used.push(call.name.clone());
                    inner.metrics.inc("tools.calls");
                    let result = inner.tools.execute(&call.name, &call.arguments, ctx).await;
                    ContextBuilder::add_tool_result(&mut messages, &call.id, &call.name, &result);
                }

                if !final_content.is_empty() {
                    break;
                }
                messages.push(ChatMessage::user(REFLECT_NUDGE));
            } else {
                final_content = response.content;
                break;
            }
        }

        if final_content.is_empty() {
            final_content = if last_assistant_content.is_empty() {
                "I've completed processing but have no response to give.".to_string()
            } else {
                last_assistant_content
            };
        }
        (final_content, tools_used)
    }

    /// Streamed calls buffer their deltas; the buffer is surfaced to the
    /// caller only when the response carries no tool calls, so partial
    /// reasoning text preceding a tool call stays hidden.
    async fn call_provider(
        inner: &Arc<Self>,
        request: &ChatRequest,
        on_delta: Option<DeltaSink<'_>>,
    ) -> LlmResponse {
        match on_delta {
            Some(sink) => {
                let buffer = Arc::new(Mutex::new(String::new()));
                let accumulate = Arc::clone(&buffer);
                let response = inner
                    .provider
                    .chat_stream(request, &move |piece: &str| {
                        accumulate.lock().push_str(piece)
                    })
                    .await;
                if !response.has_tool_calls() {
                    let buffered = buffer.lock().clone();
                    if !buffered.is_empty() {
                        sink(&buffered);
                    }
                }
                response
            }
            None => inner.provider.chat(request).await,
        }
    }

    /// Between each LLM call and each tool invocation: consume up to a
    /// small batch of pending inbound envelopes. `/stop` addressed to the
    /// active session sets the cancel flag (the first setter publishes the
    /// acknowledgment); everything else is deferred for restoration.
    async fn poll_for_stop(inner: &Arc<Self>, active_channel: &str, active_chat_id: &str) -> bool {
        if inner.cancel_requested.load(Ordering::SeqCst) {
            return true;
        }

        for _ in 0..STOP_POLL_BATCH {
            let Some(msg) = inner.bus.try_consume_inbound().await else {
                break;
            };
            let is_target_session =
                msg.channel == active_channel && msg.chat_id == active_chat_id;
            if is_target_session && msg.content.trim().eq_ignore_ascii_case("/stop") {
                let first = !inner.cancel_requested.swap(true, Ordering::SeqCst);
                if first {
                    inner
                        .bus
                        .publish_outbound(OutboundEnvelope::new(
                            active_channel,
                            active_chat_id,
                            "Stopping current task...",
                        ))
                        .await;
                }
            } else {
                inner.deferred.lock().push(msg);
            }
        }
        inner.cancel_requested.load(Ordering::SeqCst)
    }

    async fn flush_deferred(inner: &Arc<Self>) {
        let pending: Vec<InboundEnvelope> = {
            let mut deferred = inner.deferred.lock();
            std::mem::take(&mut *deferred)
        };
        for msg in pending {
            inner.bus.publish_inbound(msg).await;
        }
    }

    /// After a direct turn, pop a bounded batch of inbound envelopes:
    /// system announcements for this session are processed inline and
    /// their replies appended; everything else is republished unchanged.
    async fn drain_system_announcements(
        inner: &Arc<Self>,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> String {
        let target = format!("{origin_channel}:{origin_chat_id}");
        let mut deferred = Vec::new();
        let mut appended = String::new();

        for _ in 0..SYSTEM_DRAIN_BATCH {
            let Some(msg) = inner.bus.try_consume_inbound().await else {
                break;
            };
            if msg.channel == SYSTEM_CHANNEL && msg.chat_id == target {
                if let Some(response) = Self::process_system_message(inner, &msg).await {
                    if !response.content.trim().is_empty() {
                        appended.push_str("\n\n");
                        appended.push_str(&response.content);
                    }
                }
            } else {
                deferred.push(msg);
            }
        }

        for msg in deferred {
            inner.bus.publish_inbound(msg).await;
        }
        appended
    }

    /// Move everything before the keep window into the long-term history
    /// file and advance the consolidation index.
    fn consolidate_memory(inner: &Arc<Self>, session: &mut Session, archive_all: bool) {
        let memory = MemoryStore::new(&inner.settings.workspace);

        let keep_count = if archive_all {
            0
        } else {
            (inner.settings.memory_window / 2).max(1)
        };
        if session.messages.len() <= keep_count {
            return;
        }

        let start = if archive_all { 0 } else { session.last_consolidated };
        let end = if archive_all {
            session.messages.len()
        } else {
            session.messages.len() - keep_count
        };
        if start >= end || end > session.messages.len() {
            return;
        }

        let stamp: String = porter_core::now_iso8601().chars().take(16).collect();
        let mut history = format!("[{stamp}] Session summary\n");
        for msg in &session.messages[start..end] {
            let ts: String = msg.timestamp.chars().take(16).collect();
            history.push_str(&format!(
                "[{ts}] {}: {}\n",
                msg.role.to_uppercase(),
                msg.content
            ));
        }
        memory.append_history(&history);

        if archive_all {
            session.last_consolidated = 0;
            session.messages.clear();
        } else {
            session.last_consolidated = end;
        }
        inner.metrics.inc("memory.consolidations");
    }

    async fn build_media_block(inner: &Arc<Self>, msg: &InboundEnvelope) -> String {
        let mut media_block = String::from("\n\n[Media attachments]\n");
        let mut transcript_block = String::from("\n[Transcription]\n");

        let transcriber = TranscribeTool::new(
            inner.settings.transcribe_api_key.clone(),
            inner.settings.transcribe_api_base.clone(),
            inner.settings.transcribe_model.clone(),
            inner.settings.transcribe_timeout_secs,
        );

        let mut index = 1;
        for path in msg.media.iter().filter(|p| !p.trim().is_empty()) {
            media_block.push_str(&format!("- audio[{index}]: {path}\n"));

            let audio_path = Self::maybe_convert_audio(inner, path.trim()).await;
            inner.metrics.inc("transcribe.total");
            let text = inner
                .tools_execute_transcribe(&transcriber, &audio_path)
                .await;
            if text.starts_with("Error:") {
                inner.metrics.inc("transcribe.error");
            } else {
                inner.metrics.inc("transcribe.ok");
            }
            transcript_block.push_str(&format!("- audio[{index}]:\n{text}\n"));
            index += 1;
        }

        format!("{media_block}{transcript_block}")
    }

    async fn tools_execute_transcribe(&self, transcriber: &TranscribeTool, path: &str) -> String {
        use porter_core::Tool;
        transcriber
            .execute(&serde_json::json!({ "path": path }), &ToolContext::default())
            .await
            .unwrap_or_else(|e| format!("Error: {e}"))
    }

    /// Non-wav audio is converted through ffmpeg when available so the
    /// transcription endpoint gets mono 16 kHz wav. Falls back to the
    /// original path on any failure.
    async fn maybe_convert_audio(inner: &Arc<Self>, path: &str) -> String {
        if cfg!(windows) || path.to_lowercase().ends_with(".wav") {
            return path.to_string();
        }

        let probe = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("command -v ffmpeg")
            .output()
            .await;
        let has_ffmpeg = probe.map(|o| o.status.success()).unwrap_or(false);
        if !has_ffmpeg {
            return path.to_string();
        }

        let out_dir = inner.settings.workspace.join("inbox").join("converted");
        let _ = tokio::fs::create_dir_all(&out_dir).await;
        let stem = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let out = out_dir.join(format!("{stem}_{}.wav", porter_core::now_ms()));

        let command = format!(
            "ffmpeg -y -hide_banner -loglevel error -i '{}' -ac 1 -ar 16000 '{}'",
            path.replace('\'', "'\\''"),
            out.display().to_string().replace('\'', "'\\''"),
        );
        let converted = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);

        if converted && out.exists() {
            out.display().to_string()
        } else {
            warn!(path = %path, "audio conversion failed, using original file");
            path.to_string()
        }
    }
}
