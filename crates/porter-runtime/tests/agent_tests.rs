//! End-to-end turns against the mock provider: tool loops, commands,
//! cancellation, deferred restoration, consolidation, and system
//! announcements.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use porter_core::{InboundEnvelope, MessageBus, Metrics, OutboundEnvelope};
use porter_llm::{ChatRequest, LlmProvider, LlmResponse, MockProvider};
use porter_runtime::{Agent, AgentSettings, ExternalCli, ExternalCliRoute};
use serde_json::json;

fn settings(workspace: &Path) -> AgentSettings {
    AgentSettings {
        workspace: workspace.to_path_buf(),
        sessions_dir: workspace.join("sessions"),
        model: "mock/test-model".into(),
        max_iterations: 10,
        temperature: 0.7,
        top_p: 0.9,
        max_tokens: 1024,
        memory_window: 24,
        web_search_api_key: String::new(),
        transcribe_api_key: String::new(),
        transcribe_api_base: String::new(),
        transcribe_model: String::new(),
        transcribe_timeout_secs: 60,
        exec_timeout_secs: 10,
        restrict_to_workspace: false,
    }
}

fn agent_with(
    workspace: &Path,
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
) -> Agent {
    Agent::new(
        bus,
        provider,
        settings(workspace),
        None,
        None,
        Arc::new(Metrics::new()),
    )
}

fn last_session_lines(workspace: &Path, file: &str) -> Vec<serde_json::Value> {
    let raw = std::fs::read_to_string(workspace.join("sessions").join(file)).unwrap();
    raw.lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_tool_loop_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x"), "data").unwrap();

    let provider = Arc::new(
        MockProvider::new()
            .with_tool_call("list_dir", json!({"path": dir.path().display().to_string()}))
            .with_response("one file: x"),
    );
    let requests = provider.recorded_requests();
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    let out = agent.process_direct("ping", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "one file: x");

    // Second round carries the assistant tool-call message, the matching
    // tool result, and the reflect nudge.
    let recorded = requests.lock();
    assert_eq!(recorded.len(), 2);
    let second = &recorded[1].messages;
    let assistant_idx = second
        .iter()
        .position(|m| !m.tool_calls.is_empty())
        .expect("assistant tool-call entry present");
    let tool_msg = &second[assistant_idx + 1];
    assert_eq!(tool_msg.name.as_deref(), Some("list_dir"));
    assert_eq!(
        tool_msg.tool_call_id.as_deref(),
        Some(second[assistant_idx].tool_calls[0].id.as_str())
    );
    assert!(tool_msg.content.as_deref().unwrap().contains("[FILE] x"));
    assert_eq!(
        second.last().unwrap().content.as_deref(),
        Some("Reflect on the results and decide next steps.")
    );
    drop(recorded);

    // Session records the turn with the tools used.
    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    let assistant = lines.last().unwrap();
    assert_eq!(assistant["role"], "assistant");
    assert_eq!(assistant["content"], "one file: x");
    assert_eq!(assistant["tools_used"][0], "list_dir");
}

#[tokio::test]
async fn test_commands() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_response("remembered"));
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, bus);

    let out = agent.process_direct("/help", "cli:direct", "cli", "direct").await;
    assert!(out.contains("/new"));
    assert!(out.contains("--vision"));

    let out = agent.process_direct("/stop", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "No active task is running.");

    agent.process_direct("hello", "cli:direct", "cli", "direct").await;
    let out = agent.process_direct("/NEW", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "New session started.");
    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    // Metadata line only after the clear.
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["_type"], "metadata");
}

#[tokio::test]
async fn test_provider_error_is_final_content() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_error("Error calling LLM: HTTP 500"));
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, bus);

    let out = agent.process_direct("hi", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "Error calling LLM: HTTP 500");
}

#[tokio::test]
async fn test_stop_before_first_call_and_deferred_restored() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_response("never used"));
    let requests = provider.recorded_requests();
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    // Pending while the turn runs: a /stop for the active session and an
    // unrelated message from another session.
    bus.publish_inbound(InboundEnvelope::new("cli", "user", "direct", "/stop")).await;
    bus.publish_inbound(InboundEnvelope::new("telegram", "bob", "99", "hey")).await;

    let out = agent.process_direct("long task", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "Stopped.");
    assert!(requests.lock().is_empty(), "no LLM call after cancellation");

    // First setter published the acknowledgment.
    let ack = bus.consume_outbound().await;
    assert_eq!(ack.content, "Stopping current task...");
    assert_eq!(ack.channel, "cli");

    // The unrelated envelope went back to the inbound queue.
    let restored = bus.try_consume_inbound().await.expect("deferred restored");
    assert_eq!(restored.channel, "telegram");
    assert_eq!(restored.content, "hey");
    assert!(bus.try_consume_inbound().await.is_none());
}

/// Provider that injects a `/stop` for the active session into the bus
/// while the LLM call is in flight, then answers with a tool call.
struct StopInjectingProvider {
    bus: Arc<MessageBus>,
    inner: MockProvider,
}

#[async_trait]
impl LlmProvider for StopInjectingProvider {
    fn name(&self) -> &str {
        "stop-injecting"
    }
    fn default_model(&self) -> &str {
        "mock/test-model"
    }
    async fn chat(&self, request: &ChatRequest) -> LlmResponse {
        self.bus
            .publish_inbound(InboundEnvelope::new("cli", "user", "direct", "/stop"))
            .await;
        self.inner.chat(request).await
    }
}

#[tokio::test]
async fn test_stop_mid_turn_cancels_before_tool_execution() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MessageBus::new());
    let provider = Arc::new(StopInjectingProvider {
        bus: Arc::clone(&bus),
        inner: MockProvider::new().with_tool_call("list_dir", json!({"path": "."})),
    });
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    let out = agent.process_direct("long task", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "Stopped.");

    let ack = bus.consume_outbound().await;
    assert_eq!(ack.content, "Stopping current task...");

    // The session still records the turn with the cancelled result and no
    // tool usage.
    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    let assistant = lines.last().unwrap();
    assert_eq!(assistant["content"], "Stopped.");
    assert!(assistant.get("tools_used").is_none());
}

#[tokio::test]
async fn test_system_announcement_drained_into_reply() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        MockProvider::new()
            .with_response("turn reply")
            .with_response("Background task finished: X was summarized."),
    );
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    bus.publish_inbound(InboundEnvelope::new(
        "system",
        "subagent",
        "cli:direct",
        "[Subagent 'x-sum' completed successfully]\n\nTask: summarize X\n\nResult:\nX summarized",
    ))
    .await;

    let out = agent.process_direct("what's new?", "cli:direct", "cli", "direct").await;
    assert_eq!(
        out,
        "turn reply\n\nBackground task finished: X was summarized."
    );

    // The announcement turn was recorded against the session with the
    // [System] prefix.
    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    let system_user = lines
        .iter()
        .find(|l| {
            l["role"] == "user"
                && l["content"].as_str().unwrap_or_default().starts_with("[System] ")
        })
        .expect("system-prefixed user entry");
    assert!(system_user["content"].as_str().unwrap().contains("x-sum"));
}

#[tokio::test]
async fn test_foreign_envelopes_republished_during_drain() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_response("ok"));
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    bus.publish_inbound(InboundEnvelope::new("system", "subagent", "telegram:7", "done"))
        .await;

    let out = agent.process_direct("hi", "cli:direct", "cli", "direct").await;
    assert_eq!(out, "ok");

    // The announcement for another session survived untouched.
    let back = bus.try_consume_inbound().await.unwrap();
    assert_eq!(back.channel, "system");
    assert_eq!(back.chat_id, "telegram:7");
}

#[tokio::test]
async fn test_consolidation_advances_index_and_writes_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(dir.path());
    s.memory_window = 4;

    let provider = Arc::new(MockProvider::new());
    let bus = Arc::new(MessageBus::new());
    let agent = Agent::new(bus, provider, s, None, None, Arc::new(Metrics::new()));

    // Six turns of two messages each; the window is 4, so a later turn
    // consolidates everything but the keep window.
    for i in 0..6 {
        agent
            .process_direct(&format!("message {i}"), "cli:direct", "cli", "direct")
            .await;
    }

    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    let meta = &lines[0];
    let consolidated = meta["last_consolidated"].as_u64().unwrap();
    assert!(consolidated > 0);
    assert!((consolidated as usize) <= lines.len() - 1);

    let history = std::fs::read_to_string(dir.path().join("memory").join("HISTORY.md")).unwrap();
    assert!(history.contains("Session summary"));
    assert!(history.contains("USER: message 0"));
}

struct RecordingExternalCli {
    calls: Mutex<Vec<(String, String, bool)>>,
}

#[async_trait]
impl ExternalCli for RecordingExternalCli {
    async fn run(&self, route: &ExternalCliRoute, vision_enabled: bool) -> String {
        self.calls
            .lock()
            .push((route.name.clone(), route.prompt.clone(), vision_enabled));
        format!("{} says hi", route.name)
    }
}

#[tokio::test]
async fn test_external_cli_branch_records_and_replies() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new());
    let requests = provider.recorded_requests();
    let bus = Arc::new(MessageBus::new());
    let external = Arc::new(RecordingExternalCli {
        calls: Mutex::new(Vec::new()),
    });
    let agent = Agent::new(
        bus,
        provider,
        settings(dir.path()),
        None,
        Some(external.clone()),
        Arc::new(Metrics::new()),
    );

    let out = agent
        .process_direct("review my diff --codex", "cli:direct", "cli", "direct")
        .await;
    assert_eq!(out, "codex says hi");
    assert!(requests.lock().is_empty(), "built-in loop bypassed");

    let calls = external.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "codex");
    assert_eq!(calls[0].1, "review my diff");

    let lines = last_session_lines(dir.path(), "cli_direct.jsonl");
    let assistant = lines.last().unwrap();
    assert_eq!(assistant["tools_used"][0], "codex");
}

#[tokio::test]
async fn test_worker_publishes_outbound_for_channel_message() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_response("hello from porter"));
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, Arc::clone(&bus));

    agent.run();
    bus.publish_inbound(InboundEnvelope::new("telegram", "ada", "42", "hi"))
        .await;

    let reply: OutboundEnvelope = bus.consume_outbound().await;
    assert_eq!(reply.channel, "telegram");
    assert_eq!(reply.chat_id, "42");
    assert_eq!(reply.content, "hello from porter");

    agent.stop().await;
}

#[tokio::test]
async fn test_streaming_deltas_surface_for_plain_reply() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new().with_response("streamed reply"));
    let bus = Arc::new(MessageBus::new());
    let agent = agent_with(dir.path(), provider, bus);

    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    let out = agent
        .process_direct_stream("hi", "cli:direct", "cli", "direct", &move |piece: &str| {
            sink.lock().push_str(piece)
        })
        .await;
    assert_eq!(out, "streamed reply");
    assert_eq!(*seen.lock(), "streamed reply");
}
