use thiserror::Error;

/// Unified error type for the entire Porter runtime.
///
/// Recoverable failures inside a turn (bad tool arguments, a tool that
/// returns an error string, an LLM call that failed) are *values*, not
/// errors — they flow back to the model as text. This enum covers the
/// failures that escape a turn.
#[derive(Error, Debug)]
pub enum PorterError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    // ── Bus errors ─────────────────────────────────────────────
    #[error("bus error: {0}")]
    Bus(String),

    // ── Provider errors ────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    // ── Scheduler errors ───────────────────────────────────────
    #[error("cron error: {0}")]
    Cron(String),

    #[error("invalid cron expression: {0}")]
    CronExpr(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PorterError>;
