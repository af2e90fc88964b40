//! # porter-llm
//!
//! The LLM provider contract: role-typed chat messages in the
//! OpenAI-compatible wire shape, a provider trait with unary and streaming
//! entry points, a `reqwest`-backed implementation, and a mock provider for
//! deterministic tests.
//!
//! Provider failures never surface as `Err`: they fold into an
//! [`LlmResponse`] with `finish_reason == "error"` and a human-readable
//! `content`, which the agent loop treats as the final reply of the turn.

pub mod mock;
pub mod openai;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiCompatProvider;
pub use provider::{ChatMessage, ChatRequest, FunctionCall, LlmProvider, LlmResponse, Role, ToolCallPayload};
