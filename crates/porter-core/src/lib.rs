//! # porter-core
//!
//! Core types, traits, and primitives for the Porter gateway runtime.
//! This crate defines the shared vocabulary used by every other crate in
//! the workspace: message envelopes, the bounded lock-free queue, the
//! message bus that connects channel adapters to the agent worker, and
//! the tool contract.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod schema;
pub mod tool;
pub mod util;

pub use bus::{MessageBus, OutboundSubscriber};
pub use envelope::{InboundEnvelope, OutboundEnvelope, SYSTEM_CHANNEL, SYSTEM_STOP};
pub use error::{PorterError, Result};
pub use metrics::Metrics;
pub use queue::ArrayQueue;
pub use tool::{Tool, ToolCall, ToolContext};
pub use util::{now_iso8601, now_ms, random_id};
