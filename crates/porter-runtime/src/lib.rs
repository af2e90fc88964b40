//! # porter-runtime
//!
//! The message-flow engine behind the gateway: the agent turn loop, the
//! tool registry and built-in tools, filesystem-backed sessions and
//! long-term memory, the subagent manager, the cron scheduler, and the
//! heartbeat service.

pub mod agent;
pub mod context;
pub mod external;
pub mod heartbeat;
pub mod memory;
pub mod parse;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod skills;
pub mod subagent;
pub mod tools;

pub use agent::{Agent, AgentSettings};
pub use context::ContextBuilder;
pub use external::{CommandExternalCli, ExternalCli};
pub use heartbeat::{HeartbeatService, HEARTBEAT_PROMPT};
pub use memory::MemoryStore;
pub use parse::{parse_request, ExternalCliRoute, ParsedRequest};
pub use registry::ToolRegistry;
pub use scheduler::{CronJob, CronPayload, CronSchedule, CronService};
pub use session::{Session, SessionMessage, SessionStore};
pub use skills::SkillsLoader;
pub use subagent::SubagentManager;
