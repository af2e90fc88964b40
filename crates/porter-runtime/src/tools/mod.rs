//! Built-in tools. Each one is a [`porter_core::Tool`] implementation;
//! per-turn context (active channel/chat, vision capability) arrives via
//! the [`porter_core::ToolContext`] argument rather than stored state.

pub mod cron;
pub mod exec;
pub mod fs;
pub mod message;
pub mod screen;
pub mod spawn;
pub mod transcribe;
pub mod web;

pub use cron::CronTool;
pub use exec::ExecTool;
pub use fs::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use message::MessageTool;
pub use screen::{is_headless_server, ScreenCaptureTool};
pub use spawn::SpawnTool;
pub use transcribe::TranscribeTool;
pub use web::{WebFetchTool, WebSearchTool};
