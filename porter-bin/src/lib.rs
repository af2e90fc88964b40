//! # porter-bin
//!
//! Command-line surface for the Porter gateway.
//!
//! ## Commands
//!
//! - `porter gateway` — Run the gateway until interrupted
//! - `porter agent -m MSG` — One-shot turn against the same core
//! - `porter cron list|add|remove` — Manage scheduled jobs
//! - `porter status` — Show configuration and scheduler state

pub mod commands;
pub mod gateway;

pub use commands::Cli;
