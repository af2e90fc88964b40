//! # porter-config
//!
//! TOML configuration for the gateway: schema with serde defaults, a loader
//! that resolves `~/.porter/porter.toml` (overridable via `PORTER_CONFIG`),
//! applies environment overrides, and validates before anything starts.

pub mod loader;
pub mod schema;

pub use loader::{data_dir, load, resolve_config_path};
pub use schema::PorterConfig;
