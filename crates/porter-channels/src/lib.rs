//! # porter-channels
//!
//! The channel adapter contract. Concrete adapters (Telegram, Slack,
//! WhatsApp bridge, Email) live outside the core: they implement
//! [`Channel`], publish inbound envelopes onto the bus themselves, and the
//! [`ChannelManager`] wires their `send` side to the outbound dispatcher.

pub mod adapter;

pub use adapter::{Channel, ChannelManager};
