use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::now_iso8601;

/// The reserved channel for synthetic gateway traffic: the shutdown
/// sentinel and subagent/cron completion announcements.
pub const SYSTEM_CHANNEL: &str = "system";

/// Content of the sentinel envelope that unblocks and stops the agent worker.
pub const SYSTEM_STOP: &str = "stop";

/// A message arriving from a channel adapter (or synthesized by the
/// gateway itself on the `system` channel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: String,
    /// Local paths of media attachments (audio files for transcription).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl InboundEnvelope {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: now_iso8601(),
            media: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// The sentinel that stops the agent worker.
    pub fn stop_sentinel() -> Self {
        Self::new(SYSTEM_CHANNEL, SYSTEM_STOP, SYSTEM_STOP, SYSTEM_STOP)
    }

    /// Key identifying the conversation this envelope belongs to.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    pub fn is_stop_sentinel(&self) -> bool {
        self.channel == SYSTEM_CHANNEL && self.content == SYSTEM_STOP
    }
}

/// A reply handed to the delivering channel adapter. `channel` names the
/// adapter; an all-empty envelope is the dispatcher wake sentinel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl OutboundEnvelope {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key() {
        let msg = InboundEnvelope::new("telegram", "u1", "chat42", "hi");
        assert_eq!(msg.session_key(), "telegram:chat42");
    }

    #[test]
    fn test_stop_sentinel() {
        let msg = InboundEnvelope::stop_sentinel();
        assert!(msg.is_stop_sentinel());
        assert!(!InboundEnvelope::new("system", "subagent", "cli:direct", "done").is_stop_sentinel());
        assert!(!InboundEnvelope::new("telegram", "u", "c", "stop").is_stop_sentinel());
    }

    #[test]
    fn test_envelope_serde_roundtrip() {
        let mut msg = InboundEnvelope::new("slack", "u2", "c9", "hello");
        msg.media.push("/tmp/a.ogg".into());
        let json = serde_json::to_string(&msg).unwrap();
        let restored: InboundEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.session_key(), "slack:c9");
        assert_eq!(restored.media, vec!["/tmp/a.ogg".to_string()]);
    }
}
