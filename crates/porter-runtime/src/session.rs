//! Per-conversation history, persisted as one JSONL file per session key:
//! a metadata line followed by one line per message.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use porter_core::now_iso8601;
use porter_llm::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
}

/// The full exchange history for a `(channel, chat_id)` pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: String,
    pub updated_at: String,
    /// Messages before this index have been moved to long-term history.
    /// Invariant: `last_consolidated <= messages.len()`.
    pub last_consolidated: usize,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = now_iso8601();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            last_consolidated: 0,
        }
    }

    pub fn add_message(
        &mut self,
        role: impl Into<String>,
        content: impl Into<String>,
        tools_used: Vec<String>,
    ) {
        self.messages.push(SessionMessage {
            role: role.into(),
            content: content.into(),
            timestamp: now_iso8601(),
            tools_used,
        });
        self.updated_at = now_iso8601();
    }

    /// The last `max_messages` entries shaped for the provider message
    /// array.
    pub fn history(&self, max_messages: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..]
            .iter()
            .map(|m| {
                let role = match m.role.as_str() {
                    "system" => Role::System,
                    "user" => Role::User,
                    "tool" => Role::Tool,
                    _ => Role::Assistant,
                };
                let mut msg = ChatMessage::user(m.content.clone());
                msg.role = role;
                msg
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.last_consolidated = 0;
        self.updated_at = now_iso8601();
    }
}

/// In-memory cache over the per-key session files. A first access for an
/// unseen key loads the persisted file if present, else starts empty.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        let sessions_dir = sessions_dir.into();
        if let Err(e) = std::fs::create_dir_all(&sessions_dir) {
            warn!(dir = %sessions_dir.display(), error = %e, "cannot create sessions dir");
        }
        Self {
            sessions_dir,
            cache: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, key: &str) -> Session {
        if let Some(session) = self.cache.get(key) {
            return session.clone();
        }
        let session = self.load(key);
        self.cache.insert(key.to_string(), session.clone());
        session
    }

    /// Append-replace the whole file: metadata line first, then one line
    /// per message. Failures are logged, never fatal.
    pub fn save(&mut self, session: &Session) {
        let path = self.session_path(&session.key);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let mut out = String::new();
        let meta = json!({
            "_type": "metadata",
            "created_at": session.created_at,
            "updated_at": session.updated_at,
            "last_consolidated": session.last_consolidated,
        });
        out.push_str(&meta.to_string());
        out.push('\n');
        for msg in &session.messages {
            match serde_json::to_string(msg) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => warn!(error = %e, "skipping unserializable session message"),
            }
        }

        if let Err(e) = std::fs::write(&path, out) {
            error!(session = %session.key, error = %e, "cannot save session");
            return;
        }
        self.cache.insert(session.key.clone(), session.clone());
    }

    /// Forget the in-memory entry; the next access reloads from disk.
    pub fn invalidate(&mut self, key: &str) {
        self.cache.remove(key);
    }

    fn load(&self, key: &str) -> Session {
        let mut session = Session::new(key);
        let path = self.session_path(key);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return session;
        };

        let mut first = true;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(row) = serde_json::from_str::<serde_json::Value>(line) else {
                first = false;
                continue;
            };
            if first && row.get("_type").and_then(|v| v.as_str()) == Some("metadata") {
                if let Some(v) = row.get("created_at").and_then(|v| v.as_str()) {
                    session.created_at = v.to_string();
                }
                if let Some(v) = row.get("updated_at").and_then(|v| v.as_str()) {
                    session.updated_at = v.to_string();
                }
                session.last_consolidated = row
                    .get("last_consolidated")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                first = false;
                continue;
            }
            first = false;
            if let Ok(msg) = serde_json::from_value::<SessionMessage>(row) {
                session.messages.push(msg);
            }
        }
        session
    }

    fn session_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.sessions_dir.join(format!("{safe}.jsonl"))
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_messages_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::new(dir.path());

        let mut session = store.get_or_create("telegram:42");
        session.add_message("user", "hello", vec![]);
        session.add_message("assistant", "hi there", vec!["list_dir".into()]);
        session.last_consolidated = 1;
        store.save(&session);

        store.invalidate("telegram:42");
        let reloaded = store.get_or_create("telegram:42");
        assert_eq!(reloaded.messages.len(), 2);
        assert_eq!(reloaded.messages[0].content, "hello");
        assert_eq!(reloaded.messages[1].tools_used, vec!["list_dir"]);
        assert_eq!(reloaded.last_consolidated, 1);
        assert_eq!(reloaded.created_at, session.created_at);
    }

    #[test]
    fn test_unseen_key_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::new(dir.path());
        let session = store.get_or_create("cli:direct");
        assert!(session.messages.is_empty());
        assert_eq!(session.last_consolidated, 0);
    }

    #[test]
    fn test_history_windowing() {
        let mut session = Session::new("cli:direct");
        for i in 0..10 {
            session.add_message("user", format!("msg {i}"), vec![]);
        }
        let history = session.history(3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content.as_deref(), Some("msg 7"));
    }

    #[test]
    fn test_clear_resets_consolidation_index() {
        let mut session = Session::new("cli:direct");
        session.add_message("user", "x", vec![]);
        session.last_consolidated = 1;
        session.clear();
        assert!(session.messages.is_empty());
        assert_eq!(session.last_consolidated, 0);
    }

    #[test]
    fn test_key_sanitization() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::new(dir.path());
        let session = store.get_or_create("telegram:chat/42");
        store.save(&session);
        assert!(dir.path().join("telegram_chat_42.jsonl").exists());
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli_direct.jsonl");
        std::fs::write(
            &path,
            "{\"_type\":\"metadata\",\"created_at\":\"2026-01-01T00:00:00\",\"updated_at\":\"2026-01-01T00:00:00\",\"last_consolidated\":0}\nnot json\n{\"role\":\"user\",\"content\":\"ok\",\"timestamp\":\"2026-01-01T00:00:01\"}\n",
        )
        .unwrap();
        let mut store = SessionStore::new(dir.path());
        let session = store.get_or_create("cli:direct");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "ok");
    }
}
