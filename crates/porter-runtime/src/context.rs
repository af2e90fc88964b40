//! Assembles the provider message array for a turn: system prompt
//! (identity, workspace bootstrap files, long-term memory, active skills,
//! skills catalog, current-session suffix), history, then the user message.

use std::path::{Path, PathBuf};

use porter_core::now_iso8601;
use porter_llm::ChatMessage;

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

pub struct ContextBuilder {
    workspace: PathBuf,
    memory: MemoryStore,
    skills: SkillsLoader,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new(&workspace);
        let skills = SkillsLoader::new(&workspace, PathBuf::from("skills"));
        Self {
            workspace,
            memory,
            skills,
        }
    }

    pub fn build_system_prompt(&self, active_skills: &[String]) -> String {
        let mut parts = vec![self.identity()];

        let bootstrap = self.load_bootstrap_files();
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }

        let memory = self.memory.memory_context();
        if !memory.is_empty() {
            parts.push(format!("# Memory\n\n{memory}"));
        }

        if !active_skills.is_empty() {
            let mut block = String::from("# Active Skills\n\n");
            for name in active_skills {
                let content = self.skills.load_skill(name);
                if content.is_empty() {
                    continue;
                }
                block.push_str(&format!("## Skill: {name}\n\n{content}\n\n"));
            }
            parts.push(block.trim_end().to_string());
        }

        let catalog = self.skills.skills_summary();
        if !catalog.is_empty() {
            parts.push(format!(
                "# Skills\n\nRead the skill file when needed using read_file.\n\n{catalog}"
            ));
        }

        parts.join("\n\n---\n\n")
    }

    /// `[system, ...history, user]` for one provider round.
    pub fn build_messages(
        &self,
        history: Vec<ChatMessage>,
        current_message: &str,
        active_skills: &[String],
        channel: &str,
        chat_id: &str,
    ) -> Vec<ChatMessage> {
        let mut system = self.build_system_prompt(active_skills);
        if !channel.is_empty() && !chat_id.is_empty() {
            system.push_str(&format!(
                "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
            ));
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history);
        messages.push(ChatMessage::user(current_message));
        messages
    }

    /// Append the assistant entry for the next round, carrying its
    /// tool-call requests.
    pub fn add_assistant_message(
        messages: &mut Vec<ChatMessage>,
        content: &str,
        tool_calls: &[porter_core::ToolCall],
        reasoning: &str,
    ) {
        let reasoning = (!reasoning.is_empty()).then(|| reasoning.to_string());
        messages.push(ChatMessage::assistant_with_tools(content, tool_calls, reasoning));
    }

    /// Append one tool-result entry matching a prior tool call.
    pub fn add_tool_result(messages: &mut Vec<ChatMessage>, id: &str, name: &str, result: &str) {
        messages.push(ChatMessage::tool_result(id, name, result));
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn identity(&self) -> String {
        format!(
            "# Porter\n\n\
             You are Porter, a personal AI assistant gateway.\n\
             You can read/write/edit files, execute shell commands, fetch web content, \
             capture screenshots, schedule jobs, and send messages across channels.\n\n\
             ## Current Time\n{}\n\n\
             ## Workspace\n{}\n\
             - Long-term memory: {}\n\
             - History log: {}\n\
             - Skills: {}\n\n\
             Respond directly to users. Use the message tool only for channel routing.",
            now_iso8601(),
            self.workspace.display(),
            self.memory.memory_file().display(),
            self.memory.history_file().display(),
            self.workspace.join("skills").display(),
        )
    }

    fn load_bootstrap_files(&self) -> String {
        let mut blocks = Vec::new();
        for file in BOOTSTRAP_FILES {
            let path = self.workspace.join(file);
            if let Ok(content) = std::fs::read_to_string(&path) {
                blocks.push(format!("## {file}\n\n{content}"));
            }
        }
        blocks.join("\n\n")
    }
}
