//! Long-term memory: `memory/MEMORY.md` feeds the system prompt,
//! `memory/HISTORY.md` is the append-only consolidation target.

use std::path::{Path, PathBuf};

use tracing::warn;

pub struct MemoryStore {
    memory_file: PathBuf,
    history_file: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        if let Err(e) = std::fs::create_dir_all(&memory_dir) {
            warn!(dir = %memory_dir.display(), error = %e, "cannot create memory dir");
        }
        Self {
            memory_file: memory_dir.join("MEMORY.md"),
            history_file: memory_dir.join("HISTORY.md"),
        }
    }

    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    pub fn append_history(&self, entry: &str) {
        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)
            .and_then(|mut f| {
                let newline = if entry.ends_with('\n') { "\n" } else { "\n\n" };
                write!(f, "{entry}{newline}")
            });
        if let Err(e) = result {
            warn!(error = %e, "cannot append to history file");
        }
    }

    /// The system-prompt block, empty when nothing has been remembered.
    pub fn memory_context(&self) -> String {
        let data = self.read_long_term();
        if data.trim().is_empty() {
            return String::new();
        }
        format!("## Long-term Memory\n{data}")
    }

    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }
}
