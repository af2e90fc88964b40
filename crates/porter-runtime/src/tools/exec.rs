//! Shell execution with a per-call timeout, a deny-pattern guard, and
//! optional workspace confinement.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use porter_core::{Result, Tool, ToolContext};
use regex::Regex;
use serde_json::{json, Value};

use super::fs::resolve_path;

const MAX_OUTPUT_LEN: usize = 10_000;

fn deny_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\brm\s+-[rf]{1,2}\b",
            r"(?i)\bdel\s+/[fq]\b",
            r"(?i)\brmdir\s+/s\b",
            r"(?i)\b(format|mkfs|diskpart|shutdown|reboot|poweroff)\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

pub struct ExecTool {
    timeout: Duration,
    working_dir: PathBuf,
    restrict_to_workspace: bool,
}

impl ExecTool {
    pub fn new(timeout_secs: u64, working_dir: PathBuf, restrict_to_workspace: bool) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            working_dir,
            restrict_to_workspace,
        }
    }

    fn guard_command(&self, command: &str, cwd: &std::path::Path) -> Option<String> {
        for re in deny_patterns() {
            if re.is_match(command) {
                return Some("Error: Command blocked by safety guard".to_string());
            }
        }
        if self.restrict_to_workspace {
            if command.contains("../") || command.contains("..\\") {
                return Some(
                    "Error: Command blocked by safety guard (path traversal detected)".to_string(),
                );
            }
            if !cwd.starts_with(&self.working_dir) {
                return Some("Error: Command blocked (working dir outside workspace)".to_string());
            }
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn description(&self) -> &str {
        "Execute shell command and return output"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "working_dir": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let command = args["command"].as_str().unwrap_or_default();
        let requested_dir = args["working_dir"].as_str().unwrap_or_default();
        let cwd = if requested_dir.is_empty() {
            self.working_dir.clone()
        } else {
            match resolve_path(requested_dir, None) {
                Ok(p) => p,
                Err(e) => return Ok(format!("Error: {e}")),
            }
        };

        if let Some(blocked) = self.guard_command(command, &cwd) {
            return Ok(blocked);
        }

        #[cfg(unix)]
        let mut child = tokio::process::Command::new("sh");
        #[cfg(unix)]
        child.arg("-c").arg(command);
        #[cfg(windows)]
        let mut child = tokio::process::Command::new("cmd");
        #[cfg(windows)]
        child.arg("/C").arg(command);

        let spawned = child
            .current_dir(&cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn();

        let spawned = match spawned {
            Ok(c) => c,
            Err(e) => return Ok(format!("Error: failed to spawn command: {e}")),
        };

        let waited = tokio::time::timeout(self.timeout, spawned.wait_with_output()).await;
        let output = match waited {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Ok(format!("Error: {e}")),
            Err(_) => {
                return Ok(
                    "Error: command timed out (process may continue in background)".to_string(),
                )
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        if !output.status.success() {
            text.push_str(&format!(
                "\nExit code: {}",
                output.status.code().unwrap_or(-1)
            ));
        }
        if text.len() > MAX_OUTPUT_LEN {
            let mut cut = MAX_OUTPUT_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... (truncated)");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &std::path::Path, restrict: bool) -> ExecTool {
        ExecTool::new(10, dir.to_path_buf(), restrict)
    }

    #[tokio::test]
    async fn test_basic_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path(), false)
            .execute(&json!({"command": "echo hello"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path(), false)
            .execute(&json!({"command": "exit 3"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("Exit code: 3"));
    }

    #[tokio::test]
    async fn test_deny_pattern_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path(), false)
            .execute(&json!({"command": "rm -rf /"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, "Error: Command blocked by safety guard");
    }

    #[tokio::test]
    async fn test_traversal_blocked_when_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path(), true)
            .execute(&json!({"command": "cat ../secret"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("path traversal detected"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecTool::new(1, dir.path().to_path_buf(), false);
        let out = tool
            .execute(&json!({"command": "sleep 5"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("timed out"));
    }
}
