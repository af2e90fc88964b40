//! External CLI trampoline: `--codex` / `--gemini` suffixed prompts are
//! handed to an installed CLI instead of the built-in loop. Only the
//! handoff contract lives here; installing and authenticating the CLIs is
//! the operator's business.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::parse::ExternalCliRoute;
use crate::tools::is_headless_server;

#[async_trait]
pub trait ExternalCli: Send + Sync {
    /// Run the routed prompt, returning the text to deliver to the user.
    async fn run(&self, route: &ExternalCliRoute, vision_enabled: bool) -> String;
}

/// Shells out to the `codex` / `gemini` binaries in the workspace
/// directory.
pub struct CommandExternalCli {
    workspace: PathBuf,
    timeout: Duration,
}

impl CommandExternalCli {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            timeout: Duration::from_secs(600),
        }
    }

    fn command_line(route: &ExternalCliRoute) -> Vec<String> {
        let prompt = shell_quote(&route.prompt);
        match route.name.as_str() {
            "codex" => vec![
                format!("codex exec --skip-git-repo-check {prompt}"),
                format!("codex {prompt}"),
            ],
            _ => vec![
                format!("gemini -p {prompt}"),
                format!("gemini {prompt}"),
            ],
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Drop ANSI escape sequences so channel output stays plain text.
pub(crate) fn strip_ansi_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            for follow in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&follow) {
                    break;
                }
            }
        }
    }
    out
}

fn looks_like_usage_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["usage:", "unknown command", "unknown option", "invalid option", "did you mean"]
        .iter()
        .any(|needle| lower.contains(needle))
}

async fn run_in_dir(dir: &Path, command: &str, timeout: Duration) -> (bool, i32, String) {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) => return (false, -1, format!("failed to spawn: {e}")),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (
                output.status.success(),
                output.status.code().unwrap_or(-1),
                text,
            )
        }
        Ok(Err(e)) => (false, -1, e.to_string()),
        Err(_) => (false, -1, "command timed out".to_string()),
    }
}

#[async_trait]
impl ExternalCli for CommandExternalCli {
    async fn run(&self, route: &ExternalCliRoute, vision_enabled: bool) -> String {
        if route.prompt.is_empty() {
            return format!("Please include a prompt before {}.", route.suffix);
        }
        if vision_enabled && is_headless_server() {
            return "Vision is unavailable on headless server (DISPLAY/WAYLAND_DISPLAY not set)."
                .to_string();
        }

        info!(cli = %route.name, "routing prompt to external CLI");
        let candidates = Self::command_line(route);
        let mut last_output = String::new();
        let mut last_code = -1;

        for (i, command) in candidates.iter().enumerate() {
            let (ok, code, output) = run_in_dir(&self.workspace, command, self.timeout).await;
            if ok {
                let text = strip_ansi_sequences(&output).trim().to_string();
                return if text.is_empty() {
                    format!("{} completed with no output.", route.name)
                } else {
                    text
                };
            }
            last_output = output;
            last_code = code;
            if i + 1 < candidates.len() && looks_like_usage_error(&last_output) {
                continue;
            }
            break;
        }

        let mut error = strip_ansi_sequences(&last_output).trim().to_string();
        if error.is_empty() {
            error = format!("Command failed with exit code {last_code}.");
        }
        format!("Failed to run {} for this request.\n{error}", route.name)
    }
}
