//! Screen capture. Gated on the per-turn vision capability and refused on
//! headless servers.

use std::path::PathBuf;

use async_trait::async_trait;
use porter_core::{now_ms, Result, Tool, ToolContext};
use serde_json::{json, Value};

/// No display server reachable: `DISPLAY` and `WAYLAND_DISPLAY` both unset
/// (non-Windows only).
pub fn is_headless_server() -> bool {
    if cfg!(windows) {
        return false;
    }
    let unset = |name: &str| std::env::var(name).map(|v| v.is_empty()).unwrap_or(true);
    unset("DISPLAY") && unset("WAYLAND_DISPLAY")
}

async fn command_exists(command: &str) -> bool {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {command}"))
        .output()
        .await
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false)
}

pub struct ScreenCaptureTool {
    output_dir: PathBuf,
}

impl ScreenCaptureTool {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for ScreenCaptureTool {
    fn name(&self) -> &str {
        "screen_capture"
    }
    fn description(&self) -> &str {
        "Capture the current screen and save as PNG. Returns the saved file path."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        if !ctx.vision_enabled {
            return Ok(
                "Error: vision tools are disabled for this request. Add --vision in your message."
                    .to_string(),
            );
        }
        if is_headless_server() {
            return Ok(
                "Error: vision is unavailable on headless server (DISPLAY/WAYLAND_DISPLAY not set)."
                    .to_string(),
            );
        }

        let out = match args["path"].as_str().filter(|p| !p.trim().is_empty()) {
            Some(user_path) => PathBuf::from(user_path.trim()),
            None => self.output_dir.join(format!("screen_{}.png", now_ms())),
        };
        if let Some(parent) = out.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let quoted = out.display().to_string().replace('\'', "'\\''");
        let command = if command_exists("grim").await {
            format!("grim '{quoted}'")
        } else if command_exists("scrot").await {
            format!("scrot '{quoted}'")
        } else {
            return Ok("Error: no screenshot tool available (grim/scrot).".to_string());
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await;
        match output {
            Ok(o) if o.status.success() => {}
            Ok(o) => {
                let err = String::from_utf8_lossy(&o.stderr).trim().to_string();
                let err = if err.is_empty() {
                    "screenshot command failed".to_string()
                } else {
                    err
                };
                return Ok(format!("Error: {err}"));
            }
            Err(e) => return Ok(format!("Error: {e}")),
        }

        let Ok(meta) = tokio::fs::metadata(&out).await else {
            return Ok("Error: screenshot file was not created".to_string());
        };
        Ok(json!({
            "path": out.display().to_string(),
            "bytes": meta.len(),
            "format": "png",
        })
        .to_string())
    }
}
