//! Filesystem tools: read, write, edit, list. An optional allowed
//! directory confines every resolved path.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use porter_core::{Result, Tool, ToolContext};
use serde_json::{json, Value};

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        let rest = rest.trim_start_matches(['/', '\\']);
        return dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest);
    }
    PathBuf::from(path)
}

/// Lexical normalization: resolve `.` and `..` without touching the
/// filesystem, so containment checks hold for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve a user-supplied path, enforcing the allowed-directory fence.
pub fn resolve_path(path: &str, allowed_dir: Option<&Path>) -> std::result::Result<PathBuf, String> {
    let expanded = expand_user(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };
    let resolved = normalize(&absolute);

    if let Some(allowed) = allowed_dir {
        let allowed = normalize(allowed);
        if !resolved.starts_with(&allowed) {
            return Err("Path is outside allowed directory".to_string());
        }
    }
    Ok(resolved)
}

pub struct ReadFileTool {
    allowed_dir: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read file content from a path"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to file" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let path = args["path"].as_str().unwrap_or_default();
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        if !resolved.exists() {
            return Ok(format!("Error: File not found: {path}"));
        }
        if !resolved.is_file() {
            return Ok(format!("Error: Not a file: {path}"));
        }
        Ok(tokio::fs::read_to_string(&resolved).await.unwrap_or_default())
    }
}

pub struct WriteFileTool {
    allowed_dir: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write text content to file"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to file" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let path = args["path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        if let Some(parent) = resolved.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if tokio::fs::write(&resolved, content).await.is_err() {
            return Ok("Error: failed to write file".to_string());
        }
        Ok(format!(
            "Successfully wrote {} bytes to {path}",
            content.len()
        ))
    }
}

pub struct EditFileTool {
    allowed_dir: Option<PathBuf>,
}

impl EditFileTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Edit file by replacing old_text with new_text once"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_text": { "type": "string" },
                "new_text": { "type": "string" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let path = args["path"].as_str().unwrap_or_default();
        let old_text = args["old_text"].as_str().unwrap_or_default();
        let new_text = args["new_text"].as_str().unwrap_or_default();

        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        if !resolved.exists() {
            return Ok(format!("Error: File not found: {path}"));
        }

        let content = tokio::fs::read_to_string(&resolved).await.unwrap_or_default();
        let Some(pos) = content.find(old_text) else {
            return Ok("Error: old_text not found in file".to_string());
        };
        if content[pos + old_text.len()..].contains(old_text) {
            return Ok(
                "Warning: old_text appears multiple times; provide a more specific pattern"
                    .to_string(),
            );
        }

        let mut updated = content;
        updated.replace_range(pos..pos + old_text.len(), new_text);
        if tokio::fs::write(&resolved, updated).await.is_err() {
            return Ok("Error: failed to save edited file".to_string());
        }
        Ok(format!("Successfully edited {path}"))
    }
}

pub struct ListDirTool {
    allowed_dir: Option<PathBuf>,
}

impl ListDirTool {
    pub fn new(allowed_dir: Option<PathBuf>) -> Self {
        Self { allowed_dir }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List files and folders in directory"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<String> {
        let path = args["path"].as_str().unwrap_or_default();
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        if !resolved.exists() {
            return Ok(format!("Error: Directory not found: {path}"));
        }
        if !resolved.is_dir() {
            return Ok(format!("Error: Not a directory: {path}"));
        }

        let mut rows = Vec::new();
        let mut entries = tokio::fs::read_dir(&resolved).await?;
        while let Some(entry) = entries.next_entry().await? {
            let prefix = if entry.path().is_dir() { "[DIR] " } else { "[FILE] " };
            rows.push(format!("{prefix}{}", entry.file_name().to_string_lossy()));
        }
        rows.sort();

        if rows.is_empty() {
            return Ok("Directory is empty".to_string());
        }
        Ok(rows.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_containment() {
        let allowed = PathBuf::from("/workspace");
        assert!(resolve_path("/workspace/notes.txt", Some(&allowed)).is_ok());
        assert!(resolve_path("/workspace/sub/../notes.txt", Some(&allowed)).is_ok());
        assert_eq!(
            resolve_path("/workspace/../etc/passwd", Some(&allowed)),
            Err("Path is outside allowed directory".to_string())
        );
        assert!(resolve_path("/etc/passwd", Some(&allowed)).is_err());
        assert!(resolve_path("/etc/passwd", None).is_ok());
    }

    #[tokio::test]
    async fn test_write_then_read_then_edit() {
        let dir = tempfile::tempdir().unwrap();
        let fence = Some(dir.path().to_path_buf());
        let file = dir.path().join("a.txt").display().to_string();
        let ctx = ToolContext::default();

        let write = WriteFileTool::new(fence.clone());
        let out = write
            .execute(&json!({"path": file, "content": "hello world"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Successfully wrote 11 bytes"));

        let read = ReadFileTool::new(fence.clone());
        let out = read.execute(&json!({"path": file}), &ctx).await.unwrap();
        assert_eq!(out, "hello world");

        let edit = EditFileTool::new(fence.clone());
        let out = edit
            .execute(
                &json!({"path": file, "old_text": "world", "new_text": "porter"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.starts_with("Successfully edited"));
        let out = read.execute(&json!({"path": file}), &ctx).await.unwrap();
        assert_eq!(out, "hello porter");
    }

    #[tokio::test]
    async fn test_edit_ambiguous_old_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.txt");
        std::fs::write(&file, "aa bb aa").unwrap();
        let edit = EditFileTool::new(None);
        let out = edit
            .execute(
                &json!({"path": file.display().to_string(), "old_text": "aa", "new_text": "cc"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Warning: old_text appears multiple times"));
    }

    #[tokio::test]
    async fn test_list_dir_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("z.txt"), "x").unwrap();

        let list = ListDirTool::new(None);
        let out = list
            .execute(
                &json!({"path": dir.path().display().to_string()}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, "[DIR] sub\n[FILE] z.txt");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let read = ReadFileTool::new(None);
        let out = read
            .execute(&json!({"path": "/definitely/not/here"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.starts_with("Error: File not found:"));
    }
}
