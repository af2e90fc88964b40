//! Skill discovery: workspace `skills/<name>/SKILL.md` first, then a
//! builtin skills directory; first match wins per name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub path: PathBuf,
    pub source: &'static str,
}

pub struct SkillsLoader {
    workspace_skills: PathBuf,
    builtin_skills: PathBuf,
}

impl SkillsLoader {
    pub fn new(workspace: &Path, builtin_skills: impl Into<PathBuf>) -> Self {
        Self {
            workspace_skills: workspace.join("skills"),
            builtin_skills: builtin_skills.into(),
        }
    }

    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();
        let mut seen = HashSet::new();
        Self::scan(&self.workspace_skills, "workspace", &mut skills, &mut seen);
        Self::scan(&self.builtin_skills, "builtin", &mut skills, &mut seen);
        skills
    }

    fn scan(
        dir: &Path,
        source: &'static str,
        skills: &mut Vec<SkillInfo>,
        seen: &mut HashSet<String>,
    ) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut found: Vec<SkillInfo> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let skill_file = e.path().join("SKILL.md");
                if !skill_file.exists() || seen.contains(&name) {
                    return None;
                }
                Some(SkillInfo {
                    name,
                    path: skill_file,
                    source,
                })
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        for skill in found {
            seen.insert(skill.name.clone());
            skills.push(skill);
        }
    }

    pub fn load_skill(&self, name: &str) -> String {
        for base in [&self.workspace_skills, &self.builtin_skills] {
            let path = base.join(name).join("SKILL.md");
            if let Ok(content) = std::fs::read_to_string(&path) {
                return content;
            }
        }
        String::new()
    }

    /// The `<skills>` catalog block injected into the system prompt.
    pub fn skills_summary(&self) -> String {
        let skills = self.list_skills();
        if skills.is_empty() {
            return String::new();
        }
        let mut out = String::from("<skills>\n");
        for skill in &skills {
            out.push_str("  <skill available=\"true\">\n");
            out.push_str(&format!("    <name>{}</name>\n", skill.name));
            out.push_str(&format!(
                "    <description>{}</description>\n",
                self.describe(&skill.name)
            ));
            out.push_str(&format!(
                "    <location>{}</location>\n",
                skill.path.display()
            ));
            out.push_str("  </skill>\n");
        }
        out.push_str("</skills>");
        out
    }

    fn describe(&self, name: &str) -> String {
        let content = self.load_skill(name);
        if content.is_empty() {
            return name.to_string();
        }
        let Ok(re) = Regex::new(r"description:\s*(.+)") else {
            return name.to_string();
        };
        re.captures(&content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| name.to_string())
    }
}
