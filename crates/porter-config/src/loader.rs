use std::path::{Path, PathBuf};

use porter_core::{PorterError, Result};
use tracing::{info, warn};

use crate::schema::PorterConfig;

/// Gateway state root: `~/.porter`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".porter")
}

/// Resolve the config path: explicit path > `PORTER_CONFIG` env >
/// `~/.porter/porter.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("PORTER_CONFIG") {
        return PathBuf::from(p);
    }
    data_dir().join("porter.toml")
}

/// Expand a leading `~` against the home directory.
pub fn expand_user_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        let rest = rest.trim_start_matches(['/', '\\']);
        return dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest);
    }
    PathBuf::from(path)
}

/// Resolve `$ENV_NAME` / `${ENV_NAME}` references in config values.
fn resolve_env_ref(value: &str) -> String {
    let Some(name) = value.strip_prefix('$') else {
        return value.to_string();
    };
    let name = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    if name.is_empty() {
        return value.to_string();
    }
    std::env::var(name).unwrap_or_default()
}

fn apply_env_overrides(mut config: PorterConfig) -> PorterConfig {
    if let Ok(v) = std::env::var("PORTER_MODEL") {
        config.agent.model = v;
    }
    if let Ok(v) = std::env::var("PORTER_WORKSPACE") {
        config.agent.workspace = v;
    }

    config.provider.api_key = resolve_env_ref(&config.provider.api_key);
    config.tools.web_search.api_key = resolve_env_ref(&config.tools.web_search.api_key);
    config.tools.transcribe.api_key = resolve_env_ref(&config.tools.transcribe.api_key);

    // API keys: config file takes priority, env is the fallback.
    if config.provider.api_key.is_empty() {
        for env in ["OPENROUTER_API_KEY", "OPENAI_API_KEY", "NVIDIA_API_KEY"] {
            if let Ok(v) = std::env::var(env) {
                if !v.is_empty() {
                    config.provider.api_key = v;
                    break;
                }
            }
        }
    }
    if config.tools.web_search.api_key.is_empty() {
        if let Ok(v) = std::env::var("BRAVE_API_KEY") {
            config.tools.web_search.api_key = v;
        }
    }
    config
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist. Validation errors abort; warnings are logged.
pub fn load(path: Option<&Path>) -> Result<PorterConfig> {
    let config_path = resolve_config_path(path);
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "loading configuration");
        let raw = std::fs::read_to_string(&config_path)?;
        toml::from_str::<PorterConfig>(&raw).map_err(|e| {
            PorterError::Config(format!("failed to parse {}: {e}", config_path.display()))
        })?
    } else {
        warn!(path = %config_path.display(), "config file not found, using defaults");
        PorterConfig::default()
    };

    let config = apply_env_overrides(config);
    match config.validate() {
        Ok(warnings) => {
            for w in &warnings {
                warn!("{w}");
            }
        }
        Err(e) => return Err(PorterError::Config(e)),
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_ref() {
        std::env::set_var("PORTER_TEST_KEY", "sekrit");
        assert_eq!(resolve_env_ref("$PORTER_TEST_KEY"), "sekrit");
        assert_eq!(resolve_env_ref("${PORTER_TEST_KEY}"), "sekrit");
        assert_eq!(resolve_env_ref("literal"), "literal");
        assert_eq!(resolve_env_ref("$PORTER_TEST_UNSET_XYZ"), "");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("porter.toml");
        std::fs::write(&path, "[agent]\nmodel = \"from-file\"\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.agent.model, "from-file");
    }

    #[test]
    fn test_load_rejects_zero_memory_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("porter.toml");
        std::fs::write(&path, "[agent]\nmemory_window = 0\n").unwrap();
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn test_expand_user_path() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_user_path("~/x"), home.join("x"));
        assert_eq!(expand_user_path("/abs/x"), PathBuf::from("/abs/x"));
    }
}
