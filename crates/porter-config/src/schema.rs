use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorterConfig {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub tools: ToolsConfig,
    pub channels: ChannelsConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub workspace: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// Upper bound on LLM-call + tool-execute iterations per turn.
    pub max_iterations: u32,
    /// How many session messages stay in the working context before
    /// consolidation kicks in. Must be at least 1.
    pub memory_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: "~/.porter/workspace".into(),
            model: "openai/gpt-4o-mini".into(),
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
            max_iterations: 10,
            memory_window: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Literal key or `$ENV_NAME` / `${ENV_NAME}` reference.
    pub api_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub restrict_to_workspace: bool,
    pub exec: ExecConfig,
    pub web_search: WebSearchConfig,
    pub transcribe: TranscribeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub timeout_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub api_key: String,
    pub max_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeConfig {
    pub api_key: String,
    /// OpenAI-compatible base URL; empty disables transcription.
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: String::new(),
            model: String::new(),
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    pub allow_from: Vec<String>,
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    pub bridge_url: String,
    pub bridge_token: String,
    pub allow_from: Vec<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bridge_url: "ws://localhost:3001".into(),
            bridge_token: String::new(),
            allow_from: Vec::new(),
        }
    }
}

impl PorterConfig {
    /// Validate the loaded config. Returns warnings for degraded setups;
    /// errors abort startup.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        if self.agent.memory_window == 0 {
            return Err("agent.memory_window must be at least 1".to_string());
        }
        if self.agent.max_iterations == 0 {
            return Err("agent.max_iterations must be at least 1".to_string());
        }

        let mut warnings = Vec::new();
        if self.provider.api_key.is_empty() {
            warnings.push("provider.api_key is not set; LLM calls will fail".to_string());
        }
        if self.tools.web_search.api_key.is_empty() {
            warnings.push("tools.web_search.api_key is not set; web_search disabled".to_string());
        }
        Ok(warnings)
    }
}
