use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PanelConfig {
    #[serde(default = "default_debug_mode")]
    pub debug_mode: bool,
    #[serde(default = "default_bar_width")]
    pub bar_width: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// 0 keeps sessions until the process exits.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub app_token: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            debug_mode: default_debug_mode(),
            bar_width: default_bar_width(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }
}

impl OpenAiConfig {
    /// The config file wins over the environment; blank values count as unset.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env_value.filter(|key| !key.trim().is_empty()))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).context("failed to parse config toml")?;
        if cfg.panel.bar_width == 0 {
            bail!("panel.bar_width must be at least 1");
        }
        if cfg.openai.model.trim().is_empty() {
            bail!("openai.model must not be empty");
        }
        Ok(cfg)
    }

    pub fn slack(&self) -> Result<&SlackConfig> {
        let slack = self
            .slack
            .as_ref()
            .context("[slack] section is required for the slack surface")?;
        if slack.bot_token.trim().is_empty() || slack.app_token.trim().is_empty() {
            bail!("slack.bot_token and slack.app_token are required");
        }
        Ok(slack)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_debug_mode() -> bool {
    true
}

fn default_bar_width() -> usize {
    20
}

fn default_session_idle_secs() -> u64 {
    3600
}
