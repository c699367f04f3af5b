use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary; when unset the usual Chrome/Chromium locations are probed.
    #[serde(default)]
    pub executable: Option<String>,
    /// Disable the sandbox. Only meant for containerized execution; also
    /// switched on automatically when a container is detected.
    #[serde(default)]
    pub containerized: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    900
}

fn default_launch_timeout_secs() -> u64 {
    20
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            containerized: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            launch_timeout_secs: default_launch_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_max_scrolls")]
    pub max_scrolls: u32,
    /// Consecutive scrolls without a new item before the feed is considered exhausted.
    #[serde(default = "default_empty_scroll_limit")]
    pub empty_scroll_limit: u32,
    #[serde(default = "default_scroll_pixels")]
    pub scroll_pixels: i64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_max_scrolls() -> u32 {
    15
}

fn default_empty_scroll_limit() -> u32 {
    3
}

fn default_scroll_pixels() -> i64 {
    1600
}

fn default_settle_ms() -> u64 {
    1500
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_scrolls: default_max_scrolls(),
            empty_scroll_limit: default_empty_scroll_limit(),
            scroll_pixels: default_scroll_pixels(),
            settle_ms: default_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Pause after every candidate that reached the platform. Backpressure
    /// against rate limiting; keep it in the seconds range.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_min_word_count")]
    pub min_word_count: usize,
    #[serde(default = "default_skip_videos")]
    pub skip_videos: bool,
    #[serde(default = "default_max_empty_discoveries")]
    pub max_empty_discoveries: u32,
    /// Hard ceiling on write attempts per invocation. Soft skips are not counted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub like_before_comment: bool,
}

fn default_cooldown_ms() -> u64 {
    8000
}

fn default_min_word_count() -> usize {
    5
}

fn default_skip_videos() -> bool {
    true
}

fn default_max_empty_discoveries() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            min_word_count: default_min_word_count(),
            skip_videos: default_skip_videos(),
            max_empty_discoveries: default_max_empty_discoveries(),
            max_attempts: default_max_attempts(),
            like_before_comment: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    /// How long a still-visible login form is tolerated before it counts as failure.
    #[serde(default = "default_login_grace_secs")]
    pub login_grace_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_login_timeout_secs() -> u64 {
    60
}

fn default_login_grace_secs() -> u64 {
    8
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: default_login_timeout_secs(),
            login_grace_secs: default_login_grace_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_generator_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generator_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generator_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_generator_max_polls")]
    pub max_polls: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_generator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generator_max_tokens() -> u32 {
    200
}

fn default_generator_temperature() -> f32 {
    0.8
}

fn default_generator_poll_interval_ms() -> u64 {
    1000
}

fn default_generator_max_polls() -> u32 {
    60
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_generator_model(),
            max_tokens: default_generator_max_tokens(),
            temperature: default_generator_temperature(),
            poll_interval_ms: default_generator_poll_interval_ms(),
            max_polls: default_generator_max_polls(),
            system_prompt: None,
        }
    }
}

/// Per-account overrides, keyed `{platform}-{sessionName}` in [`Config::accounts`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        if config.generator.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                config.generator.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn account(&self, platform: Platform, session_name: &str) -> Option<&AccountConfig> {
        self.accounts
            .get(&format!("{}-{}", platform.as_str(), session_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{
  "orchestrator": { "cooldownMs": 2500 },
  "accounts": { "instagram-default": { "handle": "rustacean", "assistantId": "asst_1" } }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.orchestrator.cooldown_ms, 2500);
        assert_eq!(cfg.orchestrator.min_word_count, 5);
        assert_eq!(cfg.discovery.empty_scroll_limit, 3);
        assert_eq!(cfg.browser.viewport_width, 1280);

        let account = cfg.account(Platform::Instagram, "default").unwrap();
        assert_eq!(account.handle.as_deref(), Some("rustacean"));
        assert_eq!(account.assistant_id.as_deref(), Some("asst_1"));
        assert!(cfg.account(Platform::X, "default").is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = Config::default();
        cfg.browser.containerized = true;
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.browser.containerized);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
