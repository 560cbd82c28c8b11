use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

// Section types owned by the core crate, embedded as-is
use npubdir_core::{RenderConfig, RetryPolicy};

const APP_DIR: &str = "npubdir";
const TELEGRAM_TOKEN_ENV: &str = "NPUBDIR_TELEGRAM_TOKEN";
const GITHUB_TOKEN_ENV: &str = "NPUBDIR_GITHUB_TOKEN";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub directory: RenderConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// The group whose messages are collected and where the directory is pinned.
    pub chat_id: i64,
    /// Forum topic inside `chat_id`; `None` means the whole chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
        }
    }
}

impl DatabaseConfig {
    fn default_url() -> String {
        dirs::home_dir().map_or_else(
            || "sqlite://npubdir.db?mode=rwc".to_string(),
            |home| {
                format!(
                    "sqlite://{}?mode=rwc",
                    home.join(APP_DIR).join("npubdir.db").display()
                )
            },
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublishConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// `owner/name` of the repository holding the JSON file.
    #[serde(default)]
    pub repo: String,
    #[serde(default = "PublishConfig::default_path")]
    pub path: String,
    #[serde(default = "PublishConfig::default_branch")]
    pub branch: String,
    /// Compare-and-write cycles before giving up; falls back to `retry.max_attempts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            repo: String::new(),
            path: Self::default_path(),
            branch: Self::default_branch(),
            max_attempts: None,
        }
    }
}

impl PublishConfig {
    fn default_path() -> String {
        "directory.json".to_string()
    }

    fn default_branch() -> String {
        "main".to_string()
    }

    /// Retry policy for publication, derived from the shared one.
    #[must_use]
    pub fn retry_policy(&self, base: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            ..*base
        }
    }
}

impl Config {
    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::default_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'npubdir init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {e}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Replace secrets with values from `lookup` (the environment in
    /// production) when present and non-empty.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(token) = lookup(GITHUB_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.publish.token = token;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.directory.limit_bytes < 256 {
            anyhow::bail!(
                "directory.limit_bytes must be at least 256, got {}",
                self.directory.limit_bytes
            );
        }
        if self.publish.enabled {
            if self.publish.token.is_empty() {
                anyhow::bail!("publish.enabled is set but no publish.token (or {GITHUB_TOKEN_ENV}) was given");
            }
            if self.publish.repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                anyhow::bail!(
                    "publish.repo must look like 'owner/name', got '{}'",
                    self.publish.repo
                );
            }
        }
        Ok(())
    }

    fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(APP_DIR))
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let config_path = Self::ensure_config_dir()?.join("config.json");
        Self::create_config_at(&config_path)?;
        Ok(config_path)
    }

    /// Write the starter config to `path`, creating its parent directories.
    /// An existing file is never overwritten.
    pub fn create_config_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                path.display()
            );
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, Self::template())?;
        Ok(())
    }

    /// Starter config written by `npubdir init`.
    #[must_use]
    pub const fn template() -> &'static str {
        r#"{
  "telegram": {
    "token": "123456:your-bot-token-here",
    "chat_id": -1001234567890,
    "thread_id": null
  },
  "directory": {
    "title": "Nostr directory",
    "limit_bytes": 4000,
    "deep_link_base": "https://njump.me/"
  },
  "publish": {
    "enabled": false,
    "token": "your-github-token-here",
    "repo": "owner/website",
    "path": "directory.json",
    "branch": "main"
  },
  "retry": {
    "max_attempts": 4,
    "initial_delay_ms": 500,
    "max_delay_ms": 8000
  }
}"#
    }
}
