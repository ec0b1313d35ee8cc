use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::forum::categories::Category;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    pub forum: ForumConfig,
    #[serde(default = "default_webhook_config")]
    pub webhook: WebhookConfig,
    #[serde(default = "default_store_config")]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// Feature gate: nothing connects or runs while this is false.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Include the error chain in replies when a command fails.
    #[serde(default)]
    pub verbose_errors: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            api_base: default_api_base(),
            verbose_errors: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForumConfig {
    pub base_url: String,
    /// Subfolder the forum is mounted under (e.g. "/forum"), stripped before route recognition.
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_username: Option<String>,
    /// Fixed slug/ID table; when non-empty the forum API is not queried.
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl ForumConfig {
    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:3080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("bridge.db")
}

fn default_webhook_config() -> WebhookConfig {
    WebhookConfig {
        listen: default_listen(),
        secret: None,
    }
}

fn default_store_config() -> StoreConfig {
    StoreConfig {
        database_path: default_db_path(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;

        if config.slack.bot_token.is_empty() {
            if let Ok(token) = std::env::var("SLACK_BOT_TOKEN") {
                config.slack.bot_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    fn validate(&self) -> Result<()> {
        if self.slack.enabled && self.slack.bot_token.is_empty() {
            anyhow::bail!(
                "slack.enabled is true but no bot token is configured \
                 (set slack.bot_token or SLACK_BOT_TOKEN)"
            );
        }
        url::Url::parse(&self.forum.base_url)
            .with_context(|| format!("Invalid forum.base_url: {}", self.forum.base_url))?;
        Ok(())
    }
}
