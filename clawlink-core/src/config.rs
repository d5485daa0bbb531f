// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates the selected connector's section and redacts secrets in Debug output
use crate::paths::{self, expand_tilde};
use crate::traits::ChannelKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connector used by `run` and `verify` unless overridden on the command line
    #[serde(default = "default_connector")]
    pub connector: ChannelKind,
    /// Overrides the XDG data directory (identity database, logs, matrix store)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<WhatsAppConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector: default_connector(),
            data_dir: None,
            telegram: None,
            slack: None,
            matrix: None,
            whatsapp: None,
        }
    }
}

fn default_connector() -> ChannelKind {
    ChannelKind::Terminal
}

fn default_device_name() -> String {
    "clawlink".to_string()
}

fn default_node_binary() -> String {
    "node".to_string()
}

fn default_npm_binary() -> String {
    "npm".to_string()
}

fn default_bridge_dependencies() -> Vec<String> {
    vec![
        "@whiskeysockets/baileys".to_string(),
        "qrcode-terminal".to_string(),
        "pino".to_string(),
    ]
}

// ─── TelegramConfig ─────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Binds the gate at startup instead of asking for a verification code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_user_id: Option<i64>,
    /// Bot API server to talk to instead of api.telegram.org (self-hosted Bot API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("authorized_user_id", &self.authorized_user_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

// ─── SlackConfig ────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Socket Mode app-level token (xapp-...)
    pub app_token: String,
    /// Bot token used for Web API calls (xoxb-...)
    pub bot_token: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("app_token", &"[REDACTED]")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

// ─── MatrixConfig ───────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub home_server: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("home_server", &self.home_server)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("device_name", &self.device_name)
            .finish()
    }
}

// ─── WhatsAppConfig ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Path to the helper script run with `node`
    pub bridge_script: String,
    #[serde(default = "default_node_binary")]
    pub node_binary: String,
    #[serde(default = "default_npm_binary")]
    pub npm_binary: String,
    /// Node packages the helper needs; checked and installed before first spawn
    #[serde(default = "default_bridge_dependencies")]
    pub dependencies: Vec<String>,
}

impl WhatsAppConfig {
    pub fn new(bridge_script: impl Into<String>) -> Self {
        Self {
            bridge_script: bridge_script.into(),
            node_binary: default_node_binary(),
            npm_binary: default_npm_binary(),
            dependencies: default_bridge_dependencies(),
        }
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. CLAWLINK_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory)
    /// 3. ~/.config/clawlink/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("CLAWLINK_CONFIG_PATH") {
            let path = PathBuf::from(expand_tilde(&env_path));
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "CLAWLINK_CONFIG_PATH does not exist, ignoring");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, then apply
    /// environment overrides. Validation of a connector section happens
    /// separately in [`Config::validate_for`].
    pub fn load() -> Result<Self> {
        let config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.with_env_overrides()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Apply environment variable overrides. A platform section is created
    /// when its primary credential arrives only through the environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(val) = std::env::var("CLAWLINK_CONNECTOR") {
            self.connector = val
                .parse()
                .with_context(|| format!("CLAWLINK_CONNECTOR is not a known channel: {}", val))?;
        }
        if let Ok(val) = std::env::var("CLAWLINK_DATA_DIR") {
            self.data_dir = Some(val);
        }

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            match self.telegram {
                Some(ref mut telegram) => telegram.bot_token = token,
                None => {
                    self.telegram = Some(TelegramConfig {
                        bot_token: token,
                        authorized_user_id: None,
                        api_url: None,
                    })
                }
            }
        }
        if let Some(ref mut telegram) = self.telegram {
            if let Ok(val) = std::env::var("TELEGRAM_AUTHORIZED_USER_ID") {
                let id = val.trim().parse::<i64>().with_context(|| {
                    format!("TELEGRAM_AUTHORIZED_USER_ID must be a numeric user id, got: {}", val)
                })?;
                telegram.authorized_user_id = Some(id);
            }
            if let Ok(val) = std::env::var("TELEGRAM_API_URL") {
                telegram.api_url = Some(val);
            }
        }

        let slack_app = std::env::var("SLACK_APP_TOKEN").ok();
        let slack_bot = std::env::var("SLACK_BOT_TOKEN").ok();
        match (self.slack.as_mut(), slack_app, slack_bot) {
            (Some(slack), app, bot) => {
                if let Some(app) = app {
                    slack.app_token = app;
                }
                if let Some(bot) = bot {
                    slack.bot_token = bot;
                }
            }
            (None, Some(app_token), Some(bot_token)) => {
                self.slack = Some(SlackConfig {
                    app_token,
                    bot_token,
                });
            }
            _ => {}
        }

        if self.matrix.is_none() {
            if let (Ok(home_server), Ok(user_id)) = (
                std::env::var("MATRIX_HOME_SERVER"),
                std::env::var("MATRIX_USER_ID"),
            ) {
                self.matrix = Some(MatrixConfig {
                    home_server,
                    user_id,
                    password: None,
                    access_token: None,
                    device_name: default_device_name(),
                });
            }
        }
        if let Some(ref mut matrix) = self.matrix {
            if let Ok(val) = std::env::var("MATRIX_HOME_SERVER") {
                matrix.home_server = val;
            }
            if let Ok(val) = std::env::var("MATRIX_USER_ID") {
                matrix.user_id = val;
            }
            if let Ok(val) = std::env::var("MATRIX_PASSWORD") {
                matrix.password = Some(val);
            }
            if let Ok(val) = std::env::var("MATRIX_ACCESS_TOKEN") {
                matrix.access_token = Some(val);
            }
        }

        if let Ok(script) = std::env::var("WHATSAPP_BRIDGE_SCRIPT") {
            match self.whatsapp {
                Some(ref mut whatsapp) => whatsapp.bridge_script = script,
                None => self.whatsapp = Some(WhatsAppConfig::new(script)),
            }
        }
        if let Some(ref mut whatsapp) = self.whatsapp {
            whatsapp.bridge_script = expand_tilde(&whatsapp.bridge_script);
        }

        if let Some(ref dir) = self.data_dir {
            self.data_dir = Some(expand_tilde(dir));
        }

        Ok(self)
    }

    /// Data directory honoring the config override
    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => paths::data_dir(),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Matrix SDK sqlite state (sync token, crypto store)
    pub fn matrix_store_dir(&self) -> PathBuf {
        self.data_dir().join("matrix_store")
    }

    /// Check that the section needed by `channel` is present and usable
    pub fn validate_for(&self, channel: ChannelKind) -> Result<()> {
        match channel {
            ChannelKind::Terminal => Ok(()),
            ChannelKind::Telegram => {
                let telegram = self.telegram.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "telegram section is required (set in config.toml or TELEGRAM_BOT_TOKEN env var)"
                    )
                })?;
                if telegram.bot_token.trim().is_empty() {
                    anyhow::bail!("telegram.bot_token must not be empty");
                }
                if let Some(url) = telegram.api_url.as_deref() {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        anyhow::bail!("telegram.api_url must be an http(s) URL, got: {}", url);
                    }
                }
                Ok(())
            }
            ChannelKind::Slack => {
                let slack = self.slack.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "slack section is required (set in config.toml or SLACK_APP_TOKEN/SLACK_BOT_TOKEN env vars)"
                    )
                })?;
                if !slack.app_token.starts_with("xapp-") {
                    anyhow::bail!("slack.app_token must be an app-level token (xapp-...)");
                }
                if !slack.bot_token.starts_with("xoxb-") {
                    anyhow::bail!("slack.bot_token must be a bot token (xoxb-...)");
                }
                Ok(())
            }
            ChannelKind::Matrix => {
                let matrix = self.matrix.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "matrix section is required (set in config.toml or MATRIX_HOME_SERVER/MATRIX_USER_ID env vars)"
                    )
                })?;
                if matrix.home_server.trim().is_empty() {
                    anyhow::bail!("matrix.home_server is required");
                }
                if !matrix.user_id.starts_with('@') || !matrix.user_id.contains(':') {
                    anyhow::bail!("Invalid Matrix user ID: {}", matrix.user_id);
                }
                if matrix.password.is_none() && matrix.access_token.is_none() {
                    anyhow::bail!("Either matrix.password or matrix.access_token is required");
                }
                Ok(())
            }
            ChannelKind::WhatsApp => {
                let whatsapp = self.whatsapp.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "whatsapp section is required (set in config.toml or WHATSAPP_BRIDGE_SCRIPT env var)"
                    )
                })?;
                if whatsapp.bridge_script.trim().is_empty() {
                    anyhow::bail!("whatsapp.bridge_script must not be empty");
                }
                Ok(())
            }
        }
    }
}
