//! Configuration Module
//!
//! Handles application configuration loading, validation, and management.

use crate::dispatch::PacingConfig;
use crate::history::JsonlHistory;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default pacing and failure policy for runs
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// WhatsApp HTTP gateway
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Run history store
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Debug log file as JSON lines
    #[serde(default)]
    pub json: bool,

    /// Directory for debug log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between two sends
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,

    #[serde(default)]
    pub auto_pause_enabled: bool,

    #[serde(default = "default_auto_pause_every")]
    pub auto_pause_every: u32,

    /// Abort a run after this many failures in a row (unset: never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

fn default_delay_seconds() -> u64 {
    PacingConfig::default().delay_seconds
}

fn default_auto_pause_every() -> u32 {
    50
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            auto_pause_enabled: false,
            auto_pause_every: default_auto_pause_every(),
            max_consecutive_failures: None,
        }
    }
}

impl DispatchConfig {
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            delay_seconds: self.delay_seconds,
            auto_pause_enabled: self.auto_pause_enabled,
            auto_pause_every: self.auto_pause_every,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Gateway base URL (default: "http://localhost:8080")
    #[serde(default = "default_whatsapp_url")]
    pub base_url: String,

    /// Gateway instance name
    #[serde(default)]
    pub instance: String,

    /// Instance API key (prefer WACRM_WHATSAPP_API_KEY over writing it here)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_whatsapp_timeout")]
    pub timeout_secs: u64,
}

fn default_whatsapp_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_whatsapp_timeout() -> u64 {
    30
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: default_whatsapp_url(),
            instance: String::new(),
            api_key: None,
            timeout_secs: default_whatsapp_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,

    #[serde(default = "JsonlHistory::default_path")]
    pub path: PathBuf,
}

fn default_history_enabled() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            path: JsonlHistory::default_path(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (lowest to highest):
    /// 1. Default values
    /// 2. System config: ~/.config/wacrm/config.toml
    /// 3. Local config: ./wacrm.toml
    /// 4. Environment variables
    pub fn load() -> Result<Self> {
        tracing::debug!("Loading configuration...");

        let mut config = Self::default();

        if let Some(system_config_path) = Self::system_config_path()
            && system_config_path.exists()
        {
            tracing::debug!("Loading system config from: {:?}", system_config_path);
            config = Self::from_file(&system_config_path)?;
        }

        let local_config_path = Self::local_config_path();
        if local_config_path.exists() {
            tracing::debug!("Loading local config from: {:?}", local_config_path);
            config = Self::from_file(&local_config_path)?;
        }

        config.apply_env_overrides()?;

        tracing::debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from custom path: {:?}", path);

        if !path.exists() {
            anyhow::bail!("Config file not found: {:?}", path);
        }
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// System config path: ~/.config/wacrm/config.toml
    pub fn system_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wacrm").join("config.toml"))
    }

    /// Local config path: ./wacrm.toml
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("./wacrm.toml")
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `WACRM_*` overrides read through `lookup`
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup("WACRM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("WACRM_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }

        if let Some(delay) = lookup("WACRM_DELAY_SECONDS") {
            self.dispatch.delay_seconds = parse_env("WACRM_DELAY_SECONDS", &delay)?;
        }
        if let Some(every) = lookup("WACRM_AUTO_PAUSE_EVERY") {
            self.dispatch.auto_pause_every = parse_env("WACRM_AUTO_PAUSE_EVERY", &every)?;
            self.dispatch.auto_pause_enabled = self.dispatch.auto_pause_every > 0;
        }
        if let Some(limit) = lookup("WACRM_MAX_CONSECUTIVE_FAILURES") {
            let limit: u32 = parse_env("WACRM_MAX_CONSECUTIVE_FAILURES", &limit)?;
            self.dispatch.max_consecutive_failures = (limit > 0).then_some(limit);
        }

        if let Some(url) = lookup("WACRM_WHATSAPP_URL") {
            self.whatsapp.base_url = url;
        }
        if let Some(instance) = lookup("WACRM_WHATSAPP_INSTANCE") {
            self.whatsapp.instance = instance;
        }
        if let Some(api_key) = lookup("WACRM_WHATSAPP_API_KEY")
            && !api_key.trim().is_empty()
        {
            self.whatsapp.api_key = Some(api_key);
        }

        if let Some(path) = lookup("WACRM_HISTORY_PATH") {
            self.history.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        tracing::debug!("Validating configuration...");

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        self.dispatch.pacing().validate().context("Invalid [dispatch] settings")?;
        if self.dispatch.max_consecutive_failures == Some(0) {
            anyhow::bail!("dispatch.max_consecutive_failures must be at least 1 when set");
        }

        if self.whatsapp.timeout_secs == 0 {
            anyhow::bail!("whatsapp.timeout_secs must be at least 1");
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Configuration saved to: {:?}", path);
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
