use crate::atomic_write::WriteOptions;
use crate::store::DEFAULT_FILE_NAME;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the config file location (tests, portable installs).
pub const CONFIG_ENV: &str = "DEADLINES_CONFIG";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub time: TimeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// fsync temp file and directory on every save. Default: true.
    #[serde(default = "bool_true")]
    pub durable: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            durable: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "AlertConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "bool_true")]
    pub bell: bool,
    #[serde(default = "bool_true")]
    pub colors: bool,
    /// External notifier argv, e.g. `["notify-send", "Deadlines"]`; the alert
    /// text is appended as the last argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl AlertConfig {
    fn default_poll_interval_ms() -> u64 {
        1000
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin; one tick per 10ms is the floor.
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            bell: true,
            colors: true,
            command: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct TimeConfig {
    /// IANA zone used instead of the host zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

fn bool_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = get_config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn create_default() -> Result<PathBuf> {
        let config = Config::default();
        config.save()?;
        get_config_path()
    }

    /// `--file` beats `[store] path`, which beats the per-user data dir.
    pub fn store_path(&self, cli_override: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_override {
            return path.to_path_buf();
        }
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deadlines")
            .join(DEFAULT_FILE_NAME)
    }

    pub fn write_options(&self) -> WriteOptions {
        if self.store.durable {
            WriteOptions::durable()
        } else {
            WriteOptions::fast()
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(config_dir.join("deadlines").join("config.toml"))
}

pub fn show_config() -> Result<()> {
    let path = get_config_path()?;
    println!("Config: {}", path.display());
    println!();

    if path.exists() {
        let config = Config::load()?;
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("(default config, file not created)");
        println!();
        let config = Config::default();
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
