//! `config.toml`, read by both the player and the holder.
//!
//! Loading does not log: it usually runs before the logger exists, because
//! the file carries the default log level. Call [`ConfigFile::settle`] once
//! logging is up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::SurfaceLayer;

/// Validate an enum-like string value
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok(()),
            _ => anyhow::bail!(
                "Invalid value: {} (expected one of: {})",
                $value,
                [$($variant),+].join(", ")
            ),
        }
    };
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub watchers: WatcherSettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

/// General player settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_layer")]
    pub layer: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            layer: default_layer(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_layer() -> String {
    "background".to_string()
}

/// Watcher cadences, all in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSettings {
    #[serde(default = "default_process_poll_ms")]
    pub process_poll_ms: u64,

    #[serde(default = "default_visibility_grace_ms")]
    pub visibility_grace_ms: u64,

    #[serde(default = "default_liveness_check_ms")]
    pub liveness_check_ms: u64,

    #[serde(default = "default_shutdown_wait_ms")]
    pub shutdown_wait_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            process_poll_ms: default_process_poll_ms(),
            visibility_grace_ms: default_visibility_grace_ms(),
            liveness_check_ms: default_liveness_check_ms(),
            shutdown_wait_ms: default_shutdown_wait_ms(),
        }
    }
}

fn default_process_poll_ms() -> u64 {
    1000
}
fn default_visibility_grace_ms() -> u64 {
    2000
}
fn default_liveness_check_ms() -> u64 {
    50
}
fn default_shutdown_wait_ms() -> u64 {
    100
}

impl WatcherSettings {
    pub fn process_poll(&self) -> Duration {
        Duration::from_millis(self.process_poll_ms)
    }

    pub fn visibility_grace(&self) -> Duration {
        Duration::from_millis(self.visibility_grace_ms)
    }

    pub fn liveness_check(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }
}

/// Media engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Raw option string applied before the command line `-o` string
    #[serde(default)]
    pub options: String,

    /// File extensions picked up when the media path is a directory
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Explicit path of the holder binary
    #[serde(default)]
    pub holder_binary: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            options: String::new(),
            extensions: default_extensions(),
            holder_binary: None,
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "mp4", "webm", "mkv", "mov", "avi", "gif", "png", "jpg", "jpeg", "webp",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

/// What [`Config::load`] found on disk
#[derive(Debug)]
pub enum ConfigFile {
    Found { path: PathBuf, config: Config },
    Missing { path: PathBuf },
}

impl ConfigFile {
    /// Log level from the file, if there was one
    pub fn log_level(&self) -> Option<&str> {
        match self {
            Self::Found { config, .. } => Some(&config.general.log_level),
            Self::Missing { .. } => None,
        }
    }

    /// Report how loading went and fall back to defaults on failure.
    pub fn settle(loaded: Result<Self>) -> Config {
        match loaded {
            Ok(Self::Found { path, config }) => {
                log::info!("Loaded configuration from {}", path.display());
                config
            }
            Ok(Self::Missing { path }) => {
                log::debug!(
                    "Config file not found at {}, using defaults",
                    path.display()
                );
                Config::default()
            }
            Err(e) => {
                log::warn!("Failed to load config: {:#}. Using defaults.", e);
                Config::default()
            }
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<ConfigFile> {
        let path = Self::default_config_path()?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::Missing {
                path: path.to_path_buf(),
            });
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(ConfigFile::Found {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = crate::paths::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.general.log_level),
        }

        self.validate_layer(&self.general.layer)?;

        let watchers = &self.watchers;
        for (name, value) in [
            ("process_poll_ms", watchers.process_poll_ms),
            ("visibility_grace_ms", watchers.visibility_grace_ms),
            ("liveness_check_ms", watchers.liveness_check_ms),
            ("shutdown_wait_ms", watchers.shutdown_wait_ms),
        ] {
            if value == 0 {
                anyhow::bail!("watchers.{} must be greater than zero", name);
            }
        }

        if watchers.liveness_check_ms > watchers.visibility_grace_ms {
            anyhow::bail!("watchers.liveness_check_ms must not exceed visibility_grace_ms");
        }

        Ok(())
    }

    fn validate_layer(&self, layer: &str) -> Result<()> {
        validate_enum!(layer, "background", "bottom", "top", "overlay")
    }

    /// The command line layer if given, else the one from the config file
    pub fn surface_layer(&self, cli: Option<SurfaceLayer>) -> SurfaceLayer {
        cli.or_else(|| SurfaceLayer::from_name(&self.general.layer))
            .unwrap_or_default()
    }
}
