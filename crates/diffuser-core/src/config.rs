//! Diffuser configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{DiffuserError, Result};
use crate::types::{ChannelMap, default_channel_map};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffuserConfig {
    #[serde(default = "default_channel_map")]
    pub channels: ChannelMap,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for DiffuserConfig {
    fn default() -> Self {
        Self {
            channels: default_channel_map(),
            actuator: ActuatorConfig::default(),
            controller: ControllerConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl DiffuserConfig {
    /// Load config from the default path (~/.diffuser/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiffuserError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DiffuserError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DiffuserError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject channel maps that are empty or bind two channels to one pin.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(DiffuserError::Config("at least one channel must be mapped".into()));
        }
        let mut seen = BTreeSet::new();
        for (channel, pin) in &self.channels {
            if !seen.insert(*pin) {
                return Err(DiffuserError::Config(format!(
                    "pin {pin} is mapped more than once (again for {channel})"
                )));
            }
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Diffuser home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".diffuser")
    }

    /// Rule file path with `~` expanded.
    pub fn rules_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.monitor.rules_path).to_string())
    }
}

/// Which output driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-memory outputs, for development machines.
    Mock,
    /// Linux sysfs GPIO.
    Sysfs,
}

/// Output driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_driver")]
    pub driver: DriverKind,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

fn default_driver() -> DriverKind { DriverKind::Mock }
fn default_sysfs_root() -> String { "/sys/class/gpio".into() }

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

/// Cycle controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long a new activation waits for the previous pulse task to exit.
    #[serde(default = "default_stop_wait_ms")]
    pub stop_wait_ms: u64,
    #[serde(default = "default_cycle_time")]
    pub default_cycle_time: u32,
    #[serde(default = "default_pulse_duration")]
    pub default_pulse_duration: u32,
}

fn default_stop_wait_ms() -> u64 { 100 }
fn default_cycle_time() -> u32 { 60 }
fn default_pulse_duration() -> u32 { 10 }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stop_wait_ms: default_stop_wait_ms(),
            default_cycle_time: default_cycle_time(),
            default_pulse_duration: default_pulse_duration(),
        }
    }
}

/// Schedule monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
}

fn bool_true() -> bool { true }
fn default_rules_path() -> String { "~/.diffuser/schedules.json".into() }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_path: default_rules_path(),
        }
    }
}
