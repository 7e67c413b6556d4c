//! Monitor configuration
//!
//! ```toml
//! [device]
//! vendor_id = 0x0e77
//! product_id = 0x0104
//!
//! [transport]
//! read_timeout_ms = 100
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result, anyhow};
use common::logging::{VALID_LOG_LEVELS, is_valid_level};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use transport::{DeviceIdentifier, TransportSettings};

/// System-wide fallback consulted after the per-user file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/knx-usb/monitor.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which interface to open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
}

impl DeviceSettings {
    // Weinzierl KNX USB Interface
    fn default_vendor_id() -> u16 {
        0x0e77
    }

    fn default_product_id() -> u16 {
        0x0104
    }

    pub fn identifier(&self) -> DeviceIdentifier {
        DeviceIdentifier::new(self.vendor_id, self.product_id)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path`, or from the first standard location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            [Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)]
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if none is usable
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Per-user configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("knx-usb").join("monitor.toml")
        } else {
            PathBuf::from(".config/knx-usb/monitor.toml")
        }
    }

    /// Pick the effective log level, preferring a command-line override
    pub fn log_level<'a>(&'a self, cli_level: Option<&'a str>) -> Result<&'a str> {
        let level = cli_level.unwrap_or(&self.logging.level);
        check_level(level)?;
        Ok(level)
    }

    pub fn validate(&self) -> Result<()> {
        check_level(&self.logging.level)?;

        self.transport
            .validate()
            .context("Invalid [transport] section")?;

        Ok(())
    }
}

fn check_level(level: &str) -> Result<()> {
    if !is_valid_level(level) {
        return Err(anyhow!(
            "Invalid log level '{}', must be one of: {}",
            level,
            VALID_LOG_LEVELS.join(", ")
        ));
    }
    Ok(())
}

/// Load from a user-supplied path, expanding a leading `~`
pub fn load_config(path: &str) -> Result<MonitorConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    MonitorConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.device.identifier(), DeviceIdentifier::new(0x0e77, 0x0104));
        assert_eq!(config.transport, TransportSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = MonitorConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MonitorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = MonitorConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_log_level_is_validated() {
        let config = MonitorConfig::default();
        assert_eq!(config.log_level(None).unwrap(), "info");
        assert_eq!(config.log_level(Some("trace")).unwrap(), "trace");
        assert!(config.log_level(Some("verbose")).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = MonitorConfig::default();
        config.transport.write_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
