use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::{LayoutType, DEFAULT_SEQUENCE_INTERVAL_SECS};

/// Most displays one process drives
pub const MAX_DISPLAYS: usize = 4;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub devices: Vec<DeviceConfig>,
    pub loopback: LoopbackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            devices: vec![DeviceConfig::default()],
            loopback: LoopbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Display orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub display_count: usize,
    /// Period of the sweep that re-issues requests for windows in `retry`
    pub retry_interval_secs: u64,
    /// Countdown after which access-control and video popups close themselves
    pub popup_duration_secs: u64,
    pub default_sequence_interval_secs: u32,
    pub default_layout: LayoutType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            display_count: 1,
            retry_interval_secs: 10,
            popup_duration_secs: 30,
            default_sequence_interval_secs: DEFAULT_SEQUENCE_INTERVAL_SECS,
            default_layout: LayoutType::TwoByTwo,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    #[must_use]
    pub const fn popup_duration(&self) -> Duration {
        Duration::from_secs(self.popup_duration_secs)
    }
}

/// A recording device known to the loopback device layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub camera_count: u16,
    pub reachable: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            camera_count: 16,
            reachable: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub reply_latency_ms: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            reply_latency_ms: 50,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // WALLVIEW_ENGINE__DISPLAY_COUNT=2, WALLVIEW_LOGGING__LEVEL=debug
        builder = builder.add_source(
            Environment::with_prefix("WALLVIEW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check cross-field constraints, collecting every violation.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.display_count == 0 || self.engine.display_count > MAX_DISPLAYS {
            errors.push(format!(
                "engine.display_count must be between 1 and {MAX_DISPLAYS}, got {}",
                self.engine.display_count
            ));
        }
        if self.engine.retry_interval_secs == 0 {
            errors.push("engine.retry_interval_secs must be positive".to_string());
        }
        if self.engine.popup_duration_secs == 0 {
            errors.push("engine.popup_duration_secs must be positive".to_string());
        }
        if self.engine.default_sequence_interval_secs == 0 {
            errors.push("engine.default_sequence_interval_secs must be positive".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                errors.push("devices[].name must not be empty".to_string());
            } else if !seen.insert(device.name.as_str()) {
                errors.push(format!("duplicate device name {:?}", device.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.display_count, 1);
        assert_eq!(config.engine.retry_interval(), Duration::from_secs(10));
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.engine.display_count = 0;
        config.engine.retry_interval_secs = 0;
        config.logging.format = "xml".to_string();
        config.devices.push(DeviceConfig::default());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("display_count")));
        assert!(errors.iter().any(|e| e.contains("duplicate device")));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "engine:\n  display_count: 2\n  default_layout: \"3x3\"\ndevices:\n  - name: nvr-a\n    camera_count: 8\n"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.engine.display_count, 2);
        assert_eq!(config.engine.default_layout, LayoutType::ThreeByThree);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].name, "nvr-a");
        assert_eq!(config.devices[0].camera_count, 8);
        assert!(config.devices[0].reachable);
        // Untouched sections keep their defaults
        assert_eq!(config.engine.retry_interval_secs, 10);
    }
}
