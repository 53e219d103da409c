//! Controller configuration, stored as JSON in GATELINK_HOME

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Writes longer than this go out without response when the slot allows it
    pub write_without_response_threshold: usize,
    /// Pause after an unacknowledged write before the next operation
    pub settle_delay_ms: u64,
    /// Per-operation deadline applied at the transport boundary
    pub operation_timeout_ms: Option<u64>,
    /// How long to scan for devices
    pub scan_secs: u64,
    /// Prefer the platform credential store for the signing key
    pub keyring: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            write_without_response_threshold: 20,
            settle_delay_ms: 100,
            operation_timeout_ms: Some(5000),
            scan_secs: 5,
            keyring: true,
        }
    }
}

impl ControllerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// Load `config.json` from `home`, writing the defaults if it is missing
    pub fn load_or_init(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        if path.exists() {
            let data = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            let config = Self::default();
            fs::write(&path, serde_json::to_string_pretty(&config)?)?;
            log::info!("wrote default config to {}", path.display());
            Ok(config)
        }
    }
}

/// GATELINK_HOME, or `~/.gatelink`; created if needed
pub fn gatelink_home() -> Result<PathBuf, ConfigError> {
    let home = match std::env::var_os("GATELINK_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".gatelink"),
    };
    fs::create_dir_all(&home)?;
    Ok(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert!(dir.path().join("config.json").exists());
        assert_eq!(ControllerConfig::load_or_init(dir.path()).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"settle_delay_ms": 250}"#).unwrap();
        let config = ControllerConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(250));
        assert_eq!(config.write_without_response_threshold, 20);
    }

    #[test]
    fn rejects_broken_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{").unwrap();
        assert!(matches!(ControllerConfig::load_or_init(dir.path()), Err(ConfigError::Json(_))));
    }
}
