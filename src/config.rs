//! Driver configuration: a single JSON file, validated eagerly at startup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::content::{AuthConfig, ErrorFallback};
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub poll_endpoint: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default)]
    pub enable_push: bool,
    #[serde(default = "default_push_port")]
    pub push_port: u16,
    #[serde(default = "default_push_host")]
    pub push_host: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub serial_device: Option<String>,
    #[serde(default = "default_baudrate")]
    pub serial_baudrate: u32,
    #[serde(default = "default_layout")]
    pub module_layout: Vec<Vec<u8>>,
    #[serde(default = "default_module_width")]
    pub module_width: u32,
    #[serde(default = "default_module_height")]
    pub module_height: u32,

    #[serde(default)]
    pub error_fallback: ErrorFallback,
    #[serde(default)]
    pub dev_mode: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_poll_interval_ms() -> u32 {
    30_000
}
fn default_poll_timeout_secs() -> u64 {
    10
}
fn default_push_port() -> u16 {
    8080
}
fn default_push_host() -> String {
    "0.0.0.0".to_string()
}
fn default_baudrate() -> u32 {
    57600
}
fn default_layout() -> Vec<Vec<u8>> {
    vec![vec![1], vec![2]]
}
fn default_module_width() -> u32 {
    28
}
fn default_module_height() -> u32 {
    7
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl DriverConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: DriverConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < 1000 {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must be >= 1000, got {}",
                self.poll_interval_ms
            )));
        }
        if self.module_layout.is_empty() || self.module_layout[0].is_empty() {
            return Err(ConfigError::Invalid(
                "module_layout must be a non-empty 2D list".to_string(),
            ));
        }
        let n_cols = self.module_layout[0].len();
        if self.module_layout.iter().any(|row| row.len() != n_cols) {
            return Err(ConfigError::Invalid(
                "module_layout rows must all have the same length".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("flipdot-test-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"poll_endpoint": "http://localhost:9000/content"}"#).unwrap();

        let config = DriverConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 30_000);
        assert_eq!(config.module_width, 28);
        assert_eq!(config.module_height, 7);
        assert!(!config.enable_push);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_short_poll_interval() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("flipdot-test-config-bad-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"poll_endpoint": "http://x", "poll_interval_ms": 10}"#,
        )
        .unwrap();

        assert!(matches!(
            DriverConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_not_found() {
        let path = Path::new("/nonexistent/flipdot-config-does-not-exist.json");
        assert!(matches!(
            DriverConfig::load(path),
            Err(ConfigError::NotFound(_))
        ));
    }
}
