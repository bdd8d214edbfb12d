/// Configuration management for vigia

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Node monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Background verification interval in seconds
    pub heartbeat_interval_sec: u64,
    /// Health check (ping) timeout in seconds
    pub check_timeout_sec: u64,
    /// Connection establishment timeout in seconds
    pub connect_timeout_sec: u64,
    /// Maximum number of live pooled connections per node
    pub max_pool_size: usize,
    /// Database used for admin commands
    pub admin_database: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_sec: 10,
            check_timeout_sec: 5,
            connect_timeout_sec: 5,
            max_pool_size: 100,
            admin_database: "admin".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: MonitorConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.check_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "check_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.check_timeout_sec >= self.heartbeat_interval_sec {
            return Err(ConfigError::ValidationError(
                "check_timeout_sec must be less than heartbeat_interval_sec".to_string(),
            ));
        }

        if self.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.max_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.admin_database.is_empty() {
            return Err(ConfigError::ValidationError(
                "admin_database cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Background verification interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec)
    }

    /// Health check timeout
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_sec)
    }

    /// Connection establishment timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.check_timeout(), Duration::from_secs(5));
        assert_eq!(config.admin_database, "admin");
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();

        config.heartbeat_interval_sec = 0;
        assert!(config.validate().is_err());

        config.heartbeat_interval_sec = 10;
        config.check_timeout_sec = 10;
        assert!(config.validate().is_err());

        config.check_timeout_sec = 5;
        assert!(config.validate().is_ok());

        config.max_pool_size = 0;
        assert!(config.validate().is_err());

        config.max_pool_size = 100;
        config.admin_database = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = MonitorConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: MonitorConfig = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
        assert_eq!(parsed_config.max_pool_size, config.max_pool_size);
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let content = r#"
heartbeat_interval_sec = 15
check_timeout_sec = 3
connect_timeout_sec = 4
max_pool_size = 25
admin_database = "admin"
"#;
        fs::write(temp_file.path(), content).unwrap();

        let config = MonitorConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.heartbeat_interval_sec, 15);
        assert_eq!(config.check_timeout_sec, 3);
        assert_eq!(config.max_pool_size, 25);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let content = r#"
heartbeat_interval_sec = 5
check_timeout_sec = 5
connect_timeout_sec = 4
max_pool_size = 25
admin_database = "admin"
"#;
        fs::write(temp_file.path(), content).unwrap();

        let result = MonitorConfig::load_from_file(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
