//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure for Strix.
#[derive(Debug, Serialize, Deserialize)]
pub struct StrixConfig {
    pub capture: CaptureConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Packet acquisition settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub pcap_file: Option<String>,
    pub snaplen: usize,
}

/// Decode engine settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Packet slots circulating between producer and worker.
    pub channel_capacity: usize,
    /// Seconds a TCP session stays tracked after creation.
    pub session_ttl: u64,
    /// Upper bound on concurrently tracked sessions.
    pub max_sessions: usize,
}

/// Logging configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_file: Option<String>,
}

impl Default for StrixConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                pcap_file: None,
                snaplen: 65535,
            },
            engine: EngineConfig {
                channel_capacity: 256,
                session_ttl: 300,
                max_sessions: 0xffff,
            },
            logging: LoggingConfig {
                log_level: "info".to_string(),
                log_file: None,
            },
        }
    }
}

impl StrixConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&config_str)?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: StrixConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.pcap_file.is_none() {
            return Err(ConfigError::ValidationError(
                "capture.pcap_file must be specified".to_string(),
            ));
        }

        if self.engine.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.engine.session_ttl == 0 || self.engine.session_ttl >= 3600 {
            return Err(ConfigError::ValidationError(
                "session_ttl must be between 1 and 3599 seconds".to_string(),
            ));
        }

        if self.engine.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = StrixConfig::from_toml(
            r#"
            [capture]
            pcap_file = "capture.pcap"
            snaplen = 1500

            [engine]
            channel_capacity = 64
            session_ttl = 120
            max_sessions = 1024

            [logging]
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.pcap_file.as_deref(), Some("capture.pcap"));
        assert_eq!(config.engine.channel_capacity, 64);
        assert_eq!(config.engine.session_ttl, 120);
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn rejects_missing_source() {
        let err = StrixConfig::from_toml(
            r#"
            [capture]
            snaplen = 1500

            [engine]
            channel_capacity = 64
            session_ttl = 120
            max_sessions = 1024

            [logging]
            log_level = "info"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_out_of_range_ttl() {
        let mut config = StrixConfig::default();
        config.capture.pcap_file = Some("x.pcap".into());
        config.engine.session_ttl = 3600;
        assert!(config.validate().is_err());
        config.engine.session_ttl = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_engine_settings() {
        let config = StrixConfig::default();
        assert_eq!(config.engine.channel_capacity, 256);
        assert_eq!(config.engine.session_ttl, 300);
        assert_eq!(config.engine.max_sessions, 0xffff);
    }
}
