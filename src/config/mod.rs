/// Configuration management for pasarela
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main pasarela configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Proxy node addresses forming the cluster, in selection order
    pub nodes: Vec<String>,
    /// Backend connection pool configuration
    pub pool: PoolConfig,
    /// XA transaction configuration
    pub xa: XaConfig,
    /// Health check configuration
    pub health: HealthConfig,
    /// Client routing configuration
    pub routing: RoutingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend connection pool configuration
///
/// These are the cluster-wide originals; each node derives its own share
/// from the current healthy-node count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum pool size across the whole cluster
    pub max_size: u32,
    /// Minimum idle connections across the whole cluster
    pub min_idle: u32,
}

/// XA transaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaConfig {
    /// Maximum concurrent XA transactions per connection group, cluster-wide
    pub max_concurrent: u32,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Probe interval in milliseconds
    pub interval_ms: u64,
    /// Per-probe timeout in milliseconds
    pub timeout_ms: u64,
    /// Consecutive probe failures before marking an endpoint unhealthy
    pub failure_threshold: u32,
}

/// Client routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum connect attempts before giving up
    pub max_attempts: u32,
    /// Delay between connect attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Select the healthy endpoint with the fewest active sessions;
    /// falls back to fixed rotation when disabled
    pub load_aware: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
    /// Log to stdout
    pub stdout: bool,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: vec!["127.0.0.1:16021".to_string()],
            pool: PoolConfig {
                max_size: 30,
                min_idle: 9,
            },
            xa: XaConfig { max_concurrent: 60 },
            health: HealthConfig {
                interval_ms: 10_000,
                timeout_ms: 5_000,
                failure_threshold: 3,
            },
            routing: RoutingConfig {
                max_attempts: 3,
                retry_delay_ms: 200,
                load_aware: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                stdout: true,
                file: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one node address is required".to_string(),
            ));
        }

        for node in &self.nodes {
            node.parse::<std::net::SocketAddr>().map_err(|_| {
                ConfigError::ValidationError(format!("Invalid node address: {}", node))
            })?;
        }

        if self.pool.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_size must be greater than 0".to_string(),
            ));
        }

        if self.pool.min_idle > self.pool.max_size {
            return Err(ConfigError::ValidationError(
                "pool.min_idle must not exceed pool.max_size".to_string(),
            ));
        }

        if self.xa.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "xa.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.health.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "health.interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "health.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_ms >= self.health.interval_ms {
            return Err(ConfigError::ValidationError(
                "health.timeout_ms must be less than health.interval_ms".to_string(),
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.routing.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "routing.max_attempts must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            nodes: vec![
                "10.0.1.10:16021".to_string(),
                "10.0.1.11:16021".to_string(),
                "10.0.1.12:16021".to_string(),
            ],
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.pool.max_size = 0;
        assert!(config.validate().is_err());

        config.pool.max_size = 30;
        assert!(config.validate().is_ok());

        // min_idle above max_size is rejected
        config.pool.min_idle = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_nodes() {
        let mut config = Config::default();

        config.nodes.clear();
        assert!(config.validate().is_err());

        config.nodes = vec!["not-an-address".to_string()];
        assert!(config.validate().is_err());

        config.nodes = vec!["10.0.0.1:16021".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_health() {
        let mut config = Config::default();

        // timeout must be shorter than the interval
        config.health.timeout_ms = config.health.interval_ms;
        assert!(config.validate().is_err());

        config.health.timeout_ms = 1_000;
        config.health.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert!(loaded_config.validate().is_ok());
    }
}
