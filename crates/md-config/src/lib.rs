//! Mentiondesk Configuration System
//!
//! This crate provides TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub social: SocialApiConfig,
    pub auth: AuthConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            social: SocialApiConfig::default(),
            auth: AuthConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load with the standard search paths and env overrides
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.social.platforms.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one social platform must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
        }
    }
}

/// Relational store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "mentiondesk".to_string(),
            password: "mentiondesk".to_string(),
            name: "mentiondesk".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Postgres connection URL built from the individual DB_* parts
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Upstream social-media aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialApiConfig {
    /// Base URL of the aggregator API
    pub base_url: String,
    /// Bearer credential attached to every upstream request
    pub api_key: String,
    /// How far back /history looks, in days
    pub history_last_days: u32,
    /// Platforms to poll, e.g. ["bluesky", "twitter", "facebook"]
    pub platforms: Vec<String>,
    /// Hard per-request deadline in seconds
    pub request_timeout_secs: u64,
}

impl Default for SocialApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: String::new(),
            history_last_days: 7,
            platforms: vec!["bluesky".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Bearer token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Token lifetime in seconds
    pub jwt_expires_in_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            jwt_expires_in_secs: 86_400,
        }
    }
}

/// Circuit breaker defaults applied per platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_secs: 60,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Retry engine defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            factor: 2.0,
        }
    }
}

/// Mention engine timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soft deadline for list_mentions before returning cached data, ms
    pub wait_ms: u64,
    /// Reply task staleness window, seconds
    pub reply_interval_secs: u64,
    /// Fetch task dedup/recovery window, seconds
    pub fetch_interval_secs: u64,
    /// Fan-out limit for per-post and per-task parallelism
    pub fan_out: usize,
    /// Recovery loop tick, seconds
    pub recovery_check_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_ms: 2_000,
            reply_interval_secs: 300,
            fetch_interval_secs: 600,
            fan_out: 10,
            recovery_check_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.breaker.max_failures, 5);
        assert_eq!(config.breaker.reset_timeout_secs, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.engine.wait_ms, 2_000);
        assert_eq!(config.engine.fan_out, 10);
    }

    #[test]
    fn test_database_url() {
        let db = DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5433,
            user: "svc".to_string(),
            password: "pw".to_string(),
            name: "mentions".to_string(),
            max_connections: 5,
        };
        assert_eq!(db.url(), "postgres://svc:pw@db.internal:5433/mentions");
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
            [http]
            port = 9090

            [social]
            base_url = "https://aggregator.example.com"
            platforms = ["twitter", "facebook"]
            history_last_days = 3
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.social.platforms, vec!["twitter", "facebook"]);
        assert_eq!(config.social.history_last_days, 3);
        // untouched sections keep defaults
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_validation_rejects_empty_platforms() {
        let mut config = AppConfig::default();
        config.social.platforms.clear();
        assert!(config.validate().is_err());
    }
}
