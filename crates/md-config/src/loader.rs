//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "mentiondesk.toml",
    "./config/config.toml",
    "/etc/mentiondesk/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        // Start with defaults
        let mut config = AppConfig::default();

        // Try to load from file
        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check MENTIONDESK_CONFIG env var
        if let Ok(path) = env::var("MENTIONDESK_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Database
        if let Ok(val) = env::var("DB_HOST") {
            config.database.host = val;
        }
        if let Ok(val) = env::var("DB_PORT") {
            if let Ok(port) = val.parse() {
                config.database.port = port;
            }
        }
        if let Ok(val) = env::var("DB_USER") {
            config.database.user = val;
        }
        if let Ok(val) = env::var("DB_PASSWORD") {
            config.database.password = val;
        }
        if let Ok(val) = env::var("DB_NAME") {
            config.database.name = val;
        }
        if let Ok(val) = env::var("DB_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Upstream aggregator
        if let Ok(val) = env::var("SOCIAL_MEDIA_API_URL") {
            config.social.base_url = val;
        }
        if let Ok(val) = env::var("SOCIAL_MEDIA_API_KEY") {
            config.social.api_key = val;
        }
        if let Ok(val) = env::var("SOCIAL_MEDIA_API_HISTORY_LAST_DAYS") {
            if let Ok(days) = val.parse() {
                config.social.history_last_days = days;
            }
        }
        if let Ok(val) = env::var("SOCIAL_PLATFORMS") {
            config.social.platforms = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Auth
        if let Ok(val) = env::var("JWT_SECRET") {
            config.auth.jwt_secret = val;
        }
        if let Ok(val) = env::var("JWT_EXPIRES_IN") {
            if let Ok(secs) = val.parse() {
                config.auth.jwt_expires_in_secs = secs;
            }
        }

        // Breaker
        if let Ok(val) = env::var("BREAKER_MAX_FAILURES") {
            if let Ok(n) = val.parse() {
                config.breaker.max_failures = n;
            }
        }
        if let Ok(val) = env::var("BREAKER_RESET_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.breaker.reset_timeout_secs = secs;
            }
        }

        // Retry
        if let Ok(val) = env::var("RETRY_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.retry.max_retries = n;
            }
        }
        if let Ok(val) = env::var("RETRY_INITIAL_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.initial_delay_ms = ms;
            }
        }
        if let Ok(val) = env::var("RETRY_MAX_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.max_delay_ms = ms;
            }
        }

        // Engine
        if let Ok(val) = env::var("ENGINE_WAIT_MS") {
            if let Ok(ms) = val.parse() {
                config.engine.wait_ms = ms;
            }
        }
        if let Ok(val) = env::var("ENGINE_FAN_OUT") {
            if let Ok(n) = val.parse() {
                config.engine.fan_out = n;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        env::set_var("DB_HOST", "pg.test.internal");
        env::set_var("SOCIAL_PLATFORMS", "twitter, bluesky");
        env::set_var("JWT_SECRET", "s3cret");

        let loader = ConfigLoader::new();
        let mut config = AppConfig::default();
        loader.apply_env_overrides(&mut config);

        assert_eq!(config.database.host, "pg.test.internal");
        assert_eq!(config.social.platforms, vec!["twitter", "bluesky"]);
        assert_eq!(config.auth.jwt_secret, "s3cret");

        env::remove_var("DB_HOST");
        env::remove_var("SOCIAL_PLATFORMS");
        env::remove_var("JWT_SECRET");
    }

    #[test]
    fn test_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [social]
                base_url = "https://agg.example.com"
                platforms = ["facebook"]
            "#,
        )
        .unwrap();

        let loader = ConfigLoader::with_path(&path);
        let config = loader.load().unwrap();
        assert_eq!(config.social.base_url, "https://agg.example.com");
    }
}
