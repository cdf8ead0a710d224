//! Configuration module for crmsync-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::RuntimeConfig;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides and validate.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<RuntimeConfig, ConfigError> {
        self.load()
    }

    pub(crate) fn load_str(&self, content: &str) -> Result<RuntimeConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        validate(&file_config)?;
        Ok(RuntimeConfig::from_file(file_config))
    }
}

/// Upper bound for durations that are added to or subtracted from the clock.
const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

    for (name, secs) in [
        ("storage.event_retention_secs", config.storage.event_retention_secs),
        ("consumer.processing_delay_ms", config.consumer.processing_delay_ms / 1000),
        ("retry.max_delay_ms", config.retry.max_delay_ms / 1000),
        ("retry.claim_timeout_ms", config.retry.claim_timeout_ms / 1000),
    ] {
        if secs > MAX_WINDOW_SECS {
            return invalid(format!("{name} must not exceed {MAX_WINDOW_SECS} seconds"));
        }
    }

    if config.retry.max_attempts < 1 {
        return invalid("retry.max_attempts must be at least 1".into());
    }
    if config.retry.multiplier.is_nan() || config.retry.multiplier < 1.0 {
        return invalid(format!(
            "retry.multiplier must be >= 1.0, got {}",
            config.retry.multiplier
        ));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return invalid("retry.max_delay_ms must not be below retry.base_delay_ms".into());
    }
    if config.retry.claim_timeout_ms == 0 {
        return invalid("retry.claim_timeout_ms must be positive".into());
    }
    if config.broker.delivery_timeout_secs == 0 {
        return invalid("broker.delivery_timeout_secs must be positive".into());
    }

    let consumer = &config.consumer;
    if !consumer.verify_signatures && !consumer.debug {
        return invalid("consumer.verify_signatures = false requires consumer.debug = true".into());
    }
    if consumer.enabled {
        if config.sink.is_none() {
            return invalid("an enabled consumer needs a [sink] section".into());
        }
        if consumer.verify_signatures && consumer.secret.is_empty() {
            return invalid("consumer.secret is required when signatures are verified".into());
        }
        if consumer.workers == 0 {
            return invalid("consumer.workers must be at least 1".into());
        }
    }

    for mapping in &config.mappings {
        if mapping.object_type.trim().is_empty() {
            return invalid("mapping with empty object_type".into());
        }
        if mapping.metrics.is_empty() {
            return invalid(format!(
                "mapping for {} has no metrics",
                mapping.object_type
            ));
        }
    }
    Ok(())
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> ConfigLoader {
        ConfigLoader::new("unused.toml", None)
    }

    const CONSUMER: &str = r#"
[consumer]
enabled = true
secret = "s3cret"

[sink]
url = "https://sink.example.com/"
token = "t"
"#;

    #[test]
    fn consumer_section_builds_runtime() {
        let config = loader().load_str(CONSUMER).unwrap();
        let consumer = config.consumer.unwrap();
        assert_eq!(consumer.intake.secret_bytes(), b"s3cret");
        assert!(consumer.intake.requires_signature());
        assert_eq!(consumer.pool.workers, 4);
        // Built-in company and deal mappings.
        assert_eq!(consumer.mappings.len(), 2);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn listen_override_wins() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let config = ConfigLoader::new("unused.toml", Some(addr))
            .load_str("[server]\nlisten = \"0.0.0.0:1\"")
            .unwrap();
        assert_eq!(config.listen, addr);
    }

    #[test]
    fn skipping_verification_requires_debug() {
        let base = format!("{CONSUMER}\n");
        let strict = base.replace("enabled = true", "enabled = true\nverify_signatures = false");
        assert!(matches!(
            loader().load_str(&strict),
            Err(ConfigError::ValidationError(_))
        ));
        let debug = base.replace(
            "enabled = true",
            "enabled = true\nverify_signatures = false\ndebug = true",
        );
        let config = loader().load_str(&debug).unwrap();
        assert!(!config.consumer.unwrap().intake.requires_signature());
    }

    #[test]
    fn invalid_retry_and_mapping_are_rejected() {
        for bad in [
            "[retry]\nmax_attempts = 0",
            "[retry]\nmultiplier = 0.5",
            "[retry]\nclaim_timeout_ms = 0",
            "[storage]\nevent_retention_secs = 9223372036854775807",
            "[consumer]\nprocessing_delay_ms = 9223372036854775807",
            "[[mappings]]\nobject_type = \"deal\"\nmetrics = {}",
            "[consumer]\nenabled = true\nsecret = \"x\"",
        ] {
            assert!(
                matches!(loader().load_str(bad), Err(ConfigError::ValidationError(_))),
                "accepted: {bad}"
            );
        }
    }
}
