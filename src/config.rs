use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LimitsError, Result};
use crate::utils::{get_env_with_prefix, parse_env_with_prefix};

#[cfg(feature = "database")]
use crate::database::DatabaseConfig;

/// Main configuration for the limits engine
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[cfg(feature = "database")]
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Page size cap for limit listings
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
}

/// Retry policy for serializable counter transactions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionConfig {
    /// Retries after the first attempt
    #[serde(default = "default_retry_amount")]
    pub retry_amount: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    #[serde(default = "default_run_interval_seconds")]
    pub run_interval_seconds: u64,
    /// Age after which ended counters and idle contexts are purged
    #[serde(default = "default_outdate_interval_seconds")]
    pub outdate_interval_seconds: u64,
    /// Rows deleted per statement when purging counters and contexts
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

fn default_max_limit() -> u64 {
    500
}

fn default_retry_amount() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_run_interval_seconds() -> u64 {
    24 * 60 * 60
}

fn default_outdate_interval_seconds() -> u64 {
    24 * 60 * 60
}

fn default_batch_size() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retry_amount: default_retry_amount(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl TransactionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            run_interval_seconds: default_run_interval_seconds(),
            outdate_interval_seconds: default_outdate_interval_seconds(),
            batch_size: default_batch_size(),
        }
    }
}

impl CleanupConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_seconds)
    }

    pub fn outdate_interval(&self) -> Duration {
        Duration::from_secs(self.outdate_interval_seconds)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

impl LimitsConfig {
    pub fn builder() -> LimitsConfigBuilder {
        LimitsConfigBuilder::new()
    }
}

/// Builder for LimitsConfig with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct LimitsConfigBuilder {
    config: LimitsConfig,
}

impl LimitsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LimitsConfig::default(),
        }
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.config.service.max_limit = max_limit;
        self
    }

    pub fn with_retry_amount(mut self, retry_amount: u32) -> Self {
        self.config.transaction.retry_amount = retry_amount;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.transaction.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_cleanup_run_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup.run_interval_seconds = interval.as_secs();
        self
    }

    pub fn with_cleanup_outdate_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup.outdate_interval_seconds = interval.as_secs();
        self
    }

    pub fn with_cleanup_batch_size(mut self, batch_size: u64) -> Self {
        self.config.cleanup.batch_size = batch_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.config.database = database;
        self
    }

    /// Load configuration from environment variables with LIMITS_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(max_limit) = parse_env_with_prefix("MAX_LIMIT") {
            self.config.service.max_limit = max_limit;
        }
        if let Some(retry_amount) = parse_env_with_prefix("TRANSACTION_RETRY_AMOUNT") {
            self.config.transaction.retry_amount = retry_amount;
        }
        if let Some(delay) = parse_env_with_prefix("TRANSACTION_RETRY_DELAY_MS") {
            self.config.transaction.retry_delay_ms = delay;
        }
        if let Some(interval) = parse_env_with_prefix("CLEANUP_RUN_INTERVAL_SECONDS") {
            self.config.cleanup.run_interval_seconds = interval;
        }
        if let Some(interval) = parse_env_with_prefix("CLEANUP_OUTDATE_INTERVAL_SECONDS") {
            self.config.cleanup.outdate_interval_seconds = interval;
        }
        if let Some(batch_size) = parse_env_with_prefix("CLEANUP_BATCH_SIZE") {
            self.config.cleanup.batch_size = batch_size;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        #[cfg(feature = "database")]
        {
            self.config.database = self.config.database.with_env_overrides();
        }

        self
    }

    /// Build the configuration, validating all settings
    pub fn build(self) -> Result<LimitsConfig> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(LimitsError::invalid_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.service.max_limit == 0 {
            return Err(LimitsError::invalid_request(
                "max_limit must be greater than 0",
            ));
        }

        if self.config.cleanup.run_interval_seconds == 0 {
            return Err(LimitsError::invalid_request(
                "Cleanup run interval must be greater than 0",
            ));
        }

        if self.config.cleanup.batch_size == 0 {
            return Err(LimitsError::invalid_request(
                "Cleanup batch size must be greater than 0",
            ));
        }

        Ok(self.config)
    }
}

impl Default for LimitsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimitsConfig::default();
        assert_eq!(config.service.max_limit, 500);
        assert_eq!(config.transaction.retry_amount, 5);
        assert_eq!(config.transaction.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.cleanup.run_interval(), Duration::from_secs(86_400));
        assert_eq!(config.cleanup.outdate_interval(), Duration::from_secs(86_400));
        assert_eq!(config.cleanup.batch_size, 10_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_deserialize_partial_config_fills_defaults() {
        let config: LimitsConfig = serde_json::from_str(
            r#"{"service": {"max_limit": 50}, "transaction": {"retry_delay_ms": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.service.max_limit, 50);
        assert_eq!(config.transaction.retry_amount, 5);
        assert_eq!(config.transaction.retry_delay(), Duration::from_millis(10));
        assert_eq!(config.cleanup.batch_size, 10_000);
    }

    #[test]
    fn test_builder() {
        let config = LimitsConfig::builder()
            .with_max_limit(20)
            .with_retry_amount(2)
            .with_retry_delay(Duration::from_millis(5))
            .with_cleanup_run_interval(Duration::from_secs(60))
            .with_cleanup_outdate_interval(Duration::from_secs(120))
            .with_cleanup_batch_size(100)
            .with_log_level("debug")
            .with_json_logging(true)
            .build()
            .unwrap();

        assert_eq!(config.service.max_limit, 20);
        assert_eq!(config.transaction.retry_amount, 2);
        assert_eq!(config.transaction.retry_delay_ms, 5);
        assert_eq!(config.cleanup.run_interval_seconds, 60);
        assert_eq!(config.cleanup.outdate_interval_seconds, 120);
        assert_eq!(config.cleanup.batch_size, 100);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(LimitsConfig::builder().with_max_limit(0).build().is_err());
        assert!(LimitsConfig::builder().with_cleanup_batch_size(0).build().is_err());
        assert!(
            LimitsConfig::builder()
                .with_cleanup_run_interval(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(LimitsConfig::builder().with_log_level("verbose").build().is_err());
    }

    #[test]
    fn test_from_env() {
        unsafe {
            std::env::set_var("LIMITS_MAX_LIMIT", "42");
            std::env::set_var("LIMITS_TRANSACTION_RETRY_AMOUNT", "9");
            std::env::set_var("LIMITS_CLEANUP_BATCH_SIZE", "not-a-number");
        }

        let config = LimitsConfigBuilder::new().from_env().build().unwrap();
        assert_eq!(config.service.max_limit, 42);
        assert_eq!(config.transaction.retry_amount, 9);
        assert_eq!(config.cleanup.batch_size, 10_000);

        unsafe {
            std::env::remove_var("LIMITS_MAX_LIMIT");
            std::env::remove_var("LIMITS_TRANSACTION_RETRY_AMOUNT");
            std::env::remove_var("LIMITS_CLEANUP_BATCH_SIZE");
        }
    }
}
