//! Configuration for queue runs, the event bus and logging.
//!
//! [`QueueConfig`] holds the run parameters (concurrency, retry budget,
//! inter-batch delay, per-item timeout). [`ConfigOverrides`] carries the
//! optional per-`start()` changes, and [`BatchworkConfig`] bundles everything
//! for loading from TOML files or the environment.

use crate::{BatchworkError, Result, events::EventConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Serializes `Duration` as human-readable strings like "250ms", "30s", "5m".
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn format(duration: &Duration) -> String {
        let millis = duration.as_millis();
        if millis == 0 {
            "0s".to_string()
        } else if millis % 1000 != 0 {
            format!("{}ms", millis)
        } else {
            let secs = duration.as_secs();
            if secs % 3600 == 0 {
                format!("{}h", secs / 3600)
            } else if secs % 60 == 0 {
                format!("{}m", secs / 60)
            } else {
                format!("{}s", secs)
            }
        }
    }

    /// Parse a duration string like "250ms", "30s", "5m", "1h", "90", etc.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();

        // Handle just numbers (assume seconds)
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        if let Some(num_str) = s.strip_suffix("ms") {
            let millis: u64 = num_str
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
            return Ok(Duration::from_millis(millis));
        }

        if s.len() < 2 {
            return Err(format!("Invalid duration format: {}", s));
        }

        let (num_str, suffix) = s.split_at(s.len() - 1);
        let num: u64 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

        match suffix {
            "s" => Ok(Duration::from_secs(num)),
            "m" => Ok(Duration::from_secs(num * 60)),
            "h" => Ok(Duration::from_secs(num * 3600)),
            "d" => Ok(Duration::from_secs(num * 86400)),
            _ => Err(format!(
                "Invalid duration suffix: {}. Use ms, s, m, h, or d",
                suffix
            )),
        }
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => serializer.serialize_str(&super::format(duration)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            use serde::de::Error;

            match Option::<String>::deserialize(deserializer)? {
                Some(s) => super::parse(&s).map(Some).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// Parameters of a queue run.
///
/// # Examples
///
/// ```rust
/// use batchwork::config::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::new()
///     .with_concurrency(4)
///     .with_retry_budget(2)
///     .with_inter_batch_delay(Duration::from_millis(200));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of items in flight at once
    pub concurrency: usize,

    /// Maximum number of attempts per item
    pub retry_budget: u32,

    /// Pause between batches
    #[serde(with = "duration_str")]
    pub inter_batch_delay: Duration,

    /// Per-item processor timeout
    #[serde(with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub item_timeout: Option<Duration>,

    /// Opaque options passed to the processor on every call
    #[serde(skip_serializing_if = "Value::is_null")]
    pub processor_options: Value,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry_budget: 3,
            inter_batch_delay: Duration::ZERO,
            item_timeout: None,
            processor_options: Value::Null,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    pub fn with_processor_options(mut self, options: Value) -> Self {
        self.processor_options = options;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BatchworkError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.item_timeout == Some(Duration::ZERO) {
            return Err(BatchworkError::Configuration(
                "item_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a copy with the given overrides applied.
    pub fn merged(&self, overrides: &ConfigOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(concurrency) = overrides.concurrency {
            merged.concurrency = concurrency;
        }
        if let Some(retry_budget) = overrides.retry_budget {
            merged.retry_budget = retry_budget;
        }
        if let Some(delay) = overrides.inter_batch_delay {
            merged.inter_batch_delay = delay;
        }
        if let Some(timeout) = overrides.item_timeout {
            merged.item_timeout = Some(timeout);
        }
        if let Some(options) = &overrides.processor_options {
            merged.processor_options = options.clone();
        }
        merged
    }
}

/// Optional changes applied by `start()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigOverrides {
    pub concurrency: Option<usize>,
    pub retry_budget: Option<u32>,
    #[serde(
        with = "duration_str::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inter_batch_delay: Option<Duration>,
    #[serde(
        with = "duration_str::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub item_timeout: Option<Duration>,
    pub processor_options: Option<Value>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = Some(retry_budget);
        self
    }

    pub fn inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = Some(delay);
        self
    }

    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    pub fn processor_options(mut self, options: Value) -> Self {
        self.processor_options = Some(options);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error or an EnvFilter string)
    pub level: String,

    /// Whether to include file and line information
    pub include_location: bool,

    /// Whether to include the event target
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include_location: false,
            include_target: true,
        }
    }
}

/// Top-level configuration bundle.
///
/// # Examples
///
/// ```rust
/// use batchwork::config::BatchworkConfig;
///
/// let config = BatchworkConfig::development();
/// assert_eq!(config.logging.level, "debug");
/// assert!(config.events.log_events);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchworkConfig {
    pub queue: QueueConfig,
    pub events: EventConfig,
    pub logging: LoggingConfig,
}

impl BatchworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(concurrency) = std::env::var("BATCHWORK_CONCURRENCY") {
            config.queue.concurrency = concurrency.parse().unwrap_or(config.queue.concurrency);
        }
        if let Ok(budget) = std::env::var("BATCHWORK_RETRY_BUDGET") {
            config.queue.retry_budget = budget.parse().unwrap_or(config.queue.retry_budget);
        }
        if let Ok(delay) = std::env::var("BATCHWORK_INTER_BATCH_DELAY_MS") {
            if let Ok(millis) = delay.parse::<u64>() {
                config.queue.inter_batch_delay = Duration::from_millis(millis);
            }
        }
        if let Ok(timeout) = std::env::var("BATCHWORK_ITEM_TIMEOUT_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                config.queue.item_timeout = Some(Duration::from_millis(millis));
            }
        }
        if let Ok(level) = std::env::var("BATCHWORK_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.queue.validate()?;
        Ok(config)
    }

    /// Create a configuration for development use
    pub fn development() -> Self {
        Self {
            queue: QueueConfig {
                concurrency: 2,
                retry_budget: 1,
                ..Default::default()
            },
            events: EventConfig { log_events: true },
            logging: LoggingConfig {
                level: "debug".to_string(),
                include_location: true,
                ..Default::default()
            },
        }
    }

    /// Create a configuration for production use
    pub fn production() -> Self {
        Self {
            queue: QueueConfig {
                concurrency: 8,
                retry_budget: 3,
                inter_batch_delay: Duration::from_millis(200),
                item_timeout: Some(Duration::from_secs(60)),
                ..Default::default()
            },
            events: EventConfig { log_events: false },
            logging: LoggingConfig {
                level: "info".to_string(),
                include_target: false,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.inter_batch_delay, Duration::ZERO);
        assert!(config.item_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = QueueConfig::new().with_concurrency(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BatchworkError::Configuration(_)));

        let config = QueueConfig::new().with_item_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let base = QueueConfig::new().with_processor_options(json!({"store": "eu"}));
        let overrides = ConfigOverrides::new()
            .concurrency(5)
            .inter_batch_delay(Duration::from_millis(50));

        let merged = base.merged(&overrides);
        assert_eq!(merged.concurrency, 5);
        assert_eq!(merged.retry_budget, base.retry_budget);
        assert_eq!(merged.inter_batch_delay, Duration::from_millis(50));
        assert_eq!(merged.processor_options, json!({"store": "eu"}));

        assert!(ConfigOverrides::new().is_empty());
        assert!(!overrides.is_empty());
        assert_eq!(base.merged(&ConfigOverrides::new()), base);
    }

    #[test]
    fn test_overrides_use_duration_strings() {
        let overrides = ConfigOverrides::new()
            .inter_batch_delay(Duration::from_millis(250))
            .item_timeout(Duration::from_secs(30));

        let value = serde_json::to_value(&overrides).unwrap();
        assert_eq!(value["inter_batch_delay"], json!("250ms"));
        assert_eq!(value["item_timeout"], json!("30s"));

        let parsed: ConfigOverrides =
            serde_json::from_value(json!({"concurrency": 2, "item_timeout": "5m"})).unwrap();
        assert_eq!(parsed.concurrency, Some(2));
        assert_eq!(parsed.item_timeout, Some(Duration::from_secs(300)));
        assert_eq!(parsed.inter_batch_delay, None);
    }

    #[test]
    fn test_presets() {
        let dev = BatchworkConfig::development();
        assert_eq!(dev.queue.concurrency, 2);
        assert!(dev.logging.include_location);

        let prod = BatchworkConfig::production();
        assert_eq!(prod.queue.concurrency, 8);
        assert_eq!(prod.queue.item_timeout, Some(Duration::from_secs(60)));
        assert!(!prod.events.log_events);
    }

    #[test]
    fn test_config_file_operations() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("batchwork.toml");

        let mut config = BatchworkConfig::new();
        config.queue = QueueConfig::new()
            .with_concurrency(6)
            .with_retry_budget(4)
            .with_inter_batch_delay(Duration::from_millis(250))
            .with_item_timeout(Duration::from_secs(30));

        config.save_to_file(config_path.to_str().unwrap()).unwrap();

        let toml_content = std::fs::read_to_string(&config_path).unwrap();
        assert!(toml_content.contains("inter_batch_delay = \"250ms\""));
        assert!(toml_content.contains("item_timeout = \"30s\""));

        let loaded = BatchworkConfig::from_file(config_path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.queue.concurrency, 6);
        assert_eq!(loaded.queue.retry_budget, 4);
        assert_eq!(loaded.queue.inter_batch_delay, Duration::from_millis(250));
        assert_eq!(loaded.queue.item_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BatchworkConfig = toml::from_str(
            r#"
            [queue]
            concurrency = 10
            inter_batch_delay = "2m"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.concurrency, 10);
        assert_eq!(config.queue.retry_budget, 3);
        assert_eq!(config.queue.inter_batch_delay, Duration::from_secs(120));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(duration_str::parse("90"), Ok(Duration::from_secs(90)));
        assert_eq!(duration_str::parse("15ms"), Ok(Duration::from_millis(15)));
        assert_eq!(duration_str::parse("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(duration_str::parse("2d"), Ok(Duration::from_secs(172_800)));
        assert!(duration_str::parse("5x").is_err());
        assert!(duration_str::parse("s").is_err());

        assert_eq!(duration_str::format(&Duration::from_millis(1500)), "1500ms");
        assert_eq!(duration_str::format(&Duration::from_secs(300)), "5m");
        assert_eq!(duration_str::format(&Duration::ZERO), "0s");
    }

    #[test]
    fn test_env_config() {
        unsafe {
            std::env::set_var("BATCHWORK_CONCURRENCY", "7");
            std::env::set_var("BATCHWORK_RETRY_BUDGET", "5");
            std::env::set_var("BATCHWORK_INTER_BATCH_DELAY_MS", "120");
            std::env::set_var("BATCHWORK_LOG_LEVEL", "warn");
        }

        let config = BatchworkConfig::from_env().unwrap();

        assert_eq!(config.queue.concurrency, 7);
        assert_eq!(config.queue.retry_budget, 5);
        assert_eq!(config.queue.inter_batch_delay, Duration::from_millis(120));
        assert_eq!(config.logging.level, "warn");

        // Clean up
        unsafe {
            std::env::remove_var("BATCHWORK_CONCURRENCY");
            std::env::remove_var("BATCHWORK_RETRY_BUDGET");
            std::env::remove_var("BATCHWORK_INTER_BATCH_DELAY_MS");
            std::env::remove_var("BATCHWORK_LOG_LEVEL");
        }
    }
}
