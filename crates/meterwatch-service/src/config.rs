//! Poller configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use meterwatch_core::client::{DEFAULT_DISCOVERY_PATH, DEFAULT_READING_PATH, DEFAULT_TOKEN_HEADER};
use meterwatch_core::{ApiSettings, RetryConfig};
use meterwatch_types::Meter;

/// Poller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Billing API settings.
    pub api: ApiConfig,
    /// Polling cadence and retry policy.
    pub polling: PollingConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Meters to poll. Empty means "discover from the API".
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all errors at once.
    ///
    /// This checks:
    /// - The API base URL is an http(s) URL and the token is present
    /// - Endpoint paths are absolute and the reading path contains `{id}`
    /// - Poll interval and backoff settings are within bounds
    /// - Storage path is not empty and the log level parses
    /// - Meter identifiers are non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.api.validate());
        errors.extend(self.polling.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.logging.validate());

        let mut seen_ids = std::collections::HashSet::new();
        for (i, meter) in self.meters.iter().enumerate() {
            let prefix = format!("meters[{}]", i);
            errors.extend(meter.validate(&prefix));

            if !meter.id.is_empty() && !seen_ids.insert(meter.id.as_str()) {
                errors.push(ValidationError {
                    field: format!("{}.id", prefix),
                    message: format!("duplicate meter id '{}'", meter.id),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Configured meters, in file order.
    pub fn meter_list(&self) -> Vec<Meter> {
        self.meters.iter().map(MeterConfig::to_meter).collect()
    }
}

/// Billing API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Opaque credential, obtained outside this program.
    pub merchant_token: String,
    /// Header the credential is sent in.
    pub token_header: String,
    /// Reading endpoint; `{id}` is replaced by the meter id.
    pub reading_path: String,
    /// Meter listing endpoint.
    pub discovery_path: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            merchant_token: String::new(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            reading_path: DEFAULT_READING_PATH.to_string(),
            discovery_path: DEFAULT_DISCOVERY_PATH.to_string(),
            request_timeout_secs: 30,
            user_agent: None,
            origin: None,
            referer: None,
        }
    }
}

/// Maximum request timeout in seconds.
pub const MAX_REQUEST_TIMEOUT: u64 = 300;

impl ApiConfig {
    /// Validate API configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.base_url.is_empty() {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: "base URL cannot be empty".to_string(),
            });
        } else if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://")
        {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!(
                    "invalid base URL '{}': must start with http:// or https://",
                    self.base_url
                ),
            });
        }

        if self.merchant_token.trim().is_empty() {
            errors.push(ValidationError {
                field: "api.merchant_token".to_string(),
                message: "merchant token cannot be empty (set it here, with --token, or METERWATCH_TOKEN)"
                    .to_string(),
            });
        }

        if self.token_header.trim().is_empty() {
            errors.push(ValidationError {
                field: "api.token_header".to_string(),
                message: "token header name cannot be empty".to_string(),
            });
        }

        if !self.reading_path.starts_with('/') {
            errors.push(ValidationError {
                field: "api.reading_path".to_string(),
                message: format!("path '{}' must start with '/'", self.reading_path),
            });
        } else if !self.reading_path.contains("{id}") {
            errors.push(ValidationError {
                field: "api.reading_path".to_string(),
                message: format!(
                    "path '{}' must contain the {{id}} placeholder",
                    self.reading_path
                ),
            });
        }

        if !self.discovery_path.starts_with('/') {
            errors.push(ValidationError {
                field: "api.discovery_path".to_string(),
                message: format!("path '{}' must start with '/'", self.discovery_path),
            });
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT {
            errors.push(ValidationError {
                field: "api.request_timeout_secs".to_string(),
                message: format!(
                    "request timeout {} must be between 1 and {} seconds",
                    self.request_timeout_secs, MAX_REQUEST_TIMEOUT
                ),
            });
        }

        errors
    }

    /// Client settings derived from this section.
    pub fn to_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.base_url.clone(),
            token_header: self.token_header.clone(),
            reading_path: self.reading_path.clone(),
            discovery_path: self.discovery_path.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            origin: self.origin.clone(),
            referer: self.referer.clone(),
        }
    }
}

/// Polling cadence and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between the starts of consecutive cycles.
    pub interval_seconds: u64,
    /// Retries per meter per cycle for transient failures.
    pub max_retries: u32,
    /// First backoff delay in seconds.
    pub backoff_base_seconds: u64,
    /// Growth factor applied to each subsequent delay.
    pub backoff_multiplier: f64,
    /// Cap for any single delay, in seconds.
    pub backoff_max_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            max_retries: 3,
            backoff_base_seconds: 1,
            backoff_multiplier: 2.0,
            backoff_max_seconds: 300,
        }
    }
}

/// Minimum poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 10;
/// Maximum poll interval in seconds (1 day).
pub const MAX_POLL_INTERVAL: u64 = 86_400;
/// Maximum retries per meter per cycle.
pub const MAX_RETRIES: u32 = 10;
/// Maximum single backoff delay in seconds (1 day).
pub const MAX_BACKOFF_SECONDS: u64 = 86_400;

impl PollingConfig {
    /// Validate polling configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_seconds < MIN_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "polling.interval_seconds".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} seconds)",
                    self.interval_seconds, MIN_POLL_INTERVAL
                ),
            });
        } else if self.interval_seconds > MAX_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "polling.interval_seconds".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_seconds, MAX_POLL_INTERVAL
                ),
            });
        }

        if self.max_retries > MAX_RETRIES {
            errors.push(ValidationError {
                field: "polling.max_retries".to_string(),
                message: format!(
                    "max retries {} is too high (maximum {})",
                    self.max_retries, MAX_RETRIES
                ),
            });
        }

        if self.backoff_base_seconds == 0 {
            errors.push(ValidationError {
                field: "polling.backoff_base_seconds".to_string(),
                message: "backoff base must be at least 1 second".to_string(),
            });
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            errors.push(ValidationError {
                field: "polling.backoff_multiplier".to_string(),
                message: format!(
                    "backoff multiplier {} must be a finite number >= 1.0",
                    self.backoff_multiplier
                ),
            });
        }

        if self.backoff_max_seconds < self.backoff_base_seconds {
            errors.push(ValidationError {
                field: "polling.backoff_max_seconds".to_string(),
                message: format!(
                    "backoff cap {} is below the backoff base {}",
                    self.backoff_max_seconds, self.backoff_base_seconds
                ),
            });
        } else if self.backoff_max_seconds > MAX_BACKOFF_SECONDS {
            errors.push(ValidationError {
                field: "polling.backoff_max_seconds".to_string(),
                message: format!(
                    "backoff cap {} is too long (maximum {} seconds / 1 day)",
                    self.backoff_max_seconds, MAX_BACKOFF_SECONDS
                ),
            });
        }

        errors
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Retry policy derived from this section. Jitter is off so delays are
    /// exactly `base * multiplier^n`.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .initial_delay(Duration::from_secs(self.backoff_base_seconds))
            .backoff_multiplier(self.backoff_multiplier)
            .max_delay(Duration::from_secs(self.backoff_max_seconds))
            .jitter(false)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. A leading `~/` is expanded to the home directory.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: meterwatch_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }

    /// The database path with `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match (self.path.strip_prefix("~"), dirs::home_dir()) {
            (Ok(rest), Some(home)) => home.join(rest),
            _ => self.path.clone(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        match self.level_filter() {
            Ok(_) => Vec::new(),
            Err(_) => vec![ValidationError {
                field: "logging.level".to_string(),
                message: format!(
                    "unknown log level '{}': expected trace, debug, info, warn, error or off",
                    self.level
                ),
            }],
        }
    }

    pub fn level_filter(&self) -> Result<LevelFilter, tracing::level_filters::ParseLevelFilterError> {
        LevelFilter::from_str(self.level.trim())
    }
}

/// Configuration for a meter to poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeterConfig {
    /// Meter identifier used by the billing API.
    pub id: String,
    /// Friendly label for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MeterConfig {
    /// Validate meter configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.id", prefix),
                message: "meter id cannot be empty".to_string(),
            });
        }

        if let Some(label) = &self.label
            && label.is_empty()
        {
            errors.push(ValidationError {
                field: format!("{}.label", prefix),
                message: "label cannot be empty string (omit it instead)".to_string(),
            });
        }

        errors
    }

    pub fn to_meter(&self) -> Meter {
        Meter::new(
            self.id.clone(),
            self.label.clone().unwrap_or_else(|| self.id.clone()),
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `api.base_url` or `meters[0].id`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meterwatch")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            api: ApiConfig {
                base_url: "https://api.example.com".to_string(),
                merchant_token: "token".to_string(),
                ..Default::default()
            },
            meters: vec![MeterConfig {
                id: "M1".to_string(),
                label: Some("Unit A".to_string()),
            }],
            ..Default::default()
        }
    }

    fn validation_fields(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.api.token_header, "x-merchant-token");
        assert_eq!(config.api.reading_path, "/merchant/meter/{id}/sync-status");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.polling.max_retries, 3);
        assert_eq!(config.polling.backoff_base_seconds, 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.meters.is_empty());
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.path, meterwatch_store::default_db_path());
    }

    #[test]
    fn test_default_config_requires_url_and_token() {
        let fields = validation_fields(&Config::default());
        assert_eq!(fields, vec!["api.base_url", "api.merchant_token"]);
    }

    #[test]
    fn test_valid_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [api]
            base_url = "https://api.example.com"
            merchant_token = "abc"
            token_header = "x-api-key"
            reading_path = "/v1/meters/{id}"
            request_timeout_secs = 10
            user_agent = "meterwatch/0.1"

            [polling]
            interval_seconds = 120
            max_retries = 5
            backoff_base_seconds = 2
            backoff_multiplier = 3.0
            backoff_max_seconds = 60

            [storage]
            path = "/tmp/readings.db"

            [logging]
            level = "debug"

            [[meters]]
            id = "M1"
            label = "Unit A"

            [[meters]]
            id = "M2"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.api.token_header, "x-api-key");
        assert_eq!(config.api.discovery_path, "/merchant/meters");
        assert_eq!(config.api.user_agent, Some("meterwatch/0.1".to_string()));
        assert_eq!(config.polling.interval(), Duration::from_secs(120));
        assert_eq!(config.storage.path, PathBuf::from("/tmp/readings.db"));
        assert_eq!(
            config.meter_list(),
            vec![Meter::new("M1", "Unit A"), Meter::new("M2", "M2")]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_from_polling() {
        let retry = PollingConfig::default().retry_config();
        assert_eq!(retry.max_retries, 3);
        assert!(!retry.jitter);
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_api_settings_from_config() {
        let settings = valid_config().api.to_settings();
        assert_eq!(settings.base_url, "https://api.example.com");
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.token_header, "x-merchant-token");
    }

    #[test]
    fn test_api_validation() {
        let mut config = valid_config();
        config.api.base_url = "ftp://example.com".to_string();
        config.api.reading_path = "/meters".to_string();
        config.api.discovery_path = "meters".to_string();
        config.api.request_timeout_secs = 0;

        assert_eq!(
            validation_fields(&config),
            vec![
                "api.base_url",
                "api.reading_path",
                "api.discovery_path",
                "api.request_timeout_secs"
            ]
        );
    }

    #[test]
    fn test_polling_validation() {
        let mut config = valid_config();
        config.polling.interval_seconds = 5;
        config.polling.max_retries = 50;
        config.polling.backoff_base_seconds = 0;
        config.polling.backoff_multiplier = 0.5;

        assert_eq!(
            validation_fields(&config),
            vec![
                "polling.interval_seconds",
                "polling.max_retries",
                "polling.backoff_base_seconds",
                "polling.backoff_multiplier"
            ]
        );

        let mut config = valid_config();
        config.polling.interval_seconds = MAX_POLL_INTERVAL + 1;
        config.polling.backoff_base_seconds = 10;
        config.polling.backoff_max_seconds = 5;
        assert_eq!(
            validation_fields(&config),
            vec!["polling.interval_seconds", "polling.backoff_max_seconds"]
        );
    }

    #[test]
    fn test_backoff_cap_is_bounded() {
        let mut config = valid_config();
        config.polling.backoff_multiplier = 1e30;
        config.polling.backoff_max_seconds = u64::MAX;
        assert_eq!(
            validation_fields(&config),
            vec!["polling.backoff_max_seconds"]
        );

        config.polling.backoff_max_seconds = MAX_BACKOFF_SECONDS;
        assert!(validation_fields(&config).is_empty());
        let retry = config.polling.retry_config();
        assert_eq!(
            retry.delay_for_attempt(1),
            Duration::from_secs(MAX_BACKOFF_SECONDS)
        );
    }

    #[test]
    fn test_logging_validation() {
        let mut config = valid_config();
        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert_eq!(validation_fields(&config), vec!["logging.level"]);
    }

    #[test]
    fn test_meter_validation() {
        let mut config = valid_config();
        config.meters.push(MeterConfig {
            id: "M1".to_string(),
            label: None,
        });
        config.meters.push(MeterConfig {
            id: "".to_string(),
            label: Some("".to_string()),
        });

        assert_eq!(
            validation_fields(&config),
            vec!["meters[1].id", "meters[2].id", "meters[2].label"]
        );
    }

    #[test]
    fn test_storage_path_validation() {
        let mut config = valid_config();
        config.storage.path = PathBuf::new();
        assert_eq!(validation_fields(&config), vec!["storage.path"]);
    }

    #[test]
    fn test_resolved_path_expands_home() {
        let config = StorageConfig {
            path: PathBuf::from("~/data/readings.db"),
        };
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.resolved_path(), home.join("data/readings.db"));
        }

        let absolute = StorageConfig {
            path: PathBuf::from("/var/lib/readings.db"),
        };
        assert_eq!(absolute.resolved_path(), PathBuf::from("/var/lib/readings.db"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = valid_config();
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not [valid toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("meterwatch/config.toml"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = ConfigError::Validation(vec![
            ValidationError {
                field: "api.base_url".to_string(),
                message: "base URL cannot be empty".to_string(),
            },
            ValidationError {
                field: "meters[0].id".to_string(),
                message: "meter id cannot be empty".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("Configuration validation failed"));
        assert!(msg.contains("  - api.base_url: base URL cannot be empty"));
        assert!(msg.contains("  - meters[0].id: meter id cannot be empty"));
    }
}
