use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the inspector service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// SQS queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// S3 metadata lookup configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Downstream size-report collector
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Liveness endpoint configuration
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Shared AWS client settings
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, ElasticMQ, MinIO, etc.)
    pub endpoint_url: Option<String>,
}

/// SQS consumption configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Full queue URL; takes precedence over `name`
    pub url: Option<String>,
    /// Queue name, resolved to a URL at startup
    pub name: Option<String>,
    /// Messages requested per receive call (1-10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    /// Long-poll wait in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Pause between polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after a failed receive in seconds
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Delete messages whose metadata lookup ran out of attempts
    #[serde(default)]
    pub delete_on_resolver_exhaustion: bool,
}

/// S3 metadata lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket the uploads land in (informational only)
    pub bucket_name: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Maximum HeadObject attempts per message
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between HeadObject attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Size-report collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Collector base URL; reports go to `{url}/size-report`
    pub url: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Only acknowledge queue messages once the collector returned 200
    #[serde(default)]
    pub require_ack: bool,
}

/// Liveness endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Listen address
    #[serde(default = "default_liveness_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_liveness_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "inspector".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "eu-central-1".to_string()
}

fn default_max_messages() -> i32 {
    1
}

fn default_wait_time_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_error_cooldown_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_liveness_host() -> String {
    "0.0.0.0".to_string()
}

fn default_liveness_port() -> u16 {
    5000
}

/// Deployment variables that map onto config keys, checked in order.
/// The first variable present for a key wins.
const DEPLOYMENT_VARIABLES: &[(&str, &str)] = &[
    ("AWS_REGION", "aws.region"),
    ("SQS_QUEUE_URL", "queue.url"),
    ("QUEUE_NAME", "queue.name"),
    ("FRONTEND_URL", "collector.url"),
    ("FRONTEND_NOTIFY_URL", "collector.url"),
    ("BUCKET_NAME", "storage.bucket_name"),
];

impl Config {
    /// Load configuration from config files and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env(std::env::vars().collect())
    }

    /// Load configuration from config files and the given environment map
    pub fn from_env(env: config::Map<String, String>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/inspector").required(false))
            .add_source(config::File::with_name("/etc/inspector/inspector").required(false))
            // INSPECTOR__QUEUE__WAIT_TIME_SECS -> queue.wait_time_secs
            .add_source(
                config::Environment::with_prefix("INSPECTOR")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            );

        let mut claimed: Vec<&str> = Vec::new();
        for (variable, key) in DEPLOYMENT_VARIABLES {
            if claimed.contains(key) {
                continue;
            }
            if let Some(value) = env.get(*variable).filter(|v| !v.is_empty()) {
                builder = builder.set_override(*key, value.clone())?;
                claimed.push(*key);
            }
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check required values and bounds before anything starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.url.is_none() && self.queue.name.is_none() {
            return Err(ConfigError::MissingRequired(
                "SQS_QUEUE_URL or QUEUE_NAME".to_string(),
            ));
        }

        let collector_url = self
            .collector
            .url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired("FRONTEND_URL".to_string()))?;
        if !(collector_url.starts_with("http://") || collector_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "collector.url".to_string(),
                message: format!("expected an http(s) URL, got {collector_url:?}"),
            });
        }

        if self.storage.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "storage.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !(1..=10).contains(&self.queue.max_messages) {
            return Err(ConfigError::InvalidValue {
                key: "queue.max_messages".to_string(),
                message: format!("must be between 1 and 10, got {}", self.queue.max_messages),
            });
        }

        Ok(())
    }

    /// Get the long-poll wait as Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.queue.wait_time_secs)
    }

    /// Get the pause between polls as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    /// Get the cooldown after a failed receive as Duration
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.queue.error_cooldown_secs)
    }

    /// Get the delay between metadata lookup attempts as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.storage.retry_delay_ms)
    }

    /// Get the collector request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.collector.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            name: None,
            max_messages: default_max_messages(),
            wait_time_secs: default_wait_time_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
            delete_on_resolver_exhaustion: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            force_path_style: false,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: default_request_timeout_secs(),
            require_ack: false,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            host: default_liveness_host(),
            port: default_liveness_port(),
        }
    }
}
