//! Configuration management for fleetwatch.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by `cli`)
//! - Validation and defaults

use crate::core::{ExporterError, Result};
use crate::events::EventKind;
use crate::metrics::PathTemplate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Complete configuration for fleetwatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Platform API and event transport configuration
    pub platform: PlatformConfig,
    /// Event subscription configuration
    pub events: EventsConfig,
    /// Metric filtering, naming and expiry
    pub metrics: MetricsConfig,
    /// Backend sinks
    pub sinks: SinksConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Platform API endpoint
    pub api_endpoint: String,
    /// Log cache endpoint; derived from the API endpoint when empty
    pub log_cache_endpoint: String,
    /// UAA username (password grant)
    pub username: String,
    /// UAA password
    #[serde(skip_serializing)]
    pub password: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (client credentials grant when username is empty)
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Time between workload discovery polls
    #[serde(with = "humantime_serde")]
    pub update_frequency: Duration,
    /// Also watch managed service instances
    pub discover_services: bool,
}

/// Event subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Event kinds forwarded to the dispatch loop; everything else is dropped
    pub types: Vec<EventKind>,
    /// Capacity of the queue between watchers and the dispatch loop
    pub queue_capacity: usize,
    /// How often the log cache transport polls each workload
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// Metric configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metric name prefixes to forward; empty forwards everything
    pub allow_list: Vec<String>,
    /// Path template used by path-based sinks
    pub template: String,
    /// Series not observed for this long are expired
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// How often expiry runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// Sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub statsd: StatsdConfig,
    pub prometheus: PrometheusConfig,
    pub debug: DebugSinkConfig,
}

/// Statsd sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConfig {
    pub enabled: bool,
    /// `host:port` of the statsd daemon
    pub endpoint: String,
    /// Prefix prepended to every stat
    pub prefix: String,
}

/// Prometheus sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    /// Address of the `/metrics` endpoint
    pub bind_address: SocketAddr,
}

/// Debug sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSinkConfig {
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            platform: PlatformConfig::default(),
            events: EventsConfig::default(),
            metrics: MetricsConfig::default(),
            sinks: SinksConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            api_endpoint: "https://api.10.244.0.34.xip.io".to_string(),
            log_cache_endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            client_id: "cf".to_string(),
            client_secret: String::new(),
            skip_tls_verify: false,
            update_frequency: Duration::from_secs(300),
            discover_services: false,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            types: EventKind::ALL.to_vec(),
            queue_capacity: 1024,
            poll_interval: Duration::from_secs(15),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            allow_list: Vec::new(),
            template: "{{.Space}}.{{.App}}.{{.Instance}}.{{.Metric}}".to_string(),
            cache_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for StatsdConfig {
    fn default() -> Self {
        StatsdConfig {
            enabled: true,
            endpoint: "127.0.0.1:8125".to_string(),
            prefix: "mycf.".to_string(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        PrometheusConfig {
            enabled: false,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.platform.api_endpoint.is_empty() {
            return Err(ExporterError::config("api_endpoint must not be empty"));
        }

        if self.platform.update_frequency.is_zero() {
            return Err(ExporterError::config("update_frequency must be greater than 0"));
        }

        if self.events.types.is_empty() {
            return Err(ExporterError::config("at least one event type must be enabled"));
        }

        if self.events.queue_capacity == 0 {
            return Err(ExporterError::config("queue_capacity must be greater than 0"));
        }

        if self.events.poll_interval.is_zero() {
            return Err(ExporterError::config("poll_interval must be greater than 0"));
        }

        if self.metrics.sweep_interval.is_zero() {
            return Err(ExporterError::config("sweep_interval must be greater than 0"));
        }

        if self.metrics.cache_ttl < self.metrics.sweep_interval {
            return Err(ExporterError::config(format!(
                "cache_ttl ({:?}) must not be shorter than sweep_interval ({:?})",
                self.metrics.cache_ttl, self.metrics.sweep_interval
            )));
        }

        PathTemplate::parse(&self.metrics.template)?;

        if !self.sinks.statsd.enabled && !self.sinks.prometheus.enabled && !self.sinks.debug.enabled
        {
            return Err(ExporterError::config("at least one sink must be enabled"));
        }

        if self.sinks.statsd.enabled && self.sinks.statsd.endpoint.is_empty() {
            return Err(ExporterError::config("statsd endpoint must not be empty"));
        }

        Ok(())
    }

    /// Log cache endpoint, derived from the API endpoint (`api.` → `log-cache.`) when unset
    pub fn log_cache_endpoint(&self) -> String {
        if !self.platform.log_cache_endpoint.is_empty() {
            return self.platform.log_cache_endpoint.clone();
        }
        self.platform.api_endpoint.replacen("://api.", "://log-cache.", 1)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| ExporterError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set API endpoint
    pub fn api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.platform.api_endpoint = endpoint.into();
        self
    }

    /// Set UAA credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.platform.username = username.into();
        self.config.platform.password = password.into();
        self
    }

    /// Set the log cache endpoint
    pub fn log_cache_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.platform.log_cache_endpoint = endpoint.into();
        self
    }

    /// Set the OAuth client used against UAA
    pub fn client(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.config.platform.client_id = client_id.into();
        self.config.platform.client_secret = client_secret.into();
        self
    }

    /// Also watch managed service instances
    pub fn discover_services(mut self, enable: bool) -> Self {
        self.config.platform.discover_services = enable;
        self
    }

    /// Set the event kinds forwarded to the dispatch loop
    pub fn event_types(mut self, types: Vec<EventKind>) -> Self {
        self.config.events.types = types;
        self
    }

    /// Set discovery poll frequency
    pub fn update_frequency(mut self, frequency: Duration) -> Self {
        self.config.platform.update_frequency = frequency;
        self
    }

    /// Skip TLS verification
    pub fn skip_tls_verify(mut self, skip: bool) -> Self {
        self.config.platform.skip_tls_verify = skip;
        self
    }

    /// Set the metric name allow-list
    pub fn allow_list(mut self, prefixes: Vec<String>) -> Self {
        self.config.metrics.allow_list = prefixes;
        self
    }

    /// Set the metric path template
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.metrics.template = template.into();
        self
    }

    /// Set statsd endpoint and prefix
    pub fn statsd(mut self, endpoint: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.config.sinks.statsd.endpoint = endpoint.into();
        self.config.sinks.statsd.prefix = prefix.into();
        self
    }

    /// Set only the statsd endpoint
    pub fn statsd_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.sinks.statsd.endpoint = endpoint.into();
        self
    }

    /// Set only the statsd prefix
    pub fn statsd_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.sinks.statsd.prefix = prefix.into();
        self
    }

    /// Enable or disable the statsd sink
    pub fn enable_statsd(mut self, enable: bool) -> Self {
        self.config.sinks.statsd.enabled = enable;
        self
    }

    /// Enable the Prometheus sink on the given address
    pub fn prometheus(mut self, bind_address: SocketAddr) -> Self {
        self.config.sinks.prometheus.enabled = true;
        self.config.sinks.prometheus.bind_address = bind_address;
        self
    }

    /// Use the structured log format
    pub fn structured_logging(mut self, structured: bool) -> Self {
        self.config.logging.structured = structured;
        self
    }

    /// Set debug mode; debug mode logs metrics instead of sending them to statsd
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        if debug {
            self.config.sinks.debug.enabled = true;
            self.config.sinks.statsd.enabled = false;
        }
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
