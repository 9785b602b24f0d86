//! Command-line interface for fleetwatch.
//!
//! Every flag can also be given as a `FLEETWATCH_*` environment variable.
//! Flags override the config file, which overrides the defaults.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, ExporterError, Result};
use crate::events::EventKind;
use crate::Application;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Export metrics of running platform workloads to statsd and Prometheus.
#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Platform API endpoint
    #[arg(long, env = "FLEETWATCH_API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// Log cache endpoint (default: derived from the API endpoint)
    #[arg(long, env = "FLEETWATCH_LOG_CACHE_ENDPOINT")]
    pub log_cache_endpoint: Option<String>,

    /// UAA username; client credentials are used when empty
    #[arg(short, long, env = "FLEETWATCH_USERNAME")]
    pub username: Option<String>,

    /// UAA password
    #[arg(short, long, env = "FLEETWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// OAuth client id
    #[arg(long, env = "FLEETWATCH_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "FLEETWATCH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, env = "FLEETWATCH_SKIP_SSL_VALIDATION")]
    pub skip_ssl_validation: bool,

    /// Seconds between workload discovery polls
    #[arg(long, env = "FLEETWATCH_UPDATE_FREQUENCY")]
    pub update_frequency: Option<u64>,

    /// Also watch managed service instances
    #[arg(long, env = "FLEETWATCH_DISCOVER_SERVICES")]
    pub discover_services: bool,

    /// Event types to export (comma separated)
    #[arg(long, env = "FLEETWATCH_EVENTS", value_delimiter = ',', value_parser = parse_event_kind)]
    pub events: Vec<EventKind>,

    /// Statsd endpoint (host:port)
    #[arg(long, env = "FLEETWATCH_STATSD_ENDPOINT")]
    pub statsd_endpoint: Option<String>,

    /// Prefix for every statsd stat
    #[arg(long, env = "FLEETWATCH_STATSD_PREFIX")]
    pub statsd_prefix: Option<String>,

    /// Disable the statsd sink
    #[arg(long, env = "FLEETWATCH_NO_STATSD")]
    pub no_statsd: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "FLEETWATCH_PROMETHEUS_BIND_ADDRESS")]
    pub prometheus: Option<SocketAddr>,

    /// Only export metrics whose name starts with one of these prefixes (comma separated)
    #[arg(long, env = "FLEETWATCH_METRIC_WHITELIST", value_delimiter = ',')]
    pub allow_list: Vec<String>,

    /// Metric path template, e.g. "{{.Space}}.{{.App}}.{{.Metric}}"
    #[arg(long, env = "FLEETWATCH_METRIC_TEMPLATE")]
    pub template: Option<String>,

    /// Configuration file path (default: ~/.config/fleetwatch/config.yaml)
    #[arg(short, long, env = "FLEETWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log metrics instead of sending them to statsd, and enable debug logging
    #[arg(short, long, env = "FLEETWATCH_DEBUG")]
    pub debug: bool,

    /// Structured log format with targets and line numbers
    #[arg(long, env = "FLEETWATCH_STRUCTURED_LOGS")]
    pub structured: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

fn parse_event_kind(value: &str) -> std::result::Result<EventKind, String> {
    value.parse().map_err(|e: ExporterError| e.to_string())
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let default_path = dirs::config_dir()
                    .map(|d| d.join("fleetwatch").join("config.yaml"))
                    .unwrap_or_else(|| PathBuf::from("~/.config/fleetwatch/config.yaml"));

                if !default_path.exists() {
                    return self.build_config_from_args(builder);
                }
                default_path
            }
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!("Loaded configuration from: {:?}", config_path);
            }
            Err(e) if self.config.is_some() => {
                return Err(ExporterError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            }
            Err(_) => {
                tracing::debug!("No config file found at {:?}, using defaults", config_path);
            }
        }

        self.build_config_from_args(builder)
    }

    /// Apply CLI arguments on top of `builder`.
    pub fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(endpoint) = &self.api_endpoint {
            builder = builder.api_endpoint(endpoint.as_str());
        }
        if let Some(endpoint) = &self.log_cache_endpoint {
            builder = builder.log_cache_endpoint(endpoint.as_str());
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            builder = builder.credentials(username.as_str(), password.as_str());
        }
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            builder = builder.client(id.as_str(), secret.as_str());
        }
        if self.skip_ssl_validation {
            builder = builder.skip_tls_verify(true);
        }
        if let Some(seconds) = self.update_frequency {
            builder = builder.update_frequency(Duration::from_secs(seconds));
        }
        if self.discover_services {
            builder = builder.discover_services(true);
        }
        if !self.events.is_empty() {
            builder = builder.event_types(self.events.clone());
        }
        if let Some(endpoint) = &self.statsd_endpoint {
            builder = builder.statsd_endpoint(endpoint.as_str());
        }
        if let Some(prefix) = &self.statsd_prefix {
            builder = builder.statsd_prefix(prefix.as_str());
        }
        if self.no_statsd {
            builder = builder.enable_statsd(false);
        }
        if let Some(addr) = self.prometheus {
            builder = builder.prometheus(addr);
        }
        if !self.allow_list.is_empty() {
            builder = builder.allow_list(self.allow_list.clone());
        }
        if let Some(template) = &self.template {
            builder = builder.template(template.as_str());
        }
        if self.structured {
            builder = builder.structured_logging(true);
        }
        if self.debug {
            builder = builder.debug(true);
        }

        builder.build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level =
            std::env::var("FLEETWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if self.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ExporterError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute fleetwatch.
pub async fn execute(cli: Cli) -> Result<()> {
    cli.init_logging()?;

    let config = cli.load_config().await?;

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!("  API endpoint: {}", config.platform.api_endpoint);
        println!("  Log cache endpoint: {}", config.log_cache_endpoint());
        println!("  Update frequency: {:?}", config.platform.update_frequency);
        println!(
            "  Event types: {}",
            config
                .events
                .types
                .iter()
                .map(EventKind::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("  Metric template: {}", config.metrics.template);
        if config.sinks.statsd.enabled {
            println!("  Statsd: {} (prefix '{}')", config.sinks.statsd.endpoint, config.sinks.statsd.prefix);
        }
        if config.sinks.prometheus.enabled {
            println!("  Prometheus: {}", config.sinks.prometheus.bind_address);
        }
        return Ok(());
    }

    tracing::info!("Starting fleetwatch against {}", config.platform.api_endpoint);
    Application::new(config)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "fleetwatch",
            "--api-endpoint",
            "https://api.sys.example.com",
            "--update-frequency",
            "30",
            "--allow-list",
            "cpu,requests",
            "--events",
            "container_metric,log_message",
            "--prometheus",
            "127.0.0.1:9090",
            "--no-statsd",
        ]);
        let config = cli.build_config_from_args(ConfigBuilder::new()).unwrap();

        assert_eq!(config.platform.api_endpoint, "https://api.sys.example.com");
        assert_eq!(config.platform.update_frequency, Duration::from_secs(30));
        assert_eq!(config.metrics.allow_list, vec!["cpu", "requests"]);
        assert_eq!(
            config.events.types,
            vec![EventKind::ContainerMetric, EventKind::LogMessage]
        );
        assert!(config.sinks.prometheus.enabled);
        assert!(!config.sinks.statsd.enabled);
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = Cli::try_parse_from(["fleetwatch", "--events", "value_metric"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_uses_debug_sink() {
        let cli = Cli::parse_from(["fleetwatch", "--debug"]);
        let config = cli.build_config_from_args(ConfigBuilder::new()).unwrap();
        assert!(config.sinks.debug.enabled);
        assert!(!config.sinks.statsd.enabled);
    }
}
