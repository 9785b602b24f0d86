use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Leader lock lost")]
    LeaderLost,
}

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, ExporterError>;

impl ExporterError {
    /// Creates a new authentication error
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    /// Creates a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }

    /// Creates a new transform error
    pub fn transform<S: Into<String>>(msg: S) -> Self {
        Self::Transform(msg.into())
    }

    /// Creates a new sink error
    pub fn sink<N: Into<String>, S: Into<String>>(sink: N, msg: S) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: msg.into(),
        }
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new template error
    pub fn template<S: Into<String>>(msg: S) -> Self {
        Self::Template(msg.into())
    }

    /// Returns true if the error means the bearer token was rejected or expired
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Http(e) => e.status() == Some(reqwest::StatusCode::UNAUTHORIZED),
            _ => false,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Auth(_) | Self::Transport(_) | Self::Transform(_) | Self::Sink { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || self.is_auth(),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::Discovery(_) => "discovery",
            Self::Transform(_) => "transform",
            Self::Sink { .. } => "sink",
            Self::Config(_) | Self::Template(_) => "config",
            Self::Io(_) => "io",
            Self::Http(_) => "network",
            Self::Serialization(_) => "serialization",
            Self::Prometheus(_) => "prometheus",
            Self::Join(_) => "async",
            Self::LeaderLost => "leader",
        }
    }
}
