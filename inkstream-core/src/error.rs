use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One violated request field, reported in the `details` list of a 400 reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the field, e.g. `settings.maxTokens`. Empty for the body itself.
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Core error type for inkstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}: {} invalid field(s)", details.len())]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("token limit exceeded: used {used} of {limit}")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("upstream transport failed: {0}")]
    Transport(String),

    #[error("upstream idle for more than {idle_ms}ms")]
    UpstreamTimeout { idle_ms: u64 },

    #[error("malformed stream record: {0}")]
    StreamProtocol(String),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("stream aborted by server: {message}")]
    ServerSignaled { message: String },

    #[error("server replied {status}: {message}")]
    Api {
        status: u16,
        message: String,
        details: Vec<FieldError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Request-shape failure with field-level details.
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// True for failures of the upstream call itself (network, provider, timeout).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ProviderUnavailable { .. }
                | Self::ProviderError { .. }
                | Self::Transport(_)
                | Self::UpstreamTimeout { .. }
        )
    }

    /// Short stable label used in logs and completion telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderError { .. } => "provider_error",
            Self::Transport(_) => "transport",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::StreamProtocol(_) => "stream_protocol",
            Self::ShuttingDown => "shutting_down",
            Self::ServerSignaled { .. } => "server_signaled",
            Self::Api { .. } => "api",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
