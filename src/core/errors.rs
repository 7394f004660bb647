use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String, offset: Option<usize> },

    #[error("Circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Application error: {message}")]
    Application { message: String, retryable: bool },

    #[error("Handler for channel '{channel}' failed: {message}")]
    Handler { channel: String, message: String },

    #[error("All fallbacks for '{operation}' failed: {}", errors.join("; "))]
    FallbackExhausted {
        operation: String,
        errors: Vec<String>,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),

    #[error("Connection manager is closed")]
    Closed,
}

impl FeedError {
    /// Retryable application error
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            retryable: true,
        }
    }

    /// Application error the retry executor must not retry
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Whether the error itself allows another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. }
            | Self::Permission(_)
            | Self::InvalidParameters(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Closed => false,
            // A truncated body may succeed on refetch; a wrong shape never will
            Self::Json(e) => matches!(
                e.classify(),
                serde_json::error::Category::Eof | serde_json::error::Category::Io
            ),
            Self::Application { retryable, .. } => *retryable,
            _ => true,
        }
    }

    /// Analytics category inferred from the variant
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) | Self::Closed => ErrorCategory::Network,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::MalformedFrame { .. } => ErrorCategory::Syntax,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::Permission(_) => ErrorCategory::Permission,
            Self::Serialization(_) => ErrorCategory::Type,
            Self::Json(e) => ErrorCategory::from_json(e),
            Self::Application { .. }
            | Self::Handler { .. }
            | Self::FallbackExhausted { .. }
            | Self::InvalidParameters(_)
            | Self::Config(_) => ErrorCategory::Application,
        }
    }

    /// Stable code used in logs and error records
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MalformedFrame { .. } => "MALFORMED_FRAME",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Permission(_) => "PERMISSION",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Json(_) => "JSON",
            Self::Application { .. } => "APPLICATION",
            Self::Handler { .. } => "HANDLER",
            Self::FallbackExhausted { .. } => "FALLBACK_EXHAUSTED",
            Self::InvalidParameters(_) => "INVALID_PARAMETERS",
            Self::Config(_) => "CONFIG",
            Self::Closed => "CLOSED",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Category assigned to every recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Timeout,
    Network,
    CircuitOpen,
    Type,
    Syntax,
    Permission,
    Application,
}

impl ErrorCategory {
    pub fn from_json(error: &serde_json::Error) -> Self {
        use serde_json::error::Category;
        match error.classify() {
            Category::Syntax | Category::Eof => Self::Syntax,
            Category::Data => Self::Type,
            Category::Io => Self::Network,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Type => "TYPE",
            Self::Syntax => "SYNTAX",
            Self::Permission => "PERMISSION",
            Self::Application => "APPLICATION",
        };
        f.write_str(name)
    }
}
