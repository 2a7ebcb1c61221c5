use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "retry.max_attempts")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "rate_limiter", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport-level failure categories reported by the wrapped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// The attempt did not complete in time.
    Timeout,
    /// Connection dropped or body could not be read.
    Io,
    /// Malformed response or protocol violation.
    Protocol,
}

/// Classification of a failed attempt, used by the retry handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Http { status: u16 },
    Transport(TransportKind),
    Other,
}

/// Implemented by error types that can flow through [`crate::resilience::RetryHandler`].
///
/// Callers keep their own error type; the handler only needs to know what kind of
/// failure it is looking at.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Failure of a single HTTP attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Server-suggested wait, parsed from `Retry-After`.
        retry_after: Option<Duration>,
    },

    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("{message}")]
    Other { message: String },
}

impl OperationError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        OperationError::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        OperationError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        OperationError::Other {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            OperationError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for OperationError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            OperationError::Http { status, .. } => FailureKind::Http { status: *status },
            OperationError::Transport { kind, .. } => FailureKind::Transport(*kind),
            OperationError::Other { .. } => FailureKind::Other,
        }
    }
}

/// Unified error type for the resilience layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("rate limit exceeded for '{identifier}', retry after {retry_after:?}")]
    RateLimited {
        identifier: String,
        retry_after: Duration,
    },

    #[error("circuit breaker open{}", format_retry_in(.retry_in))]
    CircuitOpen { retry_in: Option<Duration> },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config format error: {0}")]
    ConfigFormat(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_retry_in(retry_in: &Option<Duration>) -> String {
    match retry_in {
        Some(d) => format!(", retry in {}ms", d.as_millis()),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status of the underlying failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Operation(op) => op.status_code(),
            _ => None,
        }
    }

    /// Suggested wait before the caller tries again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => Some(*retry_after),
            Error::CircuitOpen { retry_in } => *retry_in,
            Error::Operation(OperationError::Http { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }
}
