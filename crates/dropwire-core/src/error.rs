//! Raw transport failures and the classified error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw failure from a single delivery attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response received (DNS failure, connection refused, reset).
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response within the strategy's timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The response was blocked by origin policy.
    #[error("blocked by origin policy: {0}")]
    CorsRejected(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A 2xx response whose body could not be parsed.
    #[error("unparseable payload: {0}")]
    InvalidPayload(String),

    /// The caller cancelled the attempt.
    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status { status, body: body.into() }
    }

    /// HTTP status code, when the server answered.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Classified kind of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkUnreachable,
    Timeout,
    CorsRejected,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationFailed,
    RateLimited,
    ServerError,
    Unknown,
    /// No credential was present; nothing was sent.
    AuthenticationRequired,
    /// The operation's circuit is open; nothing was sent.
    CircuitOpen,
    /// The caller cancelled the call.
    Cancelled,
}

impl ErrorKind {
    /// Whether retrying (or falling back to another strategy) can change the outcome.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnreachable
                | Self::Timeout
                | Self::CorsRejected
                | Self::RateLimited
                | Self::ServerError
        )
    }

    /// Stable, user-facing message for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable => {
                "Unable to reach the server. Check your connection and try again."
            }
            Self::Timeout => "The server took too long to respond. Please try again.",
            Self::CorsRejected => "The request was blocked by the browser. Please try again.",
            Self::Unauthorized | Self::AuthenticationRequired => "Please sign in to continue",
            Self::Forbidden => "You do not have permission to perform this action.",
            Self::NotFound => "The requested item could not be found.",
            Self::Conflict => "This item was changed elsewhere. Refresh and try again.",
            Self::ValidationFailed => "Some of the submitted information is invalid.",
            Self::RateLimited => "Too many requests. Please wait a moment and try again.",
            Self::ServerError => "The server encountered an error. Please try again later.",
            Self::Unknown => "Something went wrong. Please try again.",
            Self::CircuitOpen => "Service temporarily unavailable, retry later.",
            Self::Cancelled => "The request was cancelled.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkUnreachable => "network_unreachable",
            Self::Timeout => "timeout",
            Self::CorsRejected => "cors_rejected",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ValidationFailed => "validation_failed",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
            Self::AuthenticationRequired => "authentication_required",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The single error a caller receives for a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {diagnostic_message}")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    /// Detail for logs; not meant for end users.
    pub diagnostic_message: String,
    pub user_message: String,
    pub retriable: bool,
}

impl ErrorRecord {
    /// Build a record whose message and retriability follow from `kind`.
    pub fn new(kind: ErrorKind, http_status: Option<u16>, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            http_status,
            diagnostic_message: diagnostic.into(),
            user_message: kind.user_message().to_string(),
            retriable: kind.is_retriable(),
        }
    }

    pub fn authentication_required() -> Self {
        Self::new(ErrorKind::AuthenticationRequired, None, "no bearer credential present")
    }

    pub fn circuit_open(operation: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            None,
            format!("circuit open for operation `{operation}`"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, None, "request cancelled by caller")
    }
}
